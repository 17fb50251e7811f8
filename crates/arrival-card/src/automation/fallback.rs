//! Fully visible browser path: pass the challenge, fill the form the way a
//! person would, submit, and scrape the confirmation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use crate::acquisition::{millis, probe_script, read_script, AcquisitionSettings};
use crate::automation::script::{click_script, decode_data_url, field_plan, fill_script, result_script};
use crate::cancel::CancelSignal;
use crate::error::SubmissionError;
use crate::events::{EventBus, SubmissionEvent};
use crate::protocol::session::SubmitId;
use crate::record::{
    ProofDocument, SubmissionOutcome, SubmissionPath, SubmissionResult, TravelerSubmissionRecord,
};
use crate::renderer::{RenderContext, Renderer};

/// Page layout knobs for the human form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    /// Absolute URL of the human-facing form.
    pub form_url: String,
    /// Label text overrides, keyed by field id (`passportNo`, `arrivalDate`, ...).
    pub labels: BTreeMap<String, String>,
    pub submit_selector: String,
    pub confirmation_selector: String,
    pub proof_selector: String,
    /// How long to wait for the confirmation after submitting.
    #[serde(rename = "result_timeout_ms", with = "millis")]
    pub result_timeout: Duration,
    /// Pause between filled fields, so page scripts can react.
    #[serde(rename = "field_delay_ms", with = "millis")]
    pub field_delay: Duration,
    /// How long the challenge may take on the visible page.
    #[serde(rename = "challenge_budget_ms", with = "millis")]
    pub challenge_budget: Duration,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            form_url: "https://arrival.example.gov/arrival/form".to_string(),
            labels: BTreeMap::new(),
            submit_selector: "button[type=\"submit\"]".to_string(),
            confirmation_selector: "[data-confirmation-code], .confirmation-code".to_string(),
            proof_selector: "img.proof-qr, canvas.proof-qr, [data-proof] img, [data-proof] canvas"
                .to_string(),
            result_timeout: Duration::from_secs(60),
            field_delay: Duration::from_millis(150),
            challenge_budget: Duration::from_secs(30),
        }
    }
}

/// Browser-driven submission, used when the hybrid path cannot finish.
pub struct FallbackAutomationPath {
    renderer: Arc<dyn Renderer>,
    acquisition: AcquisitionSettings,
    settings: AutomationSettings,
    events: EventBus,
}

impl FallbackAutomationPath {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        acquisition: AcquisitionSettings,
        settings: AutomationSettings,
        events: EventBus,
    ) -> Self {
        Self {
            renderer,
            acquisition,
            settings,
            events,
        }
    }

    /// Submit `record` through the visible form.
    pub async fn submit_via_automation(
        &self,
        record: &TravelerSubmissionRecord,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        if cancel.is_cancelled() {
            return Err(SubmissionError::Cancelled);
        }

        let started = std::time::Instant::now();
        let submit_id = SubmitId::generate();
        tracing::info!(submit_id = %submit_id, "starting browser automation");

        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| SubmissionError::AutomationRender(format!("{e:#}")))?;

        let outcome = self.run(ctx.as_mut(), record, cancel).await;

        if let Err(e) = ctx.close().await {
            tracing::debug!(error = %e, "automation context close failed");
        }

        let (confirmation_code, proof) = outcome?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(submit_id = %submit_id, elapsed_ms, "automation completed");

        Ok(SubmissionResult {
            submit_id: submit_id.to_string(),
            confirmation_code,
            proof,
            elapsed_ms,
            outcome: SubmissionOutcome::Accepted,
            path: SubmissionPath::Automation,
            completed_at: Utc::now(),
        })
    }

    fn stage(&self, stage: &str) {
        tracing::debug!(stage, "automation stage");
        self.events.emit(SubmissionEvent::AutomationStage {
            stage: stage.to_string(),
        });
    }

    async fn run(
        &self,
        ctx: &mut dyn RenderContext,
        record: &TravelerSubmissionRecord,
        cancel: &CancelSignal,
    ) -> Result<(String, ProofDocument), SubmissionError> {
        let probe = probe_script(&self.acquisition);
        ctx.add_init_script(&probe)
            .await
            .map_err(|e| SubmissionError::AutomationRender(format!("{e:#}")))?;

        let nav_timeout = self.acquisition.navigation_timeout.as_millis() as u64;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
            nav = ctx.navigate(&self.settings.form_url, nav_timeout) => {
                nav.map_err(|e| SubmissionError::AutomationRender(format!("{e:#}")))?;
            }
        }
        if let Err(e) = ctx.execute_js(&probe).await {
            tracing::debug!(error = %e, "post-load probe failed");
        }
        self.stage("form_loaded");

        self.wait_for_challenge(ctx, cancel).await?;
        self.stage("challenge_passed");

        for fill in field_plan(record, &self.settings.labels) {
            let answer = eval_cancellable(&*ctx, &fill_script(&fill), cancel).await?;
            match answer.as_str() {
                Some("ok") => {}
                other => {
                    tracing::warn!(field = fill.key, answer = ?other, "form field not filled");
                    return Err(SubmissionError::AutomationFieldNotFound(fill.label));
                }
            }
            if !self.settings.field_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                    _ = tokio::time::sleep(self.settings.field_delay) => {}
                }
            }
        }
        self.stage("fields_filled");

        let clicked = eval_cancellable(&*ctx, &click_script(&self.settings.submit_selector), cancel).await?;
        if clicked.as_str() != Some("ok") {
            return Err(SubmissionError::AutomationFieldNotFound(
                self.settings.submit_selector.clone(),
            ));
        }
        self.stage("submitted");

        let result = self.wait_for_result(ctx, cancel).await?;
        self.stage("result_scraped");
        Ok(result)
    }

    async fn wait_for_challenge(
        &self,
        ctx: &mut dyn RenderContext,
        cancel: &CancelSignal,
    ) -> Result<(), SubmissionError> {
        let start = Instant::now();
        let deadline = start + self.settings.challenge_budget;
        let read = read_script(&self.acquisition);
        let mut ticker = tokio::time::interval(self.acquisition.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SubmissionError::AutomationChallengeTimeout {
                        attempts: polls,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    });
                }
                _ = ticker.tick() => {}
            }
            polls += 1;
            if let Ok(value) = ctx.execute_js(&read).await {
                if value.as_str().is_some_and(|t| !t.is_empty()) {
                    return Ok(());
                }
            }
        }
    }

    async fn wait_for_result(
        &self,
        ctx: &mut dyn RenderContext,
        cancel: &CancelSignal,
    ) -> Result<(String, ProofDocument), SubmissionError> {
        let deadline = Instant::now() + self.settings.result_timeout;
        let scrape = result_script(
            &self.settings.confirmation_selector,
            &self.settings.proof_selector,
        );
        let mut ticker = tokio::time::interval(self.acquisition.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SubmissionError::AutomationTimeout(self.settings.result_timeout));
                }
                _ = ticker.tick() => {}
            }

            let value = match ctx.execute_js(&scrape).await {
                Ok(value) => value,
                Err(e) => {
                    // The page navigates after submit; evaluation can fail mid-load.
                    tracing::debug!(error = %e, "result scrape failed");
                    continue;
                }
            };

            let code = value
                .get("code")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or_default();
            let proof = value
                .get("proof")
                .and_then(|v| v.as_str())
                .and_then(decode_data_url);

            if let Some(bytes) = proof.filter(|_| !code.is_empty()) {
                return Ok((code.to_string(), ProofDocument::from_bytes(bytes)));
            }
        }
    }
}

/// Evaluate a form script, giving up as soon as `cancel` fires.
async fn eval_cancellable(
    ctx: &dyn RenderContext,
    script: &str,
    cancel: &CancelSignal,
) -> Result<serde_json::Value, SubmissionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SubmissionError::Cancelled),
        answer = ctx.execute_js(script) => {
            answer.map_err(|e| SubmissionError::AutomationRender(format!("{e:#}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NavigationResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FormState {
        filled: Vec<String>,
        missing_label: Option<String>,
        submitted: bool,
        closed: bool,
        scrapes_before_result: u32,
        fill_delay: Duration,
    }

    struct FormRenderer {
        state: Arc<Mutex<FormState>>,
    }

    struct FormPage {
        state: Arc<Mutex<FormState>>,
    }

    #[async_trait]
    impl Renderer for FormRenderer {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            Ok(Box::new(FormPage {
                state: Arc::clone(&self.state),
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    #[async_trait]
    impl RenderContext for FormPage {
        async fn add_init_script(&self, _script: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> anyhow::Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 1,
            })
        }
        async fn execute_js(&self, script: &str) -> anyhow::Result<serde_json::Value> {
            if script.contains("__arrivalFill") {
                let delay = self.state.lock().unwrap().fill_delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            let mut state = self.state.lock().unwrap();
            if script.contains("__arrivalFill") {
                if let Some(missing) = &state.missing_label {
                    if script.contains(&format!("var label = '{missing}'")) {
                        return Ok(serde_json::json!("not_found"));
                    }
                }
                state.filled.push(script.len().to_string());
                return Ok(serde_json::json!("ok"));
            }
            if script.contains("__arrivalClick") {
                state.submitted = true;
                return Ok(serde_json::json!("ok"));
            }
            if script.contains("__arrivalResult") {
                if state.scrapes_before_result > 0 {
                    state.scrapes_before_result -= 1;
                    return Ok(serde_json::json!({"code": "", "proof": ""}));
                }
                return Ok(serde_json::json!({
                    "code": " JP-7731-QX ",
                    "proof": "data:image/png;base64,iVBORw0KGgo="
                }));
            }
            if script.contains("getResponse") {
                return Ok(serde_json::json!("tok"));
            }
            Ok(serde_json::json!(true))
        }
        async fn get_url(&self) -> anyhow::Result<String> {
            Ok("about:blank".to_string())
        }
        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            self.state.lock().unwrap().closed = true;
            Ok(())
        }
    }

    fn path_with(state: FormState) -> (FallbackAutomationPath, Arc<Mutex<FormState>>) {
        let state = Arc::new(Mutex::new(state));
        let renderer = FormRenderer {
            state: Arc::clone(&state),
        };
        let acquisition = AcquisitionSettings {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let settings = AutomationSettings {
            field_delay: Duration::ZERO,
            result_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        (
            FallbackAutomationPath::new(Arc::new(renderer), acquisition, settings, EventBus::default()),
            state,
        )
    }

    fn record() -> TravelerSubmissionRecord {
        serde_json::from_str(include_str!("../../tests/fixtures/record.json")).unwrap()
    }

    #[tokio::test]
    async fn test_automation_fills_and_scrapes() {
        let (path, state) = path_with(FormState {
            scrapes_before_result: 2,
            ..Default::default()
        });
        let result = path
            .submit_via_automation(&record(), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(result.confirmation_code, "JP-7731-QX");
        assert_eq!(result.proof.media_type, "image/png");
        assert_eq!(result.path, SubmissionPath::Automation);
        assert!(result.submit_id.starts_with("ACS-"));

        let state = state.lock().unwrap();
        assert!(state.submitted);
        assert!(state.closed);
        assert_eq!(state.filled.len(), field_plan(&record(), &BTreeMap::new()).len());
    }

    #[tokio::test]
    async fn test_missing_field_names_label() {
        let (path, state) = path_with(FormState {
            missing_label: Some("Arrival date".to_string()),
            ..Default::default()
        });
        let err = path
            .submit_via_automation(&record(), &CancelSignal::new())
            .await
            .unwrap_err();
        match err {
            SubmissionError::AutomationFieldNotFound(label) => assert_eq!(label, "Arrival date"),
            other => panic!("unexpected error: {other}"),
        }
        let state = state.lock().unwrap();
        assert!(!state.submitted);
        assert!(state.closed);
    }

    #[tokio::test]
    async fn test_result_never_appears() {
        let (path, _state) = path_with(FormState {
            scrapes_before_result: u32::MAX,
            ..Default::default()
        });
        let err = path
            .submit_via_automation(&record(), &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::AutomationTimeout(_)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_slow_fill() {
        let (path, state) = path_with(FormState {
            fill_delay: Duration::from_secs(30),
            ..Default::default()
        });
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            path.submit_via_automation(&record(), &cancel),
        )
        .await
        .expect("cancellation should interrupt the pending fill")
        .unwrap_err();

        assert!(matches!(err, SubmissionError::Cancelled));
        let state = state.lock().unwrap();
        assert!(!state.submitted);
        assert!(state.closed);
    }
}
