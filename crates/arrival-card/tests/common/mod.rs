//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrival_card::acquisition::AcquisitionSettings;
use arrival_card::automation::AutomationSettings;
use arrival_card::protocol::client::RemoteSettings;
use arrival_card::protocol::orchestrator::ReferencePolicy;
use arrival_card::renderer::{NavigationResult, RenderContext, Renderer};
use arrival_card::strategy::{AutomationStrategy, HybridStrategy};
use arrival_card::{
    ArrivalPipeline, EventBus, FallbackAutomationPath, FieldEncodingRegistry, RegistryHandle,
    ResultStore, Step, SubmissionOrchestrator, TokenAcquisitionEngine, TravelerSubmissionRecord,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 7, 7, 7];

pub fn sample_record() -> TravelerSubmissionRecord {
    serde_json::from_str(include_str!("../fixtures/record.json")).unwrap()
}

pub fn fixture_registry() -> FieldEncodingRegistry {
    FieldEncodingRegistry::from_json(include_str!("../fixtures/taxonomy.json")).unwrap()
}

/// What a fake browser page does.
#[derive(Debug, Clone)]
pub enum PageBehavior {
    /// The challenge never yields a token.
    Silent,
    /// The challenge yields `token`; the form (if any) confirms with `code`.
    Solves { token: String, code: String },
    /// Page load never finishes.
    Hangs,
}

/// Scripted stand-in for a Chromium instance.
pub struct FakeBrowser {
    behavior: PageBehavior,
    opened: Arc<AtomicU32>,
    closed: Arc<AtomicU32>,
    scripts: Arc<Mutex<Vec<String>>>,
}

impl FakeBrowser {
    pub fn new(behavior: PageBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            opened: Arc::new(AtomicU32::new(0)),
            closed: Arc::new(AtomicU32::new(0)),
            scripts: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn silent() -> Arc<Self> {
        Self::new(PageBehavior::Silent)
    }

    pub fn hanging() -> Arc<Self> {
        Self::new(PageBehavior::Hangs)
    }

    pub fn solving(token: &str, code: &str) -> Arc<Self> {
        Self::new(PageBehavior::Solves {
            token: token.to_string(),
            code: code.to_string(),
        })
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fills(&self) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains("__arrivalFill"))
            .count()
    }
}

#[async_trait]
impl Renderer for FakeBrowser {
    async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            behavior: self.behavior.clone(),
            closed: Arc::clone(&self.closed),
            scripts: Arc::clone(&self.scripts),
        }))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        (self.opened() - self.closed()) as usize
    }
}

struct FakePage {
    behavior: PageBehavior,
    closed: Arc<AtomicU32>,
    scripts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RenderContext for FakePage {
    async fn add_init_script(&self, _script: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> anyhow::Result<NavigationResult> {
        if matches!(self.behavior, PageBehavior::Hangs) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, script: &str) -> anyhow::Result<Value> {
        self.scripts.lock().unwrap().push(script.to_string());
        let (token, code) = match &self.behavior {
            PageBehavior::Silent | PageBehavior::Hangs => ("", ""),
            PageBehavior::Solves { token, code } => (token.as_str(), code.as_str()),
        };
        if script.contains("__arrivalFill") || script.contains("__arrivalClick") {
            return Ok(json!("ok"));
        }
        if script.contains("__arrivalResult") {
            return Ok(json!({
                "code": code,
                "proof": "data:image/png;base64,iVBORw0KGgo="
            }));
        }
        if script.contains("getResponse") {
            return Ok(json!(token));
        }
        Ok(json!(true))
    }

    async fn get_url(&self) -> anyhow::Result<String> {
        Ok("about:blank".to_string())
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": "OK", "message": "", "data": data}))
}

/// Mount a remote that accepts every step and confirms with `code`.
pub async fn mount_happy_path(server: &MockServer, code: &str) {
    let steps = [
        (Step::RegisterChallenge, json!({"sessionToken": "s-1"})),
        (Step::OpenForm, json!({"formToken": "f-1"})),
        (Step::RefreshReference, json!({"version": "fixture-3", "formToken": "f-1"})),
        (Step::HealthCheck, json!({"checkToken": "c-1"})),
        (Step::SubmitRecord, json!({"submitToken": "sub-1"})),
        (Step::RequestPreview, json!({"previewToken": "p-1"})),
        (Step::ConfirmPreview, json!({"confirmToken": "conf-1"})),
        (Step::FetchConfirmationCode, json!({"confirmationCode": code})),
    ];
    for (step, data) in steps {
        Mock::given(method("POST"))
            .and(path(step.default_path()))
            .respond_with(ok(data))
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(Step::FetchProofDocument.default_path()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PNG.to_vec(), "image/png"))
        .mount(server)
        .await;
}

/// Timings small enough for tests.
pub struct Harness {
    pub acquisition_budget: Duration,
    pub attempt_budget: Duration,
    pub retry_delay: Duration,
    pub max_step_gap: Duration,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            acquisition_budget: Duration::from_millis(150),
            attempt_budget: Duration::from_secs(10),
            retry_delay: Duration::ZERO,
            max_step_gap: Duration::from_secs(120),
        }
    }
}

impl Harness {
    pub fn pipeline(
        &self,
        server: &MockServer,
        hidden: Arc<FakeBrowser>,
        visible: Arc<FakeBrowser>,
        store: Arc<ResultStore>,
        events: EventBus,
    ) -> ArrivalPipeline {
        let registry = RegistryHandle::new(fixture_registry());
        let acquisition = AcquisitionSettings {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let remote = RemoteSettings {
            base_url: server.uri(),
            retry_delay: self.retry_delay,
            max_step_gap: self.max_step_gap,
            ..Default::default()
        };
        let reference = ReferencePolicy {
            max_age_days: 100_000,
            always_refresh: false,
        };
        let automation = AutomationSettings {
            form_url: format!("{}/arrival/form", server.uri()),
            field_delay: Duration::ZERO,
            result_timeout: Duration::from_millis(500),
            challenge_budget: self.acquisition_budget,
            ..Default::default()
        };

        let hybrid = HybridStrategy::new(
            registry.clone(),
            TokenAcquisitionEngine::new(hidden, acquisition.clone(), events.clone()),
            SubmissionOrchestrator::new(remote, registry, reference, events.clone()),
            self.acquisition_budget,
            self.attempt_budget,
        );
        let fallback = AutomationStrategy::new(FallbackAutomationPath::new(
            visible,
            acquisition,
            automation,
            events.clone(),
        ));
        ArrivalPipeline::new(Arc::new(hybrid), Arc::new(fallback), store, events)
    }
}
