//! Strategy selection: hybrid first, browser automation when it can help.
//!
//! Both execution paths implement [`SubmissionStrategy`]. The
//! [`ArrivalPipeline`] picks between them, reads `remediation()` on failure
//! to decide whether the fallback is worth running, and persists whichever
//! result arrives.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::acquisition::TokenAcquisitionEngine;
use crate::audit::{AttemptEntry, AttemptJournal};
use crate::automation::FallbackAutomationPath;
use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::encoding::{FieldEncodingRegistry, RegistryHandle};
use crate::error::{Remediation, SubmissionError};
use crate::events::{now_timestamp, EventBus, SubmissionEvent};
use crate::protocol::orchestrator::SubmissionOrchestrator;
use crate::record::{SubmissionOutcome, SubmissionPath, SubmissionResult, TravelerSubmissionRecord};
use crate::renderer::chromium::LazyChromium;
use crate::renderer::SurfaceOptions;
use crate::storage::ResultStore;

/// One way of turning a record into an accepted submission.
#[async_trait]
pub trait SubmissionStrategy: Send + Sync {
    fn path(&self) -> SubmissionPath;

    async fn submit(
        &self,
        record: &TravelerSubmissionRecord,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError>;
}

/// Rendered challenge token, then direct protocol calls.
pub struct HybridStrategy {
    registry: RegistryHandle,
    acquisition: TokenAcquisitionEngine,
    orchestrator: SubmissionOrchestrator,
    acquisition_budget: Duration,
    attempt_budget: Duration,
}

impl HybridStrategy {
    pub fn new(
        registry: RegistryHandle,
        acquisition: TokenAcquisitionEngine,
        orchestrator: SubmissionOrchestrator,
        acquisition_budget: Duration,
        attempt_budget: Duration,
    ) -> Self {
        Self {
            registry,
            acquisition,
            orchestrator,
            acquisition_budget,
            attempt_budget,
        }
    }
}

#[async_trait]
impl SubmissionStrategy for HybridStrategy {
    fn path(&self) -> SubmissionPath {
        SubmissionPath::Hybrid
    }

    async fn submit(
        &self,
        record: &TravelerSubmissionRecord,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        // Encode first: a gap in the taxonomy must fail before any page load or remote call.
        let encoded = self.registry.snapshot().encode_record(record)?;
        let challenge_url = self.orchestrator.settings().challenge_url();
        let deadline = tokio::time::Instant::now() + self.attempt_budget;
        let timed_out = || SubmissionError::AttemptTimeout {
            budget: self.attempt_budget,
        };

        // Acquisition owns a rendering context: bound it by budget, never drop it mid-flight.
        let clipped = self.attempt_budget < self.acquisition_budget;
        let token = match self
            .acquisition
            .acquire(&challenge_url, self.acquisition_budget.min(self.attempt_budget), cancel)
            .await
        {
            Err(SubmissionError::AcquisitionTimeout { .. }) if clipped => return Err(timed_out()),
            other => other?,
        };

        match tokio::time::timeout_at(deadline, self.orchestrator.submit(&encoded, token, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        }
    }
}

/// Visible browser fills and submits the human form.
pub struct AutomationStrategy {
    path: FallbackAutomationPath,
}

impl AutomationStrategy {
    pub fn new(path: FallbackAutomationPath) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SubmissionStrategy for AutomationStrategy {
    fn path(&self) -> SubmissionPath {
        SubmissionPath::Automation
    }

    async fn submit(
        &self,
        record: &TravelerSubmissionRecord,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        self.path.submit_via_automation(record, cancel).await
    }
}

/// Which paths an attempt may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyChoice {
    /// Hybrid, then automation when the failure calls for it.
    #[default]
    Auto,
    /// Hybrid only.
    Hybrid,
    /// Automation only.
    Automation,
}

impl std::str::FromStr for StrategyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "hybrid" => Ok(Self::Hybrid),
            "automation" => Ok(Self::Automation),
            other => Err(format!("unknown strategy `{other}` (auto, hybrid, automation)")),
        }
    }
}

/// Entry point: idempotence guard, strategy selection, persistence, journal.
pub struct ArrivalPipeline {
    hybrid: Arc<dyn SubmissionStrategy>,
    automation: Arc<dyn SubmissionStrategy>,
    store: Arc<ResultStore>,
    journal: Option<Mutex<AttemptJournal>>,
    events: EventBus,
    choice: StrategyChoice,
}

impl ArrivalPipeline {
    pub fn new(
        hybrid: Arc<dyn SubmissionStrategy>,
        automation: Arc<dyn SubmissionStrategy>,
        store: Arc<ResultStore>,
        events: EventBus,
    ) -> Self {
        Self {
            hybrid,
            automation,
            store,
            journal: None,
            events,
            choice: StrategyChoice::Auto,
        }
    }

    pub fn with_choice(mut self, choice: StrategyChoice) -> Self {
        self.choice = choice;
        self
    }

    pub fn with_journal(mut self, journal: AttemptJournal) -> Self {
        self.journal = Some(Mutex::new(journal));
        self
    }

    /// Wire both paths from configuration. Browsers launch on first use.
    pub fn from_config(config: &Config, events: EventBus) -> Result<Self, SubmissionError> {
        let registry = match &config.registry.path {
            Some(path) => FieldEncodingRegistry::from_path(path)?,
            None => FieldEncodingRegistry::bundled()?,
        };
        let registry = RegistryHandle::new(registry);
        let chromium = config.acquisition.chromium_path.clone();

        let hidden = Arc::new(LazyChromium::new(config.acquisition.surface, chromium.clone()));
        let visible = Arc::new(LazyChromium::new(
            SurfaceOptions {
                headless: false,
                ..config.acquisition.surface
            },
            chromium,
        ));

        let hybrid = HybridStrategy::new(
            registry.clone(),
            TokenAcquisitionEngine::new(hidden, config.acquisition.settings.clone(), events.clone()),
            SubmissionOrchestrator::new(
                config.remote.clone(),
                registry,
                config.registry.reference,
                events.clone(),
            ),
            config.acquisition.budget,
            config.attempt_budget(),
        );
        let automation = AutomationStrategy::new(FallbackAutomationPath::new(
            visible,
            config.acquisition.settings.clone(),
            config.automation.clone(),
            events.clone(),
        ));

        let store = Arc::new(ResultStore::open(&config.storage.db_path())?);
        let mut pipeline = Self::new(Arc::new(hybrid), Arc::new(automation), store, events);

        if config.storage.journal {
            match AttemptJournal::open(&config.storage.journal_path()) {
                Ok(journal) => pipeline = pipeline.with_journal(journal),
                Err(e) => tracing::warn!(error = %e, "attempt journal disabled"),
            }
        }
        Ok(pipeline)
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Submit `record`, or return the stored acceptance for it.
    pub async fn submit(
        &self,
        record: &TravelerSubmissionRecord,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        let key = record.trip_key();
        let digest = key.digest();
        let fingerprint = record
            .fingerprint()
            .map_err(|e| SubmissionError::InvalidRecord(e.to_string()))?;

        if let Some(stored) = self.store.lookup(&key)? {
            if stored.record_fingerprint == fingerprint && stored.result.is_complete() {
                tracing::info!(trip = %digest, "returning stored acceptance");
                self.events.emit(SubmissionEvent::ResultReused {
                    trip_digest: digest.clone(),
                });
                let mut result = stored.result;
                result.outcome = SubmissionOutcome::PreviouslyAccepted;
                self.journal(AttemptEntry::new(
                    digest,
                    result.path,
                    Some(result.submit_id.clone()),
                    "previously_accepted",
                    0,
                ));
                return Ok(result);
            }
        }

        let result = match self.choice {
            StrategyChoice::Hybrid => self.attempt(self.hybrid.as_ref(), record, &digest, cancel).await?,
            StrategyChoice::Automation => {
                self.attempt(self.automation.as_ref(), record, &digest, cancel).await?
            }
            StrategyChoice::Auto => {
                match self.attempt(self.hybrid.as_ref(), record, &digest, cancel).await {
                    Ok(result) => result,
                    Err(err) if err.remediation() == Remediation::UseFallback && !cancel.is_cancelled() => {
                        tracing::warn!(trip = %digest, cause = %err.class(), "hybrid path failed, engaging automation");
                        self.events.emit(SubmissionEvent::FallbackEngaged {
                            trip_digest: digest.clone(),
                            cause: err.class(),
                        });
                        self.attempt(self.automation.as_ref(), record, &digest, cancel).await?
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let stored = self.store.store(&key, &result, &fingerprint)?;
        tracing::info!(trip = %digest, outcome = ?stored, path = result.path.as_str(), "submission persisted");
        Ok(result)
    }

    async fn attempt(
        &self,
        strategy: &dyn SubmissionStrategy,
        record: &TravelerSubmissionRecord,
        digest: &str,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        let path = strategy.path();
        let started = Instant::now();
        self.events.emit(SubmissionEvent::AttemptStarted {
            trip_digest: digest.to_string(),
            path,
            timestamp: now_timestamp(),
        });

        let outcome = strategy.submit(record, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => {
                self.events.emit(SubmissionEvent::AttemptSucceeded {
                    submit_id: result.submit_id.clone(),
                    path,
                    elapsed_ms,
                });
                self.journal(AttemptEntry::new(
                    digest,
                    path,
                    Some(result.submit_id.clone()),
                    "accepted",
                    elapsed_ms,
                ));
            }
            Err(err) => {
                tracing::info!(trip = %digest, path = path.as_str(), class = %err.class(), elapsed_ms, "attempt failed");
                self.events.emit(SubmissionEvent::AttemptFailed {
                    path,
                    class: err.class(),
                    remediation: err.remediation(),
                    elapsed_ms,
                });
                self.journal(AttemptEntry::new(digest, path, None, err.class().to_string(), elapsed_ms));
            }
        }
        outcome
    }

    fn journal(&self, entry: AttemptEntry) {
        if let Some(journal) = &self.journal {
            let mut journal = journal.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = journal.record(&entry) {
                tracing::warn!(error = %e, "attempt journal write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProofDocument;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        path: SubmissionPath,
        calls: AtomicU32,
        fail_with: fn() -> Option<SubmissionError>,
    }

    impl Scripted {
        fn new(path: SubmissionPath, fail_with: fn() -> Option<SubmissionError>) -> Arc<Self> {
            Arc::new(Self {
                path,
                calls: AtomicU32::new(0),
                fail_with,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SubmissionStrategy for Scripted {
        fn path(&self) -> SubmissionPath {
            self.path
        }

        async fn submit(
            &self,
            _record: &TravelerSubmissionRecord,
            _cancel: &CancelSignal,
        ) -> Result<SubmissionResult, SubmissionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = (self.fail_with)() {
                return Err(err);
            }
            Ok(SubmissionResult {
                submit_id: format!("ACS-{}-{n}", self.path.as_str()),
                confirmation_code: format!("{}-{n}", self.path.as_str().to_uppercase()),
                proof: ProofDocument::from_bytes(vec![0x89, b'P', b'N', b'G', 1]),
                elapsed_ms: 10,
                outcome: SubmissionOutcome::Accepted,
                path: self.path,
                completed_at: chrono::Utc::now(),
            })
        }
    }

    fn ok() -> Option<SubmissionError> {
        None
    }

    fn acquisition_timeout() -> Option<SubmissionError> {
        Some(SubmissionError::AcquisitionTimeout {
            attempts: 60,
            elapsed_ms: 30_000,
        })
    }

    fn rejected() -> Option<SubmissionError> {
        Some(SubmissionError::RemoteValidationRejected {
            field: "passportNo".to_string(),
            reason: "format".to_string(),
        })
    }

    fn record() -> TravelerSubmissionRecord {
        serde_json::from_str(include_str!("../tests/fixtures/record.json")).unwrap()
    }

    fn pipeline(
        hybrid: Arc<Scripted>,
        automation: Arc<Scripted>,
    ) -> ArrivalPipeline {
        ArrivalPipeline::new(
            hybrid,
            automation,
            Arc::new(ResultStore::open_in_memory().unwrap()),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn test_fallback_engages_on_acquisition_timeout() {
        let hybrid = Scripted::new(SubmissionPath::Hybrid, acquisition_timeout);
        let automation = Scripted::new(SubmissionPath::Automation, ok);
        let pipeline = pipeline(hybrid.clone(), automation.clone());
        let mut events = pipeline.events.subscribe();

        let result = pipeline.submit(&record(), &CancelSignal::new()).await.unwrap();
        assert_eq!(result.path, SubmissionPath::Automation);
        assert_eq!(hybrid.calls(), 1);
        assert_eq!(automation.calls(), 1);

        let stored = pipeline.store().load(&record().trip_key()).unwrap().unwrap();
        assert_eq!(stored.confirmation_code, result.confirmation_code);

        let mut saw_fallback = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SubmissionEvent::FallbackEngaged { .. }) {
                saw_fallback = true;
            }
        }
        assert!(saw_fallback);
    }

    #[tokio::test]
    async fn test_validation_rejection_skips_fallback() {
        let hybrid = Scripted::new(SubmissionPath::Hybrid, rejected);
        let automation = Scripted::new(SubmissionPath::Automation, ok);
        let pipeline = pipeline(hybrid, automation.clone());

        let err = pipeline.submit(&record(), &CancelSignal::new()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::RemoteValidationRejected { .. }));
        assert_eq!(automation.calls(), 0);
        assert!(pipeline.store().load(&record().trip_key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hybrid_only_choice_never_falls_back() {
        let hybrid = Scripted::new(SubmissionPath::Hybrid, acquisition_timeout);
        let automation = Scripted::new(SubmissionPath::Automation, ok);
        let pipeline = pipeline(hybrid, automation.clone()).with_choice(StrategyChoice::Hybrid);

        let err = pipeline.submit(&record(), &CancelSignal::new()).await.unwrap_err();
        assert_eq!(err.remediation(), Remediation::UseFallback);
        assert_eq!(automation.calls(), 0);
    }

    #[tokio::test]
    async fn test_resubmit_returns_stored_acceptance() {
        let hybrid = Scripted::new(SubmissionPath::Hybrid, ok);
        let automation = Scripted::new(SubmissionPath::Automation, ok);
        let pipeline = pipeline(hybrid.clone(), automation);

        let first = pipeline.submit(&record(), &CancelSignal::new()).await.unwrap();
        let second = pipeline.submit(&record(), &CancelSignal::new()).await.unwrap();

        assert_eq!(hybrid.calls(), 1);
        assert_eq!(first.outcome, SubmissionOutcome::Accepted);
        assert_eq!(second.outcome, SubmissionOutcome::PreviouslyAccepted);
        assert_eq!(first.confirmation_code, second.confirmation_code);
        assert_eq!(pipeline.store().list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_record_submits_again() {
        let hybrid = Scripted::new(SubmissionPath::Hybrid, ok);
        let automation = Scripted::new(SubmissionPath::Automation, ok);
        let pipeline = pipeline(hybrid.clone(), automation);

        pipeline.submit(&record(), &CancelSignal::new()).await.unwrap();
        let mut changed = record();
        changed.accommodation.address = "4-5-6 Shibuya".to_string();
        let second = pipeline.submit(&changed, &CancelSignal::new()).await.unwrap();

        assert_eq!(hybrid.calls(), 2);
        assert_eq!(second.outcome, SubmissionOutcome::Accepted);
        let stored = pipeline.store().load(&changed.trip_key()).unwrap().unwrap();
        assert_eq!(stored.confirmation_code, second.confirmation_code);
    }

    #[test]
    fn test_strategy_choice_parse() {
        assert_eq!("auto".parse::<StrategyChoice>().unwrap(), StrategyChoice::Auto);
        assert_eq!(
            "automation".parse::<StrategyChoice>().unwrap(),
            StrategyChoice::Automation
        );
        assert!("browser".parse::<StrategyChoice>().is_err());
    }
}
