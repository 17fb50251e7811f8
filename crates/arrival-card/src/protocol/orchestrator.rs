//! Drives the nine-step protocol for one attempt.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::acquisition::ChallengeToken;
use crate::cancel::CancelSignal;
use crate::encoding::{EncodedRecord, RegistryHandle};
use crate::error::SubmissionError;
use crate::events::{EventBus, SubmissionEvent};
use crate::protocol::client::{required_str, CallFailure, ProtocolClient, RemoteSettings, StepReply};
use crate::protocol::session::{SessionContext, SubmitId};
use crate::protocol::state::{ProtocolState, Step, StepOutcome};
use crate::record::{
    ProofDocument, SubmissionOutcome, SubmissionPath, SubmissionResult, TravelerSubmissionRecord,
};

/// When the optional reference-data step runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePolicy {
    /// The local taxonomy counts as stale this many days after publication.
    pub max_age_days: u32,
    /// Run the step on every attempt regardless of age.
    pub always_refresh: bool,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            always_refresh: false,
        }
    }
}

/// Executes the remote protocol with a challenge token and an encoded record.
pub struct SubmissionOrchestrator {
    settings: RemoteSettings,
    registry: RegistryHandle,
    reference: ReferencePolicy,
    events: EventBus,
}

impl SubmissionOrchestrator {
    pub fn new(
        settings: RemoteSettings,
        registry: RegistryHandle,
        reference: ReferencePolicy,
        events: EventBus,
    ) -> Self {
        Self {
            settings,
            registry,
            reference,
            events,
        }
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// Encode `record` against the live registry, then run the protocol.
    pub async fn submit_record(
        &self,
        record: &TravelerSubmissionRecord,
        token: ChallengeToken,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        let encoded = self.registry.snapshot().encode_record(record)?;
        self.submit(&encoded, token, cancel).await
    }

    /// Run all steps in order. No step is sent unless its predecessor succeeded.
    pub async fn submit(
        &self,
        encoded: &EncodedRecord,
        token: ChallengeToken,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, SubmissionError> {
        let started = Instant::now();
        let mut session = SessionContext::new(self.settings.max_step_gap);
        let submit_id = session.submit_id().clone();
        let client = ProtocolClient::new(&self.settings, &submit_id)?;
        let refresh = self.needs_reference_refresh();

        tracing::info!(submit_id = %submit_id, refresh, "starting protocol");

        let mut state = ProtocolState::start(token);
        while let Some(step) = state.step() {
            if cancel.is_cancelled() {
                return Err(SubmissionError::Cancelled);
            }

            if step == Step::RefreshReference && !refresh {
                self.events.emit(SubmissionEvent::StepSkipped {
                    submit_id: submit_id.to_string(),
                    step,
                });
                state = state.skip_reference_refresh();
                continue;
            }

            session.ensure_alive(step)?;
            let input = state.input_token().unwrap_or_default().to_string();
            if step.spends_input() {
                session.consume(step, &input)?;
            }

            let step_started = Instant::now();
            let body = request_body(step, &submit_id, &input, encoded);
            let reply = self.send_with_retry(&client, step, &body, &session, cancel).await?;
            let outcome = outcome_for(step, reply)?;

            if let StepOutcome::Reference { version, .. } = &outcome {
                if version != &encoded.registry_version {
                    tracing::warn!(
                        submit_id = %submit_id,
                        local = %encoded.registry_version,
                        remote = %version,
                        "reference data drift"
                    );
                    return Err(SubmissionError::ReferenceDataDrift {
                        local: encoded.registry_version.clone(),
                        remote: version.clone(),
                    });
                }
            }

            session.record_issued(step, issued_value(&outcome));
            state = state.advance(outcome)?;

            let elapsed_ms = step_started.elapsed().as_millis() as u64;
            tracing::info!(submit_id = %submit_id, step = step.name(), elapsed_ms, "step completed");
            self.events.emit(SubmissionEvent::StepCompleted {
                submit_id: submit_id.to_string(),
                step,
                elapsed_ms,
            });
        }

        tracing::info!(
            submit_id = %submit_id,
            steps = session.completed_steps().len(),
            session_age_ms = session.age().as_millis() as u64,
            "protocol finished"
        );

        match state {
            ProtocolState::Completed {
                confirmation_code,
                proof,
            } => Ok(SubmissionResult {
                submit_id: submit_id.to_string(),
                confirmation_code,
                proof,
                elapsed_ms: started.elapsed().as_millis() as u64,
                outcome: SubmissionOutcome::Accepted,
                path: SubmissionPath::Hybrid,
                completed_at: Utc::now(),
            }),
            other => Err(SubmissionError::RemoteProtocol {
                step: other.step().unwrap_or(Step::FetchProofDocument),
                detail: "protocol stopped before completion".to_string(),
            }),
        }
    }

    fn needs_reference_refresh(&self) -> bool {
        if self.reference.always_refresh {
            return true;
        }
        self.registry
            .snapshot()
            .is_stale(self.reference.max_age_days, Utc::now().date_naive())
    }

    async fn send_with_retry(
        &self,
        client: &ProtocolClient,
        step: Step,
        body: &Value,
        session: &SessionContext,
        cancel: &CancelSignal,
    ) -> Result<StepReply, SubmissionError> {
        let submit_id = session.submit_id();
        let max_sends = self.settings.transient_retries + 1;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > 1 {
                // Retry pauses count against the gap the remote tolerates.
                session.ensure_alive(step)?;
            }
            self.events.emit(SubmissionEvent::StepStarted {
                submit_id: submit_id.to_string(),
                step,
                attempt,
            });

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                sent = client.send_once(step, body) => sent,
            };

            let detail = match sent {
                Ok(reply) => return Ok(reply),
                Err(CallFailure::Fatal(err)) => {
                    tracing::info!(submit_id = %submit_id, step = step.name(), class = %err.class(), "step failed");
                    return Err(err);
                }
                Err(CallFailure::Transient(detail)) => detail,
            };

            if attempt >= max_sends {
                return Err(SubmissionError::RemoteTransient {
                    step,
                    attempts: attempt,
                    detail,
                });
            }

            tracing::debug!(submit_id = %submit_id, step = step.name(), attempt, reason = %detail, "retrying step");
            self.events.emit(SubmissionEvent::StepRetrying {
                submit_id: submit_id.to_string(),
                step,
                attempt,
                reason: detail,
            });

            if !self.settings.retry_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                    _ = tokio::time::sleep(self.settings.retry_delay) => {}
                }
            }
        }
    }
}

/// Build the body for `step`, presenting only the previous step's token.
fn request_body(step: Step, submit_id: &SubmitId, input: &str, encoded: &EncodedRecord) -> Value {
    let mut body = Map::new();
    body.insert("submitId".to_string(), json!(submit_id.as_str()));
    body.insert(step.input_field().to_string(), json!(input));
    match step {
        Step::SubmitRecord => {
            body.insert("registryVersion".to_string(), json!(encoded.registry_version));
            body.insert("fields".to_string(), Value::Object(encoded.fields.clone()));
        }
        Step::ConfirmPreview => {
            body.insert("email".to_string(), json!(encoded.field("email").unwrap_or_default()));
            body.insert("phone".to_string(), json!(encoded.field("phone").unwrap_or_default()));
        }
        _ => {}
    }
    Value::Object(body)
}

fn outcome_for(step: Step, reply: StepReply) -> Result<StepOutcome, SubmissionError> {
    match (step, reply) {
        (Step::FetchProofDocument, StepReply::Document(bytes)) => {
            Ok(StepOutcome::Proof(ProofDocument::from_bytes(bytes)))
        }
        (Step::RefreshReference, StepReply::Data(data)) => Ok(StepOutcome::Reference {
            version: required_str(step, &data, "version")?,
            form_token: required_str(step, &data, "formToken")?,
        }),
        (Step::FetchConfirmationCode, StepReply::Data(data)) => Ok(StepOutcome::ConfirmationCode(
            required_str(step, &data, "confirmationCode")?,
        )),
        (step, StepReply::Data(data)) => {
            let field = step.output_field().unwrap_or("token");
            Ok(StepOutcome::Token(required_str(step, &data, field)?))
        }
        (step, StepReply::Document(_)) => Err(SubmissionError::RemoteProtocol {
            step,
            detail: "unexpected document body".to_string(),
        }),
    }
}

/// What the session records as this step's output.
fn issued_value(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Token(t) => t.clone(),
        StepOutcome::Reference { form_token, .. } => form_token.clone(),
        StepOutcome::ConfirmationCode(code) => code.clone(),
        StepOutcome::Proof(proof) => proof.media_type.clone(),
    }
}
