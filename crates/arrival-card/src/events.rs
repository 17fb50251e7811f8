// Copyright 2026 Arrival Card Contributors
// SPDX-License-Identifier: MIT

//! Submission event bus: typed progress events from every component.
//!
//! The EventBus is a `tokio::sync::broadcast` channel that carries
//! [`SubmissionEvent`] values. A progress UI, the CLI, or a log sink can
//! subscribe independently. When no subscribers exist, events are silently
//! dropped. Events identify attempts by submit id and trip-key digest only;
//! traveler fields never appear here.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ErrorClass, Remediation};
use crate::protocol::state::Step;
use crate::record::SubmissionPath;

/// Every event a submission attempt emits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubmissionEvent {
    // ── Attempt lifecycle ─────────────────
    /// A strategy has started working on a record.
    AttemptStarted {
        trip_digest: String,
        path: SubmissionPath,
        timestamp: String,
    },
    /// The trip already has a stored acceptance for this exact record.
    ResultReused { trip_digest: String },
    /// The hybrid path failed in a way the browser path can route around.
    FallbackEngaged {
        trip_digest: String,
        cause: ErrorClass,
    },
    /// An attempt finished with a confirmation code and proof document.
    AttemptSucceeded {
        submit_id: String,
        path: SubmissionPath,
        elapsed_ms: u64,
    },
    /// An attempt finished with a classified error.
    AttemptFailed {
        path: SubmissionPath,
        class: ErrorClass,
        remediation: Remediation,
        elapsed_ms: u64,
    },

    // ── Challenge acquisition ─────────────
    /// The hidden challenge page is loading.
    AcquisitionStarted { target: String },
    /// One poll of the challenge slot came back empty.
    AcquisitionPolled { poll: u32, elapsed_ms: u64 },
    /// A completion token was read from the page.
    TokenAcquired { polls: u32, elapsed_ms: u64 },

    // ── Protocol steps ────────────────────
    /// A protocol step is about to be sent.
    StepStarted {
        submit_id: String,
        step: Step,
        attempt: u32,
    },
    /// A step failed transiently and will be re-sent.
    StepRetrying {
        submit_id: String,
        step: Step,
        attempt: u32,
        reason: String,
    },
    /// A step was skipped because its precondition did not hold.
    StepSkipped { submit_id: String, step: Step },
    /// A step's response was accepted and the machine advanced.
    StepCompleted {
        submit_id: String,
        step: Step,
        elapsed_ms: u64,
    },

    // ── Automation path ───────────────────
    /// The visible browser flow reached a new stage.
    AutomationStage { stage: String },
}

/// The central event bus.
///
/// Cheap to clone; every clone feeds the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SubmissionEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: SubmissionEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    /// 256 events covers a full attempt including retries and fallback.
    fn default() -> Self {
        Self::new(256)
    }
}

/// RFC 3339 timestamp for the current time.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
