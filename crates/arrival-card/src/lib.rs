// Copyright 2026 Arrival Card Contributors
// SPDX-License-Identifier: MIT

//! Arrival card submission core.
//!
//! Takes a validated [`TravelerSubmissionRecord`], obtains a challenge
//! completion token from a rendered page, drives the remote registration
//! protocol, and persists the confirmation code plus proof document. When the
//! hybrid path fails in a way a browser can route around, the fully visible
//! automation path takes over and its result is stored the same way.

pub mod acquisition;
pub mod audit;
pub mod automation;
pub mod cancel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod protocol;
pub mod record;
pub mod renderer;
pub mod storage;
pub mod strategy;

pub use acquisition::{ChallengeToken, TokenAcquisitionEngine};
pub use automation::FallbackAutomationPath;
pub use cancel::CancelSignal;
pub use config::Config;
pub use encoding::{EncodedRecord, FieldCategory, FieldEncodingRegistry, RegistryHandle};
pub use error::{ErrorClass, Remediation, SubmissionError};
pub use events::{EventBus, SubmissionEvent};
pub use protocol::orchestrator::SubmissionOrchestrator;
pub use protocol::session::{SessionContext, SubmitId};
pub use protocol::state::{ProtocolState, Step};
pub use record::{SubmissionOutcome, SubmissionPath, SubmissionResult, TravelerSubmissionRecord, TripKey};
pub use storage::{ResultStore, StoreOutcome};
pub use strategy::{ArrivalPipeline, StrategyChoice, SubmissionStrategy};
