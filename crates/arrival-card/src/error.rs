//! Classified error taxonomy for submission attempts.
//!
//! Every terminal failure maps to an [`ErrorClass`] and a [`Remediation`];
//! the strategy selector reads the remediation to decide whether the browser
//! fallback can help.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::{FieldCategory, RegistryError};
use crate::protocol::state::Step;
use crate::storage::StorageError;

/// All errors a submission attempt can end with.
#[derive(thiserror::Error, Debug)]
pub enum SubmissionError {
    #[error("challenge token not produced after {attempts} polls ({elapsed_ms}ms)")]
    AcquisitionTimeout { attempts: u32, elapsed_ms: u64 },

    #[error("challenge page could not be rendered: {0}")]
    AcquisitionRender(String),

    #[error("remote rejected field `{field}`: {reason}")]
    RemoteValidationRejected { field: String, reason: String },

    #[error("transient failure at {step} after {attempts} attempts: {detail}")]
    RemoteTransient {
        step: Step,
        attempts: u32,
        detail: String,
    },

    #[error("no opaque identifier for {category} value `{value}`")]
    MissingFieldMapping {
        category: FieldCategory,
        value: String,
    },

    #[error("session expired at {step}: {reason}")]
    SessionExpired { step: Step, reason: String },

    #[error("unexpected response at {step}: {detail}")]
    RemoteProtocol { step: Step, detail: String },

    #[error("reference data drift: record encoded with {local}, remote serves {remote}")]
    ReferenceDataDrift { local: String, remote: String },

    #[error("record could not be serialized: {0}")]
    InvalidRecord(String),

    #[error("encoding registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("attempt exceeded its {}ms budget", .budget.as_millis())]
    AttemptTimeout { budget: Duration },

    #[error("form field not found on page: {0}")]
    AutomationFieldNotFound(String),

    #[error("challenge on the visible form not passed after {attempts} polls ({elapsed_ms}ms)")]
    AutomationChallengeTimeout { attempts: u32, elapsed_ms: u64 },

    #[error("confirmation did not appear within {}ms", .0.as_millis())]
    AutomationTimeout(Duration),

    #[error("browser automation failed: {0}")]
    AutomationRender(String),

    #[error("attempt cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Stable, machine-readable name for each error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    AcquisitionTimeout,
    AcquisitionRenderError,
    RemoteValidationRejected,
    RemoteTransient,
    MissingFieldMapping,
    SessionExpired,
    RemoteProtocol,
    ReferenceDataDrift,
    InvalidRecord,
    RegistryUnavailable,
    AttemptTimeout,
    AutomationFieldNotFound,
    AutomationChallengeTimeout,
    AutomationTimeout,
    AutomationRenderError,
    Cancelled,
    Storage,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// The same hybrid attempt may succeed if repeated later.
    RetryHybrid,
    /// The browser-driven path does not share the failing dependency.
    UseFallback,
    /// The record itself is the problem; resubmitting it unchanged fails again.
    CorrectRecord,
    /// Nothing to retry (cancelled, or local state is broken).
    Abort,
}

impl SubmissionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AcquisitionTimeout { .. } => ErrorClass::AcquisitionTimeout,
            Self::AcquisitionRender(_) => ErrorClass::AcquisitionRenderError,
            Self::RemoteValidationRejected { .. } => ErrorClass::RemoteValidationRejected,
            Self::RemoteTransient { .. } => ErrorClass::RemoteTransient,
            Self::MissingFieldMapping { .. } => ErrorClass::MissingFieldMapping,
            Self::SessionExpired { .. } => ErrorClass::SessionExpired,
            Self::RemoteProtocol { .. } => ErrorClass::RemoteProtocol,
            Self::ReferenceDataDrift { .. } => ErrorClass::ReferenceDataDrift,
            Self::InvalidRecord(_) => ErrorClass::InvalidRecord,
            Self::RegistryUnavailable(_) => ErrorClass::RegistryUnavailable,
            Self::AttemptTimeout { .. } => ErrorClass::AttemptTimeout,
            Self::AutomationFieldNotFound(_) => ErrorClass::AutomationFieldNotFound,
            Self::AutomationChallengeTimeout { .. } => ErrorClass::AutomationChallengeTimeout,
            Self::AutomationTimeout(_) => ErrorClass::AutomationTimeout,
            Self::AutomationRender(_) => ErrorClass::AutomationRenderError,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Storage(_) => ErrorClass::Storage,
        }
    }

    pub fn remediation(&self) -> Remediation {
        match self {
            Self::AcquisitionTimeout { .. }
            | Self::AcquisitionRender(_)
            | Self::RemoteTransient { .. }
            | Self::SessionExpired { .. }
            | Self::RemoteProtocol { .. }
            | Self::ReferenceDataDrift { .. }
            | Self::RegistryUnavailable(_)
            | Self::AttemptTimeout { .. } => Remediation::UseFallback,
            Self::RemoteValidationRejected { .. }
            | Self::MissingFieldMapping { .. }
            | Self::InvalidRecord(_) => Remediation::CorrectRecord,
            // The browser path already ran; only a later hybrid attempt is left.
            Self::AutomationFieldNotFound(_)
            | Self::AutomationChallengeTimeout { .. }
            | Self::AutomationTimeout(_)
            | Self::AutomationRender(_) => Remediation::RetryHybrid,
            Self::Cancelled | Self::Storage(_) => Remediation::Abort,
        }
    }

    /// True when the failure happened before any remote call could be issued.
    pub fn is_pre_remote(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionTimeout { .. }
                | Self::AcquisitionRender(_)
                | Self::MissingFieldMapping { .. }
                | Self::InvalidRecord(_)
                | Self::RegistryUnavailable(_)
        )
    }
}

impl From<RegistryError> for SubmissionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::MissingMapping { category, value } => {
                Self::MissingFieldMapping { category, value }
            }
            other => Self::RegistryUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_class_has_snake_case_name() {
        assert_eq!(
            ErrorClass::RemoteValidationRejected.to_string(),
            "remote_validation_rejected"
        );
        assert_eq!(ErrorClass::AcquisitionTimeout.to_string(), "acquisition_timeout");
    }

    #[test]
    fn test_validation_rejection_is_never_a_fallback_case() {
        let err = SubmissionError::RemoteValidationRejected {
            field: "passportNo".to_string(),
            reason: "format".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::RemoteValidationRejected);
        assert_eq!(err.remediation(), Remediation::CorrectRecord);
        assert!(err.to_string().contains("passportNo"));
    }

    #[test]
    fn test_acquisition_failures_recommend_fallback() {
        let timeout = SubmissionError::AcquisitionTimeout {
            attempts: 60,
            elapsed_ms: 30_000,
        };
        assert_eq!(timeout.remediation(), Remediation::UseFallback);
        assert!(timeout.is_pre_remote());

        let render = SubmissionError::AcquisitionRender("no chromium".to_string());
        assert_eq!(render.class(), ErrorClass::AcquisitionRenderError);
        assert_eq!(render.remediation(), Remediation::UseFallback);
    }

    #[test]
    fn test_unserializable_record_is_a_record_problem() {
        let err = SubmissionError::InvalidRecord("key must be a string".to_string());
        assert_eq!(err.class(), ErrorClass::InvalidRecord);
        assert_eq!(err.remediation(), Remediation::CorrectRecord);
        assert!(err.is_pre_remote());
    }

    #[test]
    fn test_registry_missing_mapping_converts() {
        let err: SubmissionError = RegistryError::MissingMapping {
            category: FieldCategory::Nationality,
            value: "XXX".to_string(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::MissingFieldMapping);
        assert_eq!(err.remediation(), Remediation::CorrectRecord);
        assert!(err.is_pre_remote());
    }

    #[test]
    fn test_automation_failures_never_point_back_to_fallback() {
        let errors = [
            SubmissionError::AutomationChallengeTimeout {
                attempts: 30,
                elapsed_ms: 15_000,
            },
            SubmissionError::AutomationTimeout(Duration::from_secs(60)),
            SubmissionError::AutomationFieldNotFound("Arrival date".to_string()),
            SubmissionError::AutomationRender("no display".to_string()),
        ];
        for err in errors {
            assert_eq!(err.remediation(), Remediation::RetryHybrid, "{err}");
            assert!(!err.is_pre_remote());
        }
        assert_eq!(
            ErrorClass::AutomationChallengeTimeout.to_string(),
            "automation_challenge_timeout"
        );
    }

    #[test]
    fn test_attempt_timeout_message() {
        let err = SubmissionError::AttemptTimeout {
            budget: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "attempt exceeded its 90000ms budget");
        assert_eq!(err.remediation(), Remediation::UseFallback);
    }
}
