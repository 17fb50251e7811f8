//! The nine-step registration protocol as an explicit state machine.
//!
//! Each state carries exactly the token issued by the step before it, so a
//! request can only ever be built from the immediately preceding response.
//! [`ProtocolState::advance`] is the pure transition function; the
//! orchestrator owns all I/O.

use serde::{Deserialize, Serialize};

use crate::acquisition::ChallengeToken;
use crate::error::SubmissionError;
use crate::record::ProofDocument;

/// One remote call of the protocol, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RegisterChallenge,
    OpenForm,
    RefreshReference,
    HealthCheck,
    SubmitRecord,
    RequestPreview,
    ConfirmPreview,
    FetchConfirmationCode,
    FetchProofDocument,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::RegisterChallenge,
        Step::OpenForm,
        Step::RefreshReference,
        Step::HealthCheck,
        Step::SubmitRecord,
        Step::RequestPreview,
        Step::ConfirmPreview,
        Step::FetchConfirmationCode,
        Step::FetchProofDocument,
    ];

    /// 1-based position in the protocol.
    pub fn number(self) -> u8 {
        match self {
            Self::RegisterChallenge => 1,
            Self::OpenForm => 2,
            Self::RefreshReference => 3,
            Self::HealthCheck => 4,
            Self::SubmitRecord => 5,
            Self::RequestPreview => 6,
            Self::ConfirmPreview => 7,
            Self::FetchConfirmationCode => 8,
            Self::FetchProofDocument => 9,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RegisterChallenge => "register_challenge",
            Self::OpenForm => "open_form",
            Self::RefreshReference => "refresh_reference",
            Self::HealthCheck => "health_check",
            Self::SubmitRecord => "submit_record",
            Self::RequestPreview => "request_preview",
            Self::ConfirmPreview => "confirm_preview",
            Self::FetchConfirmationCode => "fetch_confirmation_code",
            Self::FetchProofDocument => "fetch_proof_document",
        }
    }

    /// Default endpoint path, relative to the remote base URL.
    pub fn default_path(self) -> &'static str {
        match self {
            Self::RegisterChallenge => "/api/v1/challenge/verify",
            Self::OpenForm => "/api/v1/form/open",
            Self::RefreshReference => "/api/v1/reference/version",
            Self::HealthCheck => "/api/v1/form/check",
            Self::SubmitRecord => "/api/v1/form/submit",
            Self::RequestPreview => "/api/v1/form/preview",
            Self::ConfirmPreview => "/api/v1/form/confirm",
            Self::FetchConfirmationCode => "/api/v1/result/code",
            Self::FetchProofDocument => "/api/v1/result/proof",
        }
    }

    /// Field of the success `data` object that holds this step's output.
    ///
    /// `None` for the proof step, which answers with the raw document.
    pub fn output_field(self) -> Option<&'static str> {
        match self {
            Self::RegisterChallenge => Some("sessionToken"),
            Self::OpenForm => Some("formToken"),
            Self::RefreshReference => Some("formToken"),
            Self::HealthCheck => Some("checkToken"),
            Self::SubmitRecord => Some("submitToken"),
            Self::RequestPreview => Some("previewToken"),
            Self::ConfirmPreview => Some("confirmToken"),
            Self::FetchConfirmationCode => Some("confirmationCode"),
            Self::FetchProofDocument => None,
        }
    }

    /// Field of the request body that carries the previous step's token.
    pub fn input_field(self) -> &'static str {
        match self {
            Self::RegisterChallenge => "challengeToken",
            Self::OpenForm => "sessionToken",
            Self::RefreshReference | Self::HealthCheck => "formToken",
            Self::SubmitRecord => "checkToken",
            Self::RequestPreview => "submitToken",
            Self::ConfirmPreview => "previewToken",
            Self::FetchConfirmationCode | Self::FetchProofDocument => "confirmToken",
        }
    }

    /// Whether presenting the input token uses it up.
    ///
    /// The reference lookup only reads with the form token, and the
    /// confirmation token is long-lived across the two result fetches.
    pub fn spends_input(self) -> bool {
        !matches!(
            self,
            Self::RefreshReference | Self::FetchConfirmationCode | Self::FetchProofDocument
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} ({})", self.number(), self.name())
    }
}

/// What a successful remote call produced.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The next token in the chain.
    Token(String),
    /// Step 3: the remote's taxonomy version plus the re-issued form token.
    Reference { version: String, form_token: String },
    /// Step 8: the human-facing code.
    ConfirmationCode(String),
    /// Step 9: the proof document.
    Proof(ProofDocument),
}

/// Where an attempt currently stands.
#[derive(Debug, Clone)]
pub enum ProtocolState {
    RegisterChallenge { challenge: ChallengeToken },
    OpenForm { session_token: String },
    RefreshReference { form_token: String },
    HealthCheck { form_token: String },
    SubmitRecord { check_token: String },
    RequestPreview { submit_token: String },
    ConfirmPreview { preview_token: String },
    FetchConfirmationCode { confirm_token: String },
    FetchProofDocument {
        confirm_token: String,
        confirmation_code: String,
    },
    Completed {
        confirmation_code: String,
        proof: ProofDocument,
    },
}

impl ProtocolState {
    pub fn start(challenge: ChallengeToken) -> Self {
        Self::RegisterChallenge { challenge }
    }

    /// The step this state is waiting to send, or `None` once completed.
    pub fn step(&self) -> Option<Step> {
        Some(match self {
            Self::RegisterChallenge { .. } => Step::RegisterChallenge,
            Self::OpenForm { .. } => Step::OpenForm,
            Self::RefreshReference { .. } => Step::RefreshReference,
            Self::HealthCheck { .. } => Step::HealthCheck,
            Self::SubmitRecord { .. } => Step::SubmitRecord,
            Self::RequestPreview { .. } => Step::RequestPreview,
            Self::ConfirmPreview { .. } => Step::ConfirmPreview,
            Self::FetchConfirmationCode { .. } => Step::FetchConfirmationCode,
            Self::FetchProofDocument { .. } => Step::FetchProofDocument,
            Self::Completed { .. } => return None,
        })
    }

    /// The single token the pending request may present.
    pub fn input_token(&self) -> Option<&str> {
        match self {
            Self::RegisterChallenge { challenge } => Some(challenge.as_str()),
            Self::OpenForm { session_token } => Some(session_token),
            Self::RefreshReference { form_token } | Self::HealthCheck { form_token } => {
                Some(form_token)
            }
            Self::SubmitRecord { check_token } => Some(check_token),
            Self::RequestPreview { submit_token } => Some(submit_token),
            Self::ConfirmPreview { preview_token } => Some(preview_token),
            Self::FetchConfirmationCode { confirm_token }
            | Self::FetchProofDocument { confirm_token, .. } => Some(confirm_token),
            Self::Completed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Skip the optional reference refresh, handing step 2's token to step 4.
    pub fn skip_reference_refresh(self) -> Self {
        match self {
            Self::RefreshReference { form_token } => Self::HealthCheck { form_token },
            other => other,
        }
    }

    /// Apply one step's outcome.
    ///
    /// Fails with `RemoteProtocol` when the outcome does not belong to the
    /// pending step or carries an empty value.
    pub fn advance(self, outcome: StepOutcome) -> Result<Self, SubmissionError> {
        let step = match self.step() {
            Some(step) => step,
            None => {
                return Err(SubmissionError::RemoteProtocol {
                    step: Step::FetchProofDocument,
                    detail: "protocol already completed".to_string(),
                })
            }
        };

        let next = match (self, outcome) {
            (Self::RegisterChallenge { .. }, StepOutcome::Token(t)) => Self::OpenForm {
                session_token: non_empty(step, t)?,
            },
            (Self::OpenForm { .. }, StepOutcome::Token(t)) => Self::RefreshReference {
                form_token: non_empty(step, t)?,
            },
            (Self::RefreshReference { .. }, StepOutcome::Reference { form_token, .. }) => {
                Self::HealthCheck {
                    form_token: non_empty(step, form_token)?,
                }
            }
            (Self::HealthCheck { .. }, StepOutcome::Token(t)) => Self::SubmitRecord {
                check_token: non_empty(step, t)?,
            },
            (Self::SubmitRecord { .. }, StepOutcome::Token(t)) => Self::RequestPreview {
                submit_token: non_empty(step, t)?,
            },
            (Self::RequestPreview { .. }, StepOutcome::Token(t)) => Self::ConfirmPreview {
                preview_token: non_empty(step, t)?,
            },
            (Self::ConfirmPreview { .. }, StepOutcome::Token(t)) => Self::FetchConfirmationCode {
                confirm_token: non_empty(step, t)?,
            },
            (Self::FetchConfirmationCode { confirm_token }, StepOutcome::ConfirmationCode(code)) => {
                Self::FetchProofDocument {
                    confirm_token,
                    confirmation_code: non_empty(step, code)?,
                }
            }
            (
                Self::FetchProofDocument {
                    confirmation_code, ..
                },
                StepOutcome::Proof(proof),
            ) => {
                if proof.is_empty() {
                    return Err(SubmissionError::RemoteProtocol {
                        step,
                        detail: "empty proof document".to_string(),
                    });
                }
                Self::Completed {
                    confirmation_code,
                    proof,
                }
            }
            (_, outcome) => {
                return Err(SubmissionError::RemoteProtocol {
                    step,
                    detail: format!("outcome {outcome:?} does not belong to this step"),
                })
            }
        };
        Ok(next)
    }
}

fn non_empty(step: Step, value: String) -> Result<String, SubmissionError> {
    if value.trim().is_empty() {
        return Err(SubmissionError::RemoteProtocol {
            step,
            detail: format!("empty {}", step.output_field().unwrap_or("value")),
        });
    }
    Ok(value)
}
