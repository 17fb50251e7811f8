//! HTTP layer for the registration protocol.
//!
//! One client per attempt: its cookie jar and `X-Submit-Id` header belong to
//! that attempt alone. The client sends exactly one request per call and
//! classifies the answer; retry policy lives in the orchestrator.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::acquisition::millis;
use crate::error::SubmissionError;
use crate::protocol::session::SubmitId;
use crate::protocol::state::Step;

/// Remote endpoint and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Scheme, host and optional path prefix of the registration service.
    pub base_url: String,
    /// Page that hosts the challenge widget, relative to `base_url`.
    pub challenge_path: String,
    pub user_agent: String,
    /// Per-request timeout.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Extra sends after the first transient failure of a step.
    pub transient_retries: u32,
    /// Pause between two sends of the same step.
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    /// Longest tolerated pause between two steps of one session.
    #[serde(rename = "max_step_gap_ms", with = "millis")]
    pub max_step_gap: Duration,
    /// Per-step endpoint overrides.
    pub paths: BTreeMap<Step, String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://arrival.example.gov".to_string(),
            challenge_path: "/arrival/challenge".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            request_timeout: Duration::from_secs(15),
            transient_retries: 2,
            retry_delay: Duration::ZERO,
            max_step_gap: Duration::from_secs(120),
            paths: BTreeMap::new(),
        }
    }
}

impl RemoteSettings {
    pub fn endpoint(&self, step: Step) -> String {
        let path = self
            .paths
            .get(&step)
            .map(String::as_str)
            .unwrap_or_else(|| step.default_path());
        join_url(&self.base_url, path)
    }

    pub fn challenge_url(&self) -> String {
        join_url(&self.base_url, &self.challenge_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Standard response envelope for steps 1-8.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// What one successful send returned.
#[derive(Debug)]
pub enum StepReply {
    /// The `data` object of an `OK` envelope.
    Data(Map<String, Value>),
    /// The raw body of the proof step.
    Document(Vec<u8>),
}

/// Why one send failed.
#[derive(Debug)]
pub enum CallFailure {
    /// 5xx, 429, or the network; the same request may succeed if repeated.
    Transient(String),
    /// Already classified; never repeated.
    Fatal(SubmissionError),
}

/// Per-attempt HTTP client.
pub struct ProtocolClient {
    client: reqwest::Client,
    settings: RemoteSettings,
}

impl ProtocolClient {
    pub fn new(settings: &RemoteSettings, submit_id: &SubmitId) -> Result<Self, SubmissionError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let id = HeaderValue::from_str(submit_id.as_str()).map_err(|e| {
            SubmissionError::RemoteProtocol {
                step: Step::RegisterChallenge,
                detail: format!("invalid submit id header: {e}"),
            }
        })?;
        headers.insert("x-submit-id", id);

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| SubmissionError::RemoteProtocol {
                step: Step::RegisterChallenge,
                detail: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    /// Send one request for `step` and classify the answer.
    pub async fn send_once(&self, step: Step, body: &Value) -> Result<StepReply, CallFailure> {
        let url = self.settings.endpoint(step);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CallFailure::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallFailure::Transient(format!("HTTP {}", status.as_u16())));
        }

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallFailure::Transient(format!("body read failed: {e}")))?;

        if step.output_field().is_none() && status.is_success() && !is_json {
            return Ok(StepReply::Document(bytes.to_vec()));
        }

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|_| {
            CallFailure::Fatal(SubmissionError::RemoteProtocol {
                step,
                detail: format!("HTTP {} with unparseable body", status.as_u16()),
            })
        })?;

        classify(step, envelope).map_err(CallFailure::Fatal)
    }
}

fn classify(step: Step, envelope: Envelope) -> Result<StepReply, SubmissionError> {
    match envelope.code.as_str() {
        "OK" => {
            if step.output_field().is_none() {
                return Err(SubmissionError::RemoteProtocol {
                    step,
                    detail: "expected a document body, got an envelope".to_string(),
                });
            }
            match envelope.data {
                Value::Object(map) => Ok(StepReply::Data(map)),
                Value::Null => Ok(StepReply::Data(Map::new())),
                other => Err(SubmissionError::RemoteProtocol {
                    step,
                    detail: format!("data is not an object: {other}"),
                }),
            }
        }
        "FIELD_INVALID" => {
            let field = envelope
                .data
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let reason = envelope
                .data
                .get("reason")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or(envelope.message);
            Err(SubmissionError::RemoteValidationRejected { field, reason })
        }
        "SESSION_EXPIRED" | "TOKEN_INVALID" => Err(SubmissionError::SessionExpired {
            step,
            reason: format!("{}: {}", envelope.code, envelope.message),
        }),
        code => Err(SubmissionError::RemoteProtocol {
            step,
            detail: format!("{code}: {}", envelope.message),
        }),
    }
}

/// Pull a required non-empty string out of a success `data` object.
pub fn required_str(step: Step, data: &Map<String, Value>, field: &str) -> Result<String, SubmissionError> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| SubmissionError::RemoteProtocol {
            step,
            detail: format!("response is missing `{field}`"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ok_envelope_yields_data() {
        let reply = classify(
            Step::OpenForm,
            envelope(json!({"code": "OK", "message": "", "data": {"formToken": "f-1"}})),
        )
        .unwrap();
        match reply {
            StepReply::Data(map) => {
                assert_eq!(required_str(Step::OpenForm, &map, "formToken").unwrap(), "f-1")
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_field_invalid_names_field() {
        let err = classify(
            Step::SubmitRecord,
            envelope(json!({
                "code": "FIELD_INVALID",
                "message": "validation failed",
                "data": {"field": "passportNo", "reason": "format"}
            })),
        )
        .unwrap_err();
        match err {
            SubmissionError::RemoteValidationRejected { field, reason } => {
                assert_eq!(field, "passportNo");
                assert_eq!(reason, "format");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_session_codes_map_to_expiry() {
        for code in ["SESSION_EXPIRED", "TOKEN_INVALID"] {
            let err = classify(
                Step::RequestPreview,
                envelope(json!({"code": code, "message": "gone"})),
            )
            .unwrap_err();
            assert!(matches!(err, SubmissionError::SessionExpired { .. }));
        }
    }

    #[test]
    fn test_unknown_code_is_protocol_error() {
        let err = classify(
            Step::HealthCheck,
            envelope(json!({"code": "MAINTENANCE", "message": "closed"})),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MAINTENANCE"));
    }

    #[test]
    fn test_missing_token_field_is_protocol_error() {
        let err = required_str(Step::HealthCheck, &Map::new(), "checkToken").unwrap_err();
        assert!(matches!(err, SubmissionError::RemoteProtocol { .. }));
    }

    #[test]
    fn test_endpoint_override_and_join() {
        let mut settings = RemoteSettings {
            base_url: "http://127.0.0.1:9000/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.endpoint(Step::HealthCheck),
            "http://127.0.0.1:9000/api/v1/form/check"
        );
        settings
            .paths
            .insert(Step::HealthCheck, "/v2/check".to_string());
        assert_eq!(
            settings.endpoint(Step::HealthCheck),
            "http://127.0.0.1:9000/v2/check"
        );
    }
}
