//! Per-attempt session correlation.
//!
//! A session is created when an attempt starts and dropped at its terminal
//! state. It owns the submit id and the chain of tokens issued so far.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SubmissionError;
use crate::protocol::state::Step;

const SUBMIT_ID_PREFIX: &str = "ACS-";

/// Client-generated correlation id, constant across one attempt's steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmitId(String);

impl SubmitId {
    /// Fresh id: fixed prefix plus 128 random bits.
    pub fn generate() -> Self {
        Self(format!("{SUBMIT_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session state for one attempt.
pub struct SessionContext {
    submit_id: SubmitId,
    created_at: Instant,
    last_step_at: Instant,
    max_step_gap: Duration,
    /// Tokens issued so far, in step order.
    issued: Vec<(Step, String)>,
    /// Tokens already presented to the remote.
    consumed: HashSet<String>,
}

impl SessionContext {
    pub fn new(max_step_gap: Duration) -> Self {
        let now = Instant::now();
        Self {
            submit_id: SubmitId::generate(),
            created_at: now,
            last_step_at: now,
            max_step_gap,
            issued: Vec::new(),
            consumed: HashSet::new(),
        }
    }

    pub fn submit_id(&self) -> &SubmitId {
        &self.submit_id
    }

    /// Fail before `step` is sent if the remote will already have dropped us.
    pub fn ensure_alive(&self, step: Step) -> Result<(), SubmissionError> {
        let gap = self.last_step_at.elapsed();
        if gap > self.max_step_gap {
            return Err(SubmissionError::SessionExpired {
                step,
                reason: format!(
                    "{}ms since last step exceeds {}ms",
                    gap.as_millis(),
                    self.max_step_gap.as_millis()
                ),
            });
        }
        Ok(())
    }

    /// Mark `token` as presented for `step`. A token is only ever valid once.
    pub fn consume(&mut self, step: Step, token: &str) -> Result<(), SubmissionError> {
        if !self.consumed.insert(token.to_string()) {
            return Err(SubmissionError::SessionExpired {
                step,
                reason: "token already presented".to_string(),
            });
        }
        Ok(())
    }

    /// Record the output of a successful step.
    pub fn record_issued(&mut self, step: Step, token: impl Into<String>) {
        self.issued.push((step, token.into()));
        self.last_step_at = Instant::now();
    }

    /// Steps that completed, in order.
    pub fn completed_steps(&self) -> Vec<Step> {
        self.issued.iter().map(|(step, _)| *step).collect()
    }

    pub fn last_issued(&self) -> Option<&str> {
        self.issued.last().map(|(_, token)| token.as_str())
    }

    /// How long the session has been alive.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
