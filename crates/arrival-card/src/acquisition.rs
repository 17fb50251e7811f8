//! Challenge token acquisition through a hidden rendering context.
//!
//! The engine opens one isolated browser context per call, registers a probe
//! before the page's own scripts run, loads the challenge page, runs the probe
//! again after load, then polls a single slot on a fixed interval until a
//! completion token shows up or the budget runs out. It never retries a
//! failed acquisition itself; that decision belongs to the strategy layer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use crate::cancel::CancelSignal;
use crate::error::SubmissionError;
use crate::events::{EventBus, SubmissionEvent};
use crate::renderer::{js_literal, RenderContext, Renderer};

/// One-time completion token produced by the challenge widget.
///
/// Short-lived and single-use; never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeToken(String);

impl ChallengeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ChallengeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChallengeToken(<redacted, {} chars>)", self.0.len())
    }
}

/// Polling and page-inspection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Delay between two reads of the token slot.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Hard cap on the number of reads.
    pub max_attempts: u32,
    /// Upper bound for the initial page load.
    #[serde(rename = "navigation_timeout_ms", with = "millis")]
    pub navigation_timeout: Duration,
    /// Global under which the challenge widget registers itself.
    pub widget_global: String,
    /// Hidden inputs the widget writes its response into.
    pub token_selectors: Vec<String>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 60,
            navigation_timeout: Duration::from_secs(20),
            widget_global: "turnstile".to_string(),
            token_selectors: vec![
                "input[name=\"cf-turnstile-response\"]".to_string(),
                "input[name$=\"captcha-response\"]".to_string(),
                "input[name=\"challenge-token\"]".to_string(),
            ],
        }
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Script registered before any page script runs, and executed once more
/// after load. Hooks the widget's `render` callback and listens for posted
/// messages; the first non-empty token lands in `window.__arrivalChallengeToken`.
pub fn probe_script(settings: &AcquisitionSettings) -> String {
    let widget = js_literal(&settings.widget_global);
    format!(
        r#"(function() {{
  if (typeof window.__arrivalChallengeToken !== 'string') {{
    window.__arrivalChallengeToken = '';
  }}
  if (window.__arrivalProbeInstalled) {{ return true; }}
  window.__arrivalProbeInstalled = true;
  var store = function(t) {{
    if (typeof t === 'string' && t.length > 0 && window.__arrivalChallengeToken === '') {{
      window.__arrivalChallengeToken = t;
    }}
  }};
  var hook = function(w) {{
    if (!w || w.__arrivalHooked || typeof w.render !== 'function') {{ return; }}
    var render = w.render;
    w.render = function(el, opts) {{
      if (opts && typeof opts.callback === 'function') {{
        var cb = opts.callback;
        opts.callback = function(t) {{ store(t); return cb.apply(this, arguments); }};
      }} else if (opts) {{
        opts.callback = store;
      }}
      return render.apply(this, arguments);
    }};
    w.__arrivalHooked = true;
  }};
  var name = {widget};
  var current = window[name];
  hook(current);
  try {{
    Object.defineProperty(window, name, {{
      configurable: true,
      get: function() {{ return current; }},
      set: function(v) {{ current = v; hook(v); }}
    }});
  }} catch (e) {{}}
  window.addEventListener('message', function(ev) {{
    var d = ev.data;
    if (d && typeof d === 'object') {{ store(d.token || d.response || ''); }}
  }});
  return true;
}})()"#
    )
}

/// Poll script: returns the token, or an empty string when none is ready yet.
pub fn read_script(settings: &AcquisitionSettings) -> String {
    let widget = js_literal(&settings.widget_global);
    let selectors = settings
        .token_selectors
        .iter()
        .map(|s| js_literal(s))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"(function() {{
  var t = window.__arrivalChallengeToken;
  if (typeof t === 'string' && t.length > 0) {{ return t; }}
  var w = window[{widget}];
  try {{
    if (w && typeof w.getResponse === 'function') {{
      var r = w.getResponse();
      if (typeof r === 'string' && r.length > 0) {{ return r; }}
    }}
  }} catch (e) {{}}
  var selectors = [{selectors}];
  for (var i = 0; i < selectors.length; i++) {{
    var el = document.querySelector(selectors[i]);
    if (el && typeof el.value === 'string' && el.value.length > 0) {{ return el.value; }}
  }}
  return '';
}})()"#
    )
}

/// Drives a hidden page until the challenge widget yields a token.
pub struct TokenAcquisitionEngine {
    renderer: Arc<dyn Renderer>,
    settings: AcquisitionSettings,
    events: EventBus,
}

impl TokenAcquisitionEngine {
    pub fn new(renderer: Arc<dyn Renderer>, settings: AcquisitionSettings, events: EventBus) -> Self {
        Self {
            renderer,
            settings,
            events,
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Acquire one completion token from `target_url` within `budget`.
    ///
    /// The rendering context is closed on every exit path.
    pub async fn acquire(
        &self,
        target_url: &str,
        budget: Duration,
        cancel: &CancelSignal,
    ) -> Result<ChallengeToken, SubmissionError> {
        if cancel.is_cancelled() {
            return Err(SubmissionError::Cancelled);
        }

        self.events.emit(SubmissionEvent::AcquisitionStarted {
            target: target_url.to_string(),
        });
        tracing::info!(url = target_url, budget_ms = budget.as_millis() as u64, "acquiring challenge token");

        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| SubmissionError::AcquisitionRender(format!("{e:#}")))?;

        let result = self.run(ctx.as_mut(), target_url, budget, cancel).await;

        if let Err(e) = ctx.close().await {
            tracing::debug!(error = %e, "challenge context close failed");
        }
        result
    }

    async fn run(
        &self,
        ctx: &mut dyn RenderContext,
        target_url: &str,
        budget: Duration,
        cancel: &CancelSignal,
    ) -> Result<ChallengeToken, SubmissionError> {
        let start = Instant::now();
        let deadline = start + budget;
        let probe = probe_script(&self.settings);

        ctx.add_init_script(&probe)
            .await
            .map_err(|e| SubmissionError::AcquisitionRender(format!("{e:#}")))?;

        let nav_timeout = self.settings.navigation_timeout.min(budget);
        let navigation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
            nav = tokio::time::timeout_at(deadline, ctx.navigate(target_url, nav_timeout.as_millis() as u64)) => nav,
        };
        match navigation {
            Ok(Ok(nav)) => {
                tracing::debug!(load_ms = nav.load_time_ms, "challenge page loaded");
            }
            Ok(Err(e)) => return Err(SubmissionError::AcquisitionRender(format!("{e:#}"))),
            Err(_) => {
                return Err(SubmissionError::AcquisitionTimeout {
                    attempts: 0,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }

        // Late-bound widgets miss the init hook; install again on the live page.
        if let Err(e) = ctx.execute_js(&probe).await {
            tracing::debug!(error = %e, "post-load probe failed");
        }

        let read = read_script(&self.settings);
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u32;

        while polls < self.settings.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {}
            }
            polls += 1;

            let value = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                value = tokio::time::timeout_at(deadline, ctx.execute_js(&read)) => value,
            };

            match value {
                Err(_) => break,
                Ok(Ok(value)) => {
                    if let Some(token) = value.as_str().filter(|t| !t.is_empty()) {
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        self.events.emit(SubmissionEvent::TokenAcquired { polls, elapsed_ms });
                        tracing::info!(polls, elapsed_ms, "challenge token acquired");
                        return Ok(ChallengeToken::new(token));
                    }
                }
                Ok(Err(e)) => {
                    // Pages mid-redirect reject evaluation; treat as an empty read.
                    tracing::debug!(poll = polls, error = %e, "token read failed");
                }
            }

            self.events.emit(SubmissionEvent::AcquisitionPolled {
                poll: polls,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::warn!(polls, elapsed_ms, "challenge token never appeared");
        Err(SubmissionError::AcquisitionTimeout {
            attempts: polls,
            elapsed_ms,
        })
    }
}
