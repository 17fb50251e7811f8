//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). The challenge
//! acquisition engine and the fallback automation path both drive pages
//! through these traits, which lets tests substitute scripted contexts.

pub mod chromium;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Size and compositing of the rendering surface.
///
/// Challenge scripts look for a plausible on-screen window; a zero-size or
/// fully hidden surface can be scored as non-human and refused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceOptions {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    /// `false` opens a visible window (fallback path).
    pub headless: bool,
}

impl SurfaceOptions {
    /// Off-screen but fully composited surface for token acquisition.
    pub fn hidden() -> Self {
        Self {
            width: 1280,
            height: 800,
            device_scale_factor: 1.0,
            headless: true,
        }
    }

    /// Visible desktop-sized window for the automation path.
    pub fn visible() -> Self {
        Self {
            headless: false,
            ..Self::hidden()
        }
    }

    /// Refuse surfaces that a challenge would treat as non-human.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "rendering surface {}x{} is zero-sized",
                self.width,
                self.height
            );
        }
        if self.device_scale_factor <= 0.0 {
            bail!("device scale factor must be positive");
        }
        Ok(())
    }
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self::hidden()
    }
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browser context (own cookies and storage).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Register a script that runs in every new document before page scripts.
    async fn add_init_script(&self, script: &str) -> Result<()>;
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Quote a string as a JavaScript string literal.
///
/// Escapes everything that could break out of the literal:
/// - Backslashes, single/double quotes, backticks
/// - Newlines, carriage returns, tabs
/// - `<` and `>` (no `</script>` breakout)
/// - Null bytes are dropped
pub fn js_literal(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);
    result.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result.push('\'');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_sized_surface_rejected() {
        let surface = SurfaceOptions {
            width: 0,
            ..SurfaceOptions::hidden()
        };
        assert!(surface.validate().is_err());
        assert!(SurfaceOptions::hidden().validate().is_ok());
    }

    #[test]
    fn test_visible_surface_keeps_dimensions() {
        let visible = SurfaceOptions::visible();
        assert!(!visible.headless);
        assert_eq!(visible.width, SurfaceOptions::hidden().width);
    }

    #[test]
    fn test_js_literal_escapes() {
        assert_eq!(js_literal("hello"), "'hello'");
        assert_eq!(js_literal("it's"), "'it\\'s'");
        assert_eq!(js_literal("a\"b"), "'a\\\"b'");
        assert_eq!(js_literal("abc\0def"), "'abcdef'");
    }

    #[test]
    fn test_js_literal_blocks_script_breakout() {
        let quoted = js_literal("</script><script>alert(1)</script>");
        assert!(!quoted.contains("</script>"));
        assert!(quoted.contains("\\x3c/script\\x3e"));
    }
}
