//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, RenderContext, Renderer, SurfaceOptions};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. ARRIVAL_CARD_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("ARRIVAL_CARD_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.arrival-card/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".arrival-card/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".arrival-card/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".arrival-card/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".arrival-card/chromium/chrome-linux64/chrome"),
                home.join(".arrival-card/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
///
/// One browser process per renderer; every context is a separate CDP
/// browser context so cookies and storage never leak between attempts.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch Chromium with the given surface.
    pub async fn launch(surface: SurfaceOptions, executable: Option<PathBuf>) -> Result<Self> {
        surface.validate()?;

        let chrome_path = match executable {
            Some(path) => path,
            None => find_chromium().context("Chromium not found. Run `arrival-card doctor`.")?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(surface.width, surface.height)
            .viewport(Viewport {
                width: surface.width,
                height: surface.height,
                device_scale_factor: Some(surface.device_scale_factor),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-dev-shm-usage");

        builder = if surface.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        tracing::debug!(
            width = surface.width,
            height = surface.height,
            headless = surface.headless,
            "chromium launched"
        );

        Ok(Self {
            browser: Arc::new(browser),
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let context_id = self
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .context("failed to create browser context")?;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build target params: {e}"))?;

        let page = self
            .browser
            .new_page(target)
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            context_id,
            browser: Arc::clone(&self.browser),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // The browser process is killed when the last handle is dropped.
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// Chromium that only launches when the first context is requested.
///
/// Lets the CLI wire both paths up front without paying for a browser
/// process (or a visible window) that the attempt never needs.
pub struct LazyChromium {
    surface: SurfaceOptions,
    executable: Option<PathBuf>,
    inner: tokio::sync::OnceCell<ChromiumRenderer>,
}

impl LazyChromium {
    pub fn new(surface: SurfaceOptions, executable: Option<PathBuf>) -> Self {
        Self {
            surface,
            executable,
            inner: tokio::sync::OnceCell::new(),
        }
    }
}

#[async_trait]
impl Renderer for LazyChromium {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let renderer = self
            .inner
            .get_or_try_init(|| ChromiumRenderer::launch(self.surface, self.executable.clone()))
            .await?;
        renderer.new_context().await
    }

    async fn shutdown(&self) -> Result<()> {
        match self.inner.get() {
            Some(renderer) => renderer.shutdown().await,
            None => Ok(()),
        }
    }

    fn active_contexts(&self) -> usize {
        self.inner.get().map(|r| r.active_contexts()).unwrap_or(0)
    }
}

/// A single Chromium page inside its own browser context.
pub struct ChromiumContext {
    page: Page,
    context_id: BrowserContextId,
    browser: Arc<Browser>,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn add_init_script(&self, script: &str) -> Result<()> {
        self.page
            .evaluate_on_new_document(script.to_string())
            .await
            .context("failed to register init script")?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .unwrap_or_default();
        Ok(url)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        self.browser
            .dispose_browser_context(self.context_id)
            .await
            .context("failed to dispose browser context")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_renderer_starts_idle() {
        let lazy = LazyChromium::new(SurfaceOptions::hidden(), Some(PathBuf::from("/nonexistent/chrome")));
        assert_eq!(lazy.active_contexts(), 0);
        assert!(lazy.shutdown().await.is_ok());
        assert!(lazy.new_context().await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_init_script_runs_before_page_scripts() {
        let renderer = ChromiumRenderer::launch(SurfaceOptions::hidden(), None)
            .await
            .expect("failed to launch renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.add_init_script("window.__seenBeforeLoad = typeof document.body === 'object';")
            .await
            .expect("init script failed");

        ctx.navigate("data:text/html,<h1>Arrival</h1>", 10_000)
            .await
            .expect("navigation failed");

        let heading = ctx
            .execute_js("document.querySelector('h1').textContent")
            .await
            .expect("JS execution failed");
        assert_eq!(heading.as_str().unwrap(), "Arrival");

        let seen = ctx
            .execute_js("String(window.__seenBeforeLoad)")
            .await
            .expect("JS execution failed");
        assert_eq!(seen.as_str().unwrap(), "true");

        let width = ctx
            .execute_js("window.innerWidth")
            .await
            .expect("JS execution failed");
        assert!(width.as_u64().unwrap() > 0);

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);
    }
}
