//! Headless Chrome driver built on `headless_chrome`.
//!
//! The driver API is synchronous, so every call runs on tokio's blocking
//! pool. A timed-out render drops its join handle but the blocking call
//! itself runs to completion in the background.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use headless_chrome::protocol::cdp::Page::{self as Cdp, CaptureScreenshotFormatOption};
use headless_chrome::protocol::cdp::DOM::Rect;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BackendError, Connection, Launcher, Page};

const WINDOW_SIZE: (u32, u32) = (1280, 1024);
/// Chrome is considered gone after this long without protocol traffic.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const VISIBLE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const VISIBLE_WAIT_LIMIT: Duration = Duration::from_secs(45);

const CHROME_FLAGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-web-security",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
    "--disable-backgrounding-occluded-windows",
    "--disable-features=TranslateUI,VizDisplayCompositor",
    "--memory-pressure-off",
];

/// Launches a local headless Chrome/Chromium.
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(chrome_path: Option<PathBuf>) -> Self {
        Self { chrome_path }
    }
}

fn launch_options(chrome_path: Option<PathBuf>) -> Result<LaunchOptions<'static>, BackendError> {
    LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .window_size(Some(WINDOW_SIZE))
        .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
        .path(chrome_path)
        .args(CHROME_FLAGS.iter().map(OsStr::new).collect())
        .build()
        .map_err(|e| BackendError::Launch(e.to_string()))
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Connection>, BackendError> {
        let chrome_path = self.chrome_path.clone();
        let browser = tokio::task::spawn_blocking(move || {
            let options = launch_options(chrome_path)?;
            Browser::new(options).map_err(|e| BackendError::Launch(e.to_string()))
        })
        .await
        .map_err(|e| BackendError::Aborted(e.to_string()))??;

        info!("Chrome launched");
        Ok(Arc::new(ChromeConnection {
            browser: Mutex::new(Some(browser)),
        }))
    }
}

/// Runs `op` off the async workers when a runtime is available.
fn off_runtime<F>(op: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(op);
        }
        Err(_) => op(),
    }
}

pub struct ChromeConnection {
    browser: Mutex<Option<Browser>>,
}

#[async_trait]
impl Connection for ChromeConnection {
    async fn open_page(&self) -> Result<Arc<dyn Page>, BackendError> {
        let browser = self.browser.lock().clone().ok_or(BackendError::Closed)?;
        let tab = tokio::task::spawn_blocking(move || browser.new_tab())
            .await
            .map_err(|e| BackendError::Aborted(e.to_string()))?
            .map_err(|e| BackendError::Launch(e.to_string()))?;
        Ok(Arc::new(ChromePage { tab }))
    }

    fn close(&self) {
        if let Some(browser) = self.browser.lock().take() {
            info!("Shutting down Chrome");
            // Dropping the last handle kills the browser process.
            off_runtime(move || drop(browser));
        }
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Tab) -> Result<T, BackendError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| BackendError::Aborted(e.to_string()))?
    }
}

fn wait_error(selector: &str, message: impl ToString) -> BackendError {
    BackendError::Wait {
        selector: selector.to_string(),
        message: message.to_string(),
    }
}

fn visibility_script(selector: &str) -> String {
    let selector = serde_json::Value::String(selector.to_string());
    format!(
        "(() => {{ const el = document.querySelector({selector}); if (!el) return false; \
         const style = window.getComputedStyle(el); const rect = el.getBoundingClientRect(); \
         return style.visibility !== 'hidden' && style.display !== 'none' \
         && (rect.width > 0 || rect.height > 0); }})()"
    )
}

/// Clip covering the whole scrollable document in CSS pixels.
fn full_page_clip(content: &Rect) -> Cdp::Viewport {
    Cdp::Viewport {
        x: 0.0,
        y: 0.0,
        width: content.width.ceil().max(1.0),
        height: content.height.ceil().max(1.0),
        scale: 1.0,
    }
}

fn capture_error(e: impl ToString) -> BackendError {
    BackendError::Capture(e.to_string())
}

fn capture_full_page(tab: &Tab) -> Result<Vec<u8>, BackendError> {
    let metrics = tab
        .call_method(Cdp::GetLayoutMetrics(None))
        .map_err(capture_error)?;
    let data = tab
        .call_method(Cdp::CaptureScreenshot {
            format: Some(CaptureScreenshotFormatOption::Png),
            quality: None,
            clip: Some(full_page_clip(&metrics.css_content_size)),
            from_surface: Some(true),
            capture_beyond_viewport: Some(true),
            optimize_for_speed: None,
        })
        .map_err(capture_error)?
        .data;
    STANDARD.decode(data).map_err(capture_error)
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate_blank(&self) -> Result<(), BackendError> {
        self.blocking(|tab| {
            tab.navigate_to("about:blank")
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| BackendError::Navigation(e.to_string()))
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<(), BackendError> {
        let script = script.to_string();
        self.blocking(move |tab| {
            tab.evaluate(&script, false)
                .map(|_| ())
                .map_err(|e| BackendError::Script(e.to_string()))
        })
        .await
    }

    async fn wait_ready(&self, selector: &str) -> Result<(), BackendError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element(&selector)
                .map(|_| ())
                .map_err(|e| wait_error(&selector, e))
        })
        .await
    }

    async fn wait_visible(&self, selector: &str) -> Result<(), BackendError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element(&selector)
                .map_err(|e| wait_error(&selector, e))?;
            let script = visibility_script(&selector);
            let started = std::time::Instant::now();
            loop {
                let visible = tab
                    .evaluate(&script, false)
                    .map_err(|e| wait_error(&selector, e))?
                    .value;
                if visible == Some(serde_json::Value::Bool(true)) {
                    return Ok(());
                }
                if started.elapsed() >= VISIBLE_WAIT_LIMIT {
                    return Err(wait_error(&selector, "element never became visible"));
                }
                std::thread::sleep(VISIBLE_POLL_INTERVAL);
            }
        })
        .await
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, BackendError> {
        self.blocking(capture_full_page).await
    }

    async fn print_pdf(&self) -> Result<Vec<u8>, BackendError> {
        self.blocking(|tab| {
            tab.print_to_pdf(None).map_err(capture_error)
        })
        .await
    }

    fn close(&self) {
        let tab = Arc::clone(&self.tab);
        off_runtime(move || {
            if let Err(e) = tab.close(false) {
                debug!("Tab close failed: {e}");
            }
        });
    }
}
