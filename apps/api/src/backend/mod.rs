//! Rendering backend contracts the pool and renderer drive.
//!
//! A `Launcher` starts one process-wide `Connection` (a browser instance);
//! a `Connection` opens `Page`s (tabs). Everything above this module talks to
//! these traits only, so tests swap in `stub::StubBackend`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod chrome;
#[cfg(test)]
pub mod stub;

pub use chrome::ChromeLauncher;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser connection is closed")]
    Closed,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("wait for '{selector}' failed: {message}")]
    Wait { selector: String, message: String },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("browser task aborted: {0}")]
    Aborted(String),
}

/// Starts the external browser. Called once per backend generation.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Connection>, BackendError>;
}

/// A live browser instance able to spawn pages.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_page(&self) -> Result<Arc<dyn Page>, BackendError>;

    /// Tears the browser down. Pages opened from it stop working.
    fn close(&self);
}

/// One rendering context (a browser tab).
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate_blank(&self) -> Result<(), BackendError>;

    async fn evaluate(&self, script: &str) -> Result<(), BackendError>;

    /// Waits until an element matching `selector` exists.
    async fn wait_ready(&self, selector: &str) -> Result<(), BackendError>;

    /// Waits until an element matching `selector` exists and has a visible box.
    async fn wait_visible(&self, selector: &str) -> Result<(), BackendError>;

    async fn screenshot_png(&self) -> Result<Vec<u8>, BackendError>;

    async fn print_pdf(&self) -> Result<Vec<u8>, BackendError>;

    /// Best-effort close; never fails.
    fn close(&self);
}
