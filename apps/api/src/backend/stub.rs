//! Instrumented in-memory backend for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BackendError, Connection, Launcher, Page};

#[derive(Default)]
pub struct StubCounters {
    pub launches: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub navigations: AtomicUsize,
    pub renders: AtomicUsize,
}

struct StubBehavior {
    payload: Vec<u8>,
    render_delay: Option<Duration>,
    navigation_delay: Option<Duration>,
    render_error: Option<String>,
    fail_navigation: AtomicBool,
    fail_launch: AtomicBool,
}

/// A backend whose pages return a fixed payload, optionally after a delay.
#[derive(Clone)]
pub struct StubBackend {
    pub counters: Arc<StubCounters>,
    behavior: Arc<StubBehavior>,
    scripts: Arc<Mutex<Vec<String>>>,
}

impl StubBackend {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            counters: Arc::new(StubCounters::default()),
            behavior: Arc::new(StubBehavior {
                payload,
                render_delay: None,
                navigation_delay: None,
                render_error: None,
                fail_navigation: AtomicBool::new(false),
                fail_launch: AtomicBool::new(false),
            }),
            scripts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        Arc::get_mut(&mut self.behavior)
            .expect("configure the stub before sharing it")
            .render_delay = Some(delay);
        self
    }

    /// Delays every blank navigation (warmup and health probes).
    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        Arc::get_mut(&mut self.behavior)
            .expect("configure the stub before sharing it")
            .navigation_delay = Some(delay);
        self
    }

    pub fn with_render_error(mut self, message: &str) -> Self {
        Arc::get_mut(&mut self.behavior)
            .expect("configure the stub before sharing it")
            .render_error = Some(message.to_string());
        self
    }

    /// Makes every blank navigation (warmup and health probes) fail.
    pub fn fail_navigation(&self, fail: bool) {
        self.behavior.fail_navigation.store(fail, Ordering::SeqCst);
    }

    pub fn fail_launch(&self, fail: bool) {
        self.behavior.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn launcher(&self) -> Arc<dyn Launcher> {
        Arc::new(self.clone())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }
}

#[async_trait]
impl Launcher for StubBackend {
    async fn launch(&self) -> Result<Arc<dyn Connection>, BackendError> {
        if self.behavior.fail_launch.load(Ordering::SeqCst) {
            return Err(BackendError::Launch("stub launch refused".to_string()));
        }
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubConnection {
            backend: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct StubConnection {
    backend: StubBackend,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for StubConnection {
    async fn open_page(&self) -> Result<Arc<dyn Page>, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        self.backend
            .counters
            .pages_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubPage {
            backend: self.backend.clone(),
            connection_closed: Arc::clone(&self.closed),
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend
                .counters
                .connections_closed
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct StubPage {
    backend: StubBackend,
    connection_closed: Arc<AtomicBool>,
}

impl StubPage {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.connection_closed.load(Ordering::SeqCst) {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }

    async fn capture(&self) -> Result<Vec<u8>, BackendError> {
        self.ensure_open()?;
        self.backend.counters.renders.fetch_add(1, Ordering::SeqCst);
        let behavior = &self.backend.behavior;
        if let Some(delay) = behavior.render_delay {
            tokio::time::sleep(delay).await;
        }
        match &behavior.render_error {
            Some(message) => Err(BackendError::Capture(message.clone())),
            None => Ok(behavior.payload.clone()),
        }
    }
}

#[async_trait]
impl Page for StubPage {
    async fn navigate_blank(&self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.backend
            .counters
            .navigations
            .fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.backend.behavior.navigation_delay {
            tokio::time::sleep(delay).await;
        }
        if self.backend.behavior.fail_navigation.load(Ordering::SeqCst) {
            return Err(BackendError::Navigation("stub navigation refused".to_string()));
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.backend.scripts.lock().push(script.to_string());
        Ok(())
    }

    async fn wait_ready(&self, _selector: &str) -> Result<(), BackendError> {
        self.ensure_open()
    }

    async fn wait_visible(&self, _selector: &str) -> Result<(), BackendError> {
        self.ensure_open()
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, BackendError> {
        self.capture().await
    }

    async fn print_pdf(&self) -> Result<Vec<u8>, BackendError> {
        self.capture().await
    }

    fn close(&self) {
        self.backend
            .counters
            .pages_closed
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// Lets spawned warmup probes run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
