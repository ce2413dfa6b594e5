use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::backend::{BackendError, Page};

/// Outcome counts of the readiness probes run on freshly warmed sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub succeeded: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

/// Collects warmup probe results. Probes never fail the caller; they only
/// show up here and in the logs.
#[derive(Default)]
pub(super) struct WarmupStatus {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl WarmupStatus {
    pub(super) fn spawn_probe(self: &Arc<Self>, page: Arc<dyn Page>) {
        let status = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match page.navigate_blank().await {
                Ok(()) => page.wait_ready("body").await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    status.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Warmup navigation failed: {e}");
                    status.record_failure(&e);
                }
            }
        });
    }

    pub(super) fn record_failure(&self, error: &BackendError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
    }

    pub(super) fn report(&self) -> WarmupReport {
        WarmupReport {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}
