//! Backend health monitor.
//!
//! `is_healthy` is debounced: a probe result is reused for `debounce`, and a
//! fresh probe runs a single blank navigation on a pooled page under a short
//! timeout. `should_check` decides whether a conversion bothers asking at all.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::BackendError;
use crate::pool::{PoolError, SessionPool};

#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    /// How long a probe result is reused.
    pub debounce: Duration,
    /// Age after which a healthy backend is probed again.
    pub recheck_after: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(30),
            recheck_after: Duration::from_secs(5 * 60),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("probe navigation failed: {0}")]
    Navigation(#[from] BackendError),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Default)]
struct ProbeRecord {
    last_check: Option<Instant>,
    healthy: bool,
}

pub struct HealthMonitor {
    pool: Arc<SessionPool>,
    settings: HealthSettings,
    record: RwLock<ProbeRecord>,
    consecutive_errors: AtomicU32,
}

impl HealthMonitor {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self::with_settings(pool, HealthSettings::default())
    }

    pub fn with_settings(pool: Arc<SessionPool>, settings: HealthSettings) -> Self {
        Self {
            pool,
            settings,
            record: RwLock::new(ProbeRecord::default()),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    fn is_fresh(&self, record: &ProbeRecord) -> bool {
        record
            .last_check
            .is_some_and(|at| at.elapsed() < self.settings.debounce)
    }

    /// Debounced liveness check.
    pub async fn is_healthy(&self) -> bool {
        {
            let record = self.record.read().await;
            if self.is_fresh(&record) {
                return record.healthy;
            }
        }

        let mut record = self.record.write().await;
        // Another caller may have probed while we waited for the write lock.
        if self.is_fresh(&record) {
            return record.healthy;
        }

        let outcome = self.probe().await;
        record.last_check = Some(Instant::now());
        record.healthy = outcome.is_ok();
        match outcome {
            Ok(()) => {
                self.record_success();
                debug!("Health check passed");
            }
            Err(e) => {
                self.record_failure();
                warn!("Health check failed: {e}");
            }
        }
        record.healthy
    }

    async fn probe(&self) -> Result<(), HealthError> {
        let lease = self.pool.acquire().await?;
        let result = tokio::time::timeout(self.settings.probe_timeout, lease.page().navigate_blank())
            .await
            .map_err(|_| HealthError::Timeout(self.settings.probe_timeout))?;
        lease.release();
        Ok(result?)
    }

    /// True when a probe is due: recent failures, no probe yet, or the last
    /// probe is older than `recheck_after`.
    pub async fn should_check(&self) -> bool {
        if self.consecutive_errors() > 0 {
            return true;
        }
        let record = self.record.read().await;
        match record.last_check {
            None => true,
            Some(at) => at.elapsed() >= self.settings.recheck_after,
        }
    }

    pub fn record_failure(&self) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Forgets the last probe and the failure streak.
    pub async fn reset(&self) {
        let mut record = self.record.write().await;
        record.last_check = None;
        record.healthy = false;
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }
}
