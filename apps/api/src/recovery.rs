use std::sync::Arc;

use tracing::{error, info};

use crate::monitor::HealthMonitor;
use crate::pool::SessionPool;

/// Full teardown and rebuild of the rendering backend after a failed probe.
pub struct Recovery {
    pool: Arc<SessionPool>,
    health: Arc<HealthMonitor>,
}

impl Recovery {
    pub fn new(pool: Arc<SessionPool>, health: Arc<HealthMonitor>) -> Self {
        Self { pool, health }
    }

    /// Leases handed out before this call are left alone; their sessions are
    /// closed when released. A failed relaunch is logged only and the next
    /// acquire tries again.
    pub async fn reinitialize(&self) {
        info!("Reinitializing rendering backend...");
        self.health.reset().await;

        match self.pool.rebuild().await {
            Ok(()) => info!(
                generation = self.pool.generation(),
                idle = self.pool.idle_count(),
                overflow_opened = self.pool.overflow_opened(),
                warmup = ?self.pool.warmup_report(),
                "Rendering backend reinitialized"
            ),
            Err(e) => error!("Rendering backend reinitialization failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::StubBackend;

    #[tokio::test(start_paused = true)]
    async fn test_reinitialize_resets_health_and_relaunches() {
        let stub = StubBackend::new(vec![]);
        let pool = Arc::new(SessionPool::with_capacity(stub.launcher(), 2));
        let health = Arc::new(HealthMonitor::new(Arc::clone(&pool)));
        let recovery = Recovery::new(Arc::clone(&pool), Arc::clone(&health));

        assert!(health.is_healthy().await);
        health.record_failure();
        health.record_failure();

        recovery.reinitialize().await;

        assert_eq!(health.consecutive_errors(), 0);
        assert!(health.should_check().await);
        assert_eq!(StubBackend::count(&stub.counters.launches), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_relaunch_is_absorbed() {
        let stub = StubBackend::new(vec![]);
        let pool = Arc::new(SessionPool::with_capacity(stub.launcher(), 2));
        let health = Arc::new(HealthMonitor::new(Arc::clone(&pool)));
        let recovery = Recovery::new(Arc::clone(&pool), Arc::clone(&health));
        pool.acquire().await.unwrap().release();

        stub.fail_launch(true);
        recovery.reinitialize().await;
        assert_eq!(pool.idle_count(), 0);

        stub.fail_launch(false);
        assert!(pool.acquire().await.is_ok());
        assert_eq!(StubBackend::count(&stub.counters.launches), 2);
    }
}
