//! Conversion orchestrator: the per-request pipeline.
//!
//! cache lookup, then a due health check (recovering on failure), then acquire a
//! session, render under a deadline and populate the cache.
//!
//! Concurrent misses for the same document are not coalesced; each renders
//! and the last one to finish overwrites the cache entry.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::BackendError;
use crate::cache::{Artifact, ResultCache};
use crate::monitor::HealthMonitor;
use crate::pool::{PoolError, SessionPool};
use crate::recovery::Recovery;
use crate::render::{self, OutputFormat};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("rendering context unavailable: {0}")]
    Unavailable(#[from] PoolError),

    #[error("render timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Render(#[from] BackendError),
}

#[derive(Debug, Clone)]
pub struct Converted {
    pub artifact: Artifact,
    pub from_cache: bool,
}

pub struct Converter {
    cache: ResultCache,
    pool: Arc<SessionPool>,
    health: Arc<HealthMonitor>,
    recovery: Recovery,
}

impl Converter {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        let health = Arc::new(HealthMonitor::new(Arc::clone(&pool)));
        Self::with_parts(pool, health, ResultCache::default())
    }

    pub fn with_parts(pool: Arc<SessionPool>, health: Arc<HealthMonitor>, cache: ResultCache) -> Self {
        let recovery = Recovery::new(Arc::clone(&pool), Arc::clone(&health));
        Self {
            cache,
            pool,
            health,
            recovery,
        }
    }

    #[cfg(test)]
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub async fn convert(&self, html: &str, format: OutputFormat) -> Result<Converted, ConvertError> {
        let started = Instant::now();
        info!("Converting HTML to {format}");

        if let Some(artifact) = self.cache.get(html, format).await {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                bytes = artifact.bytes.len(),
                "{format} conversion from cache"
            );
            return Ok(Converted {
                artifact,
                from_cache: true,
            });
        }

        if self.health.should_check().await && !self.health.is_healthy().await {
            self.recovery.reinitialize().await;
        }

        let lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                self.health.record_failure();
                error!("No rendering context for {format}: {e}");
                return Err(e.into());
            }
        };

        let deadline = format.deadline();
        debug!(generation = lease.generation(), "Rendering {format} within {deadline:?}");
        let outcome = tokio::time::timeout(deadline, render::render(lease.page(), format, html)).await;

        let bytes = match outcome {
            Err(_) => {
                // The backend call may still be running on this page.
                lease.discard();
                let streak = self.health.record_failure();
                warn!(consecutive_errors = streak, "Render timeout after {deadline:?}");
                return Err(ConvertError::Timeout(deadline));
            }
            Ok(Err(e)) => {
                lease.release();
                let streak = self.health.record_failure();
                error!(consecutive_errors = streak, "Conversion error: {e}");
                return Err(e.into());
            }
            Ok(Ok(bytes)) => {
                lease.release();
                bytes
            }
        };

        self.health.record_success();
        let artifact = Artifact {
            bytes: Bytes::from(bytes),
            mime_type: format.mime_type(),
        };
        self.cache.put(html, format, artifact.clone()).await;
        let cached_entries = self.cache.len().await;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = artifact.bytes.len(),
            cached_entries,
            "{format} conversion completed"
        );
        Ok(Converted {
            artifact,
            from_cache: false,
        })
    }
}
