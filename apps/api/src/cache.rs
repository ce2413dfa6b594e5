//! Content-addressed cache of finished renders.
//!
//! Bounded by entry count; entries expire lazily at read time. On overflow the
//! single oldest entry (by insertion time) is evicted after a full scan.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::render::OutputFormat;

pub const CACHE_CAPACITY: usize = 100;
pub const CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const DIGEST_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
    format: OutputFormat,
}

impl CacheKey {
    /// Truncated SHA-256 of the document followed by the format name.
    pub fn new(html: &str, format: OutputFormat) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(html.as_bytes());
        hasher.update(format.as_str().as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(DIGEST_HEX_LEN);
        Self { digest, format }
    }
}

/// A render served from (or stored into) the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Bytes,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    artifact: Artifact,
    inserted_at: Instant,
}

pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY, CACHE_TTL)
    }
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            capacity,
            ttl,
        }
    }

    /// Returns the stored artifact unless it is absent or older than the TTL.
    /// Stale entries stay in place until overwritten or evicted.
    pub async fn get(&self, html: &str, format: OutputFormat) -> Option<Artifact> {
        let key = CacheKey::new(html, format);
        let entries = self.entries.read().await;
        let entry = entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        debug!(format = format.as_str(), "Cache HIT");
        Some(entry.artifact.clone())
    }

    pub async fn put(&self, html: &str, format: OutputFormat, artifact: Artifact) {
        let key = CacheKey::new(html, format);
        let mut entries = self.entries.write().await;

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Ties between equal timestamps resolve arbitrarily.
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                artifact,
                inserted_at: Instant::now(),
            },
        );
        debug!(format = format.as_str(), size = entries.len(), "Cache SET");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
