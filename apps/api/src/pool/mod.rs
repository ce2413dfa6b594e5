//! Session pool of pre-warmed browser pages handed out one request at a time.
//!
//! The pool owns the single backend `Connection`. It is launched lazily on
//! first use and rebuilt by `rebuild()` during recovery. Capacity bounds the
//! idle set only: `acquire` never blocks, it opens an overflow page whenever
//! the idle set is empty, and `release` closes pages that do not fit back.
//!
//! Every connection carries a generation number and every session remembers
//! the generation that opened it. Sessions from a superseded generation are
//! closed instead of pooled. A lease taken before a rebuild keeps working on
//! its old page until released; nothing stops it from racing the teardown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, Connection, Launcher, Page};

pub mod warmup;

pub use warmup::WarmupReport;
use warmup::WarmupStatus;

pub const POOL_CAPACITY: usize = 5;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to start rendering backend: {0}")]
    Launch(#[source] BackendError),

    #[error("failed to open rendering context: {0}")]
    OpenPage(#[source] BackendError),
}

/// The live backend connection of one generation.
struct BackendConnection {
    generation: u64,
    connection: Arc<dyn Connection>,
}

enum Lifecycle {
    Uninitialized,
    Ready(Arc<BackendConnection>),
    /// Teardown in progress. Left behind if a rebuild is abandoned midway,
    /// in which case the next acquire launches afresh.
    Reinitializing,
}

struct Session {
    id: u64,
    generation: u64,
    page: Arc<dyn Page>,
}

impl Session {
    fn cancel(self) {
        self.page.close();
    }
}

/// Idle sessions plus the current generation; shared with outstanding leases.
struct Shelf {
    capacity: usize,
    idle: Mutex<VecDeque<Session>>,
    generation: AtomicU64,
}

impl Shelf {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Pops an idle session of the current generation, closing stale ones.
    fn pop_current(&self) -> Option<Session> {
        loop {
            let session = self.idle.lock().pop_front()?;
            if session.generation == self.current_generation() {
                return Some(session);
            }
            debug!(session = session.id, "Dropping superseded idle session");
            session.cancel();
        }
    }

    /// Returns a session to the idle set, or closes it when the set is full
    /// or the session belongs to an older generation.
    fn put_back(&self, session: Session) {
        if session.generation != self.current_generation() {
            debug!(session = session.id, "Discarding session from superseded backend");
            session.cancel();
            return;
        }
        let rejected = {
            let mut idle = self.idle.lock();
            if idle.len() < self.capacity {
                idle.push_back(session);
                None
            } else {
                Some(session)
            }
        };
        if let Some(session) = rejected {
            debug!(session = session.id, "Pool full, closing session");
            session.cancel();
        }
    }

    /// Marks every outstanding session as superseded.
    fn retire_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn drain(&self) {
        let drained: Vec<Session> = self.idle.lock().drain(..).collect();
        for session in drained {
            session.cancel();
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// Exclusive use of one pooled session. Released exactly once: explicitly via
/// `release`, or on drop.
pub struct SessionLease {
    page: Arc<dyn Page>,
    generation: u64,
    session: Option<Session>,
    shelf: Arc<Shelf>,
}

impl SessionLease {
    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(mut self) {
        self.give_back();
    }

    /// Closes the session instead of pooling it, for pages that may still be
    /// busy with abandoned work.
    pub fn discard(mut self) {
        if let Some(session) = self.session.take() {
            debug!(session = session.id, "Discarding session");
            session.cancel();
        }
    }

    fn give_back(&mut self) {
        if let Some(session) = self.session.take() {
            self.shelf.put_back(session);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.give_back();
    }
}

pub struct SessionPool {
    launcher: Arc<dyn Launcher>,
    lifecycle: AsyncMutex<Lifecycle>,
    shelf: Arc<Shelf>,
    warmup: Arc<WarmupStatus>,
    next_session_id: AtomicU64,
    overflow_opened: AtomicUsize,
}

impl SessionPool {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self::with_capacity(launcher, POOL_CAPACITY)
    }

    pub fn with_capacity(launcher: Arc<dyn Launcher>, capacity: usize) -> Self {
        Self {
            launcher,
            lifecycle: AsyncMutex::new(Lifecycle::Uninitialized),
            shelf: Arc::new(Shelf {
                capacity,
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                generation: AtomicU64::new(0),
            }),
            warmup: Arc::new(WarmupStatus::default()),
            next_session_id: AtomicU64::new(1),
            overflow_opened: AtomicUsize::new(0),
        }
    }

    /// Hands out an idle session, warming the pool on first use and opening
    /// an overflow session when none is idle. Never waits for a release.
    pub async fn acquire(&self) -> Result<SessionLease, PoolError> {
        if let Some(session) = self.shelf.pop_current() {
            return Ok(self.lease(session));
        }

        let backend = self.ensure_ready().await?;
        if let Some(session) = self.shelf.pop_current() {
            return Ok(self.lease(session));
        }

        let page = backend
            .connection
            .open_page()
            .await
            .map_err(PoolError::OpenPage)?;
        self.overflow_opened.fetch_add(1, Ordering::Relaxed);
        debug!(generation = backend.generation, "Pool empty, opened overflow session");
        Ok(self.lease(self.session(backend.generation, page)))
    }

    /// Tears down the backend connection and every idle session, then
    /// launches a new connection and re-warms the pool before returning.
    pub async fn rebuild(&self) -> Result<(), PoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Reinitializing);
        if let Lifecycle::Ready(backend) = previous {
            info!(generation = backend.generation, "Closing backend connection");
            backend.connection.close();
        }
        self.shelf.retire_generation();
        self.shelf.drain();

        let backend = self.launch_and_warm().await?;
        *lifecycle = Lifecycle::Ready(backend);
        Ok(())
    }

    /// Closes idle sessions and the backend connection.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Ready(backend) = std::mem::replace(&mut *lifecycle, Lifecycle::Uninitialized) {
            backend.connection.close();
        }
        self.shelf.retire_generation();
        self.shelf.drain();
        info!("Session pool shut down");
    }

    pub fn idle_count(&self) -> usize {
        self.shelf.idle_count()
    }

    pub fn capacity(&self) -> usize {
        self.shelf.capacity
    }

    pub fn generation(&self) -> u64 {
        self.shelf.current_generation()
    }

    pub fn overflow_opened(&self) -> usize {
        self.overflow_opened.load(Ordering::Relaxed)
    }

    pub fn warmup_report(&self) -> WarmupReport {
        self.warmup.report()
    }

    async fn ensure_ready(&self) -> Result<Arc<BackendConnection>, PoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Ready(backend) = &*lifecycle {
            return Ok(Arc::clone(backend));
        }
        let backend = self.launch_and_warm().await?;
        *lifecycle = Lifecycle::Ready(Arc::clone(&backend));
        Ok(backend)
    }

    /// Caller holds the lifecycle lock.
    async fn launch_and_warm(&self) -> Result<Arc<BackendConnection>, PoolError> {
        info!("Initializing rendering backend...");
        let connection = self.launcher.launch().await.map_err(PoolError::Launch)?;
        let generation = self.shelf.current_generation();
        let backend = Arc::new(BackendConnection {
            generation,
            connection,
        });

        for _ in 0..self.shelf.capacity {
            match backend.connection.open_page().await {
                Ok(page) => {
                    self.warmup.spawn_probe(Arc::clone(&page));
                    self.shelf.put_back(self.session(generation, page));
                }
                Err(e) => {
                    warn!("Failed to open warmup session: {e}");
                    self.warmup.record_failure(&e);
                }
            }
        }

        info!(
            generation,
            idle = self.shelf.idle_count(),
            "Session pool ready"
        );
        Ok(backend)
    }

    fn session(&self, generation: u64, page: Arc<dyn Page>) -> Session {
        Session {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            generation,
            page,
        }
    }

    fn lease(&self, session: Session) -> SessionLease {
        SessionLease {
            page: Arc::clone(&session.page),
            generation: session.generation,
            session: Some(session),
            shelf: Arc::clone(&self.shelf),
        }
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        if let Lifecycle::Ready(backend) = self.lifecycle.get_mut() {
            backend.connection.close();
        }
        self.shelf.drain();
    }
}
