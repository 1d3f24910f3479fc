//! In-flight tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Count live connections (hyper) or requests (tiny_http)
//! - Generate unique connection IDs for tracing
//! - Let shutdown wait until the count drops to zero
//! - Abort spawned request tasks that outlive the drain

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;

use crate::error::{Result, RouterError};

/// Relaxed ordering is enough; IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Peer details attached to a request's context by engines that own
/// their connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub remote_addr: Option<SocketAddr>,
    pub connection_id: Option<ConnectionId>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    idle: Notify,
    tasks: Mutex<HashMap<ConnectionId, AbortHandle>>,
}

/// Counts in-flight work and wakes waiters when it reaches zero.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record new in-flight work. The guard releases it on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
        }
    }

    /// Spawn `work` on `runtime` as tracked in-flight work that
    /// [`abort_all`](Self::abort_all) can cut off.
    pub fn spawn_on<F>(&self, runtime: &Handle, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.track();
        let id = guard.id();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let task = runtime.spawn(async move {
            // Unregistering happens on drop, so wait until registered.
            let _ = registered_rx.await;
            work.await;
            drop(guard);
        });
        self.inner.tasks.lock().insert(id, task.abort_handle());
        let _ = registered_tx.send(());
    }

    /// Abort every task from [`spawn_on`](Self::spawn_on) still running.
    /// Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks.values() {
            task.abort();
        }
        tasks.len()
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Resolves once nothing is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for in-flight work to finish, bounded by `grace`.
    pub async fn drain(&self, grace: Duration) -> Result<()> {
        match tokio::time::timeout(grace, self.wait_idle()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(in_flight = self.active_count(), grace = ?grace, "drain deadline exceeded");
                Err(RouterError::ShutdownTimeout(grace))
            }
        }
    }
}

/// Tracks one unit of in-flight work.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.tasks.lock().remove(&self.id);
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "connection closed");
    }
}
