//! Startup orchestration and ordered shutdown.
//!
//! # Responsibilities
//! - Start lifecycle hooks in registration order
//! - Stop them in reverse order, each bounded by the grace period
//! - Wrap a router adapter as a hook so it drains before the resources
//!   registered ahead of it close
//!
//! # Design Decisions
//! - Fail fast: a start error stops the hooks already started and is
//!   returned
//! - Listeners start last (traffic only when ready): register the router
//!   hook after the resources its handlers use

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapters::RouterAdapter;
use crate::error::{Result, RouterError};
use crate::lifecycle::Shutdown;

/// A resource with a start and a graceful stop.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    /// Stop, taking at most `grace`.
    async fn stop(&self, grace: Duration) -> Result<()>;
}

/// Runs hooks in a fixed order.
pub struct Lifecycle {
    hooks: Vec<Arc<dyn LifecycleHook>>,
    grace: Duration,
    started: Mutex<usize>,
}

impl Lifecycle {
    pub fn new(grace: Duration) -> Self {
        Self {
            hooks: Vec::new(),
            grace,
            started: Mutex::new(0),
        }
    }

    /// Register a hook. Hooks start in the order they are appended.
    pub fn append(&mut self, hook: Arc<dyn LifecycleHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Start every hook in order. On failure the hooks already started are
    /// stopped in reverse and the start error is returned.
    pub async fn start(&self) -> Result<()> {
        for (index, hook) in self.hooks.iter().enumerate() {
            tracing::info!(hook = hook.name(), "starting");
            if let Err(err) = hook.start().await {
                tracing::error!(hook = hook.name(), error = %err, "start failed, rolling back");
                *self.started.lock() = index;
                if let Err(stop_err) = self.stop().await {
                    tracing::warn!(error = %stop_err, "rollback incomplete");
                }
                return Err(err);
            }
        }
        *self.started.lock() = self.hooks.len();
        Ok(())
    }

    /// Stop started hooks in reverse order. Every hook is stopped even when
    /// an earlier one fails; the first error is returned.
    pub async fn stop(&self) -> Result<()> {
        let started = std::mem::take(&mut *self.started.lock());
        let mut first_error = None;
        for hook in self.hooks[..started].iter().rev() {
            tracing::info!(hook = hook.name(), grace = ?self.grace, "stopping");
            if let Err(err) = hook.stop(self.grace).await {
                tracing::error!(hook = hook.name(), error = %err, "stop failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Start, wait for `shutdown`, then stop.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<()> {
        self.start().await?;
        shutdown.wait().await;
        self.stop().await
    }
}

/// Serves a router adapter on `addr` for the lifetime of the process.
pub struct RouterHook {
    adapter: Arc<dyn RouterAdapter>,
    addr: String,
}

impl RouterHook {
    pub fn new(adapter: Arc<dyn RouterAdapter>, addr: impl Into<String>) -> Self {
        Self {
            adapter,
            addr: addr.into(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.adapter.local_addr()
    }
}

#[async_trait]
impl LifecycleHook for RouterHook {
    fn name(&self) -> &str {
        self.adapter.engine_type()
    }

    async fn start(&self) -> Result<()> {
        self.adapter.start(&self.addr).await
    }

    async fn stop(&self, grace: Duration) -> Result<()> {
        match self.adapter.shutdown(grace).await {
            Err(RouterError::NotRunning) => Ok(()),
            other => other,
        }
    }
}
