//! Per-request deadline.
//!
//! The rest of the chain runs in its own task that owns the context. The
//! middleware races that task against the deadline:
//!
//! - finished in time: the context is moved back and the outcome returned
//! - panicked: the panic becomes [`RouterError::Panic`]
//! - deadline hit: the request context is cancelled, a watcher keeps
//!   awaiting the abandoned task and logs how it ended, and the request
//!   fails with [`RouterError::Timeout`] (504)
//!
//! An abandoned task is not aborted. Handlers that want to stop early
//! should watch `ctx.context().cancelled()`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::middleware::{panic_message, Middleware, Next};

/// Fails requests that run longer than `duration`.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl Middleware for Timeout {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        let deadline = Instant::now() + self.duration;
        let scope = ctx.context().with_deadline(deadline);
        ctx.set_context(scope.clone());

        let mut owned = ctx.detach();
        let mut task = tokio::spawn(async move {
            let outcome = next.run(&mut owned).await;
            (owned, outcome)
        });

        let raced = tokio::time::timeout_at(deadline, &mut task).await;
        match raced {
            Ok(Ok((owned, outcome))) => {
                *ctx = owned;
                outcome
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic().as_ref());
                tracing::error!(path = %ctx.path(), panic = %message, "request handler panicked");
                Err(RouterError::Panic(message))
            }
            Ok(Err(join_err)) => Err(RouterError::Panic(join_err.to_string())),
            Err(_) => {
                scope.cancel();
                let method = ctx.method().clone();
                let path = ctx.path().to_string();
                tracing::warn!(%method, %path, timeout = ?self.duration, "request deadline exceeded");
                tokio::spawn(async move {
                    match task.await {
                        Ok((_, Ok(()))) => {
                            tracing::debug!(%method, %path, "abandoned request finished after deadline");
                        }
                        Ok((_, Err(err))) => {
                            tracing::warn!(%method, %path, error = %err, "abandoned request failed after deadline");
                        }
                        Err(join_err) if join_err.is_panic() => {
                            let message = panic_message(join_err.into_panic().as_ref());
                            tracing::error!(%method, %path, panic = %message, "abandoned request panicked");
                        }
                        Err(join_err) => {
                            tracing::debug!(%method, %path, error = %join_err, "abandoned request cancelled");
                        }
                    }
                });
                Err(RouterError::Timeout(self.duration))
            }
        }
    }
}
