//! Engine-neutral middleware.
//!
//! # Execution Model
//! ```text
//! global[0] → global[1] → group[0] → route[0] → handler
//!     ←──────────── errors / response flow back ────────────
//! ```
//!
//! Each middleware receives the shared `&mut RouterContext` and a [`Next`]
//! that runs the rest of the chain. Returning without calling `next`
//! short-circuits everything downstream.

pub mod body_limit;
pub mod gzip;
pub mod logger;
pub mod request_id;
pub mod timeout;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::handler::Handler;

pub use body_limit::{human_bytes, BodyLimit};
pub use gzip::Gzip;
pub use logger::RequestLogger;
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
pub use timeout::Timeout;

/// A step in the request chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()>;
}

/// Immutable, shareable middleware list.
pub type Chain = Arc<[Arc<dyn Middleware>]>;

/// The remainder of a middleware chain.
///
/// `Next` owns its position in the chain, so it can be moved into a
/// spawned task together with the context.
#[derive(Clone)]
pub struct Next {
    chain: Chain,
    index: usize,
    handler: Arc<dyn Handler>,
}

impl Next {
    pub fn new(chain: Chain, handler: Arc<dyn Handler>) -> Self {
        Self {
            chain,
            index: 0,
            handler,
        }
    }

    /// Run the rest of the chain, then the handler.
    pub fn run(self, ctx: &mut RouterContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.chain.get(self.index).cloned() {
                Some(middleware) => {
                    let next = Next {
                        chain: self.chain,
                        index: self.index + 1,
                        handler: self.handler,
                    };
                    middleware.handle(ctx, next).await
                }
                None => self.handler.call(ctx).await,
            }
        })
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("len", &self.chain.len())
            .finish()
    }
}

/// Middleware built from a closure returning a boxed future.
pub struct MiddlewareFn<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut RouterContext, Next) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        (self.f)(ctx, next).await
    }
}

/// Wrap a closure as a shareable middleware.
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: for<'a> Fn(&'a mut RouterContext, Next) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(MiddlewareFn { f })
}

/// Concatenate middleware lists in onion order.
pub fn compose(parts: &[&[Arc<dyn Middleware>]]) -> Chain {
    parts
        .iter()
        .flat_map(|part| part.iter().cloned())
        .collect::<Vec<_>>()
        .into()
}

/// Run `chain` then `handler`, turning panics into [`RouterError::Panic`].
pub async fn run_chain(chain: Chain, handler: Arc<dyn Handler>, ctx: &mut RouterContext) -> Result<()> {
    let fut = Next::new(chain, handler).run(ctx);
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "request handler panicked");
            Err(RouterError::Panic(message))
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
