//! Business handler contract.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::http::context::RouterContext;

/// Terminal step of a middleware chain.
///
/// Handlers write the response through the context and return `Err` for
/// anything the error handler should render.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut RouterContext) -> Result<()>;
}

/// Handler built from a closure returning a boxed future.
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RouterContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut RouterContext) -> Result<()> {
        (self.f)(ctx).await
    }
}

/// Wrap a closure as a shareable handler.
///
/// ```ignore
/// let health = handler_fn(|ctx| Box::pin(async move {
///     ctx.json(StatusCode::OK, &json!({"status": "ok"}))
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a mut RouterContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(HandlerFn { f })
}
