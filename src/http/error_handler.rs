//! Error handler contract and the default JSON renderer.
//!
//! Every engine funnels chain errors into exactly one [`ErrorHandler`].
//! The handler writes the response only if nothing has been written yet;
//! otherwise the error is logged and dropped.

use std::sync::Arc;

use axum::http::header::ALLOW;
use axum::http::HeaderValue;

use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;

/// Renders a chain error into the response.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle_error(&self, ctx: &mut RouterContext, err: RouterError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut RouterContext, RouterError) + Send + Sync + 'static,
{
    fn handle_error(&self, ctx: &mut RouterContext, err: RouterError) {
        self(ctx, err)
    }
}

/// Writes `{"error": {"code", "message"}}` with the error's status.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonErrorHandler;

impl ErrorHandler for JsonErrorHandler {
    fn handle_error(&self, ctx: &mut RouterContext, err: RouterError) {
        if ctx.is_response_written() {
            tracing::warn!(
                method = %ctx.method(),
                path = %ctx.path(),
                error = %err,
                "error after response was written, dropping"
            );
            return;
        }

        let status = err.status();
        if status.is_server_error() {
            tracing::error!(method = %ctx.method(), path = %ctx.path(), error = %err, "request failed");
        } else {
            tracing::debug!(method = %ctx.method(), path = %ctx.path(), error = %err, "request rejected");
        }

        if let RouterError::MethodNotAllowed { allowed, .. } = &err {
            if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                ctx.response_mut().headers_mut().insert(ALLOW, value);
            }
        }

        if let Err(write_err) = ctx.json(status, &err.envelope()) {
            tracing::warn!(error = %write_err, "failed to write error response");
        }
    }
}

/// The handler installed on every new adapter.
pub fn default_error_handler() -> Arc<dyn ErrorHandler> {
    Arc::new(JsonErrorHandler)
}

/// Collapse a chain outcome and the errors recorded on the context into
/// the one error that reaches the error handler.
///
/// Recorded errors come first; every error except the last is logged.
pub(crate) fn last_error(ctx: &mut RouterContext, outcome: Result<()>) -> Option<RouterError> {
    let mut errors = ctx.take_errors();
    if let Err(err) = outcome {
        errors.push(err);
    }
    let last = errors.pop()?;
    for err in errors {
        tracing::warn!(path = %ctx.path(), error = %err, "additional request error");
    }
    Some(last)
}

/// Deliver a chain outcome to the error handler.
pub(crate) fn forward_errors(handler: &dyn ErrorHandler, ctx: &mut RouterContext, outcome: Result<()>) {
    if let Some(err) = last_error(ctx, outcome) {
        handler.handle_error(ctx, err);
    }
}
