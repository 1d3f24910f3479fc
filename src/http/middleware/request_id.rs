//! Request ID propagation.
//!
//! Uses the client's `X-Request-ID` when present, otherwise generates a
//! UUID v4. The ID is stored in the context data, in the request context,
//! and echoed on the response.

use async_trait::async_trait;
use axum::http::HeaderValue;
use uuid::Uuid;

use crate::error::Result;
use crate::http::context::RouterContext;
use crate::http::middleware::{Middleware, Next};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Key for the ID in context data and the request context.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Longest client-supplied ID that is accepted as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

impl RequestIdMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        let id = ctx
            .header(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        ctx.set(REQUEST_ID_KEY, id.clone());
        let scope = ctx.context().with_value(REQUEST_ID_KEY, id.clone());
        ctx.set_context(scope);

        let outcome = next.run(ctx).await;

        if let Ok(value) = HeaderValue::from_str(&id) {
            ctx.response_mut().headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        outcome
    }
}

/// The request ID assigned by [`RequestIdMiddleware`], if it ran.
pub fn request_id(ctx: &RouterContext) -> Option<&str> {
    ctx.get::<String>(REQUEST_ID_KEY).map(String::as_str)
}
