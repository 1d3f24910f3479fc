//! Access log.

use std::time::Instant;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::context::RouterContext;
use crate::http::middleware::request_id::request_id;
use crate::http::middleware::{Middleware, Next};

/// Logs one line per request with method, path, status and latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        let start = Instant::now();
        let method = ctx.method().clone();
        let path = ctx.path().to_string();

        let outcome = next.run(ctx).await;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let request_id = request_id(ctx).unwrap_or("-");
        match &outcome {
            Ok(()) => tracing::info!(
                %method,
                %path,
                status = ctx.response().status().as_u16(),
                latency_ms,
                request_id,
                "request completed"
            ),
            Err(err) => tracing::info!(
                %method,
                %path,
                status = err.status().as_u16(),
                latency_ms,
                request_id,
                error = %err,
                "request failed"
            ),
        }
        outcome
    }
}
