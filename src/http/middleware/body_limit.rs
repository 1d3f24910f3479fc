//! Request body size limit.
//!
//! Requests announcing a `Content-Length` above the limit are rejected
//! before the handler runs. Other bodies are wrapped in
//! [`http_body_util::Limited`]; reading past the limit fails and the
//! failure is rendered as a 413.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::StatusCode;
use http_body_util::Limited;

use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::middleware::{Middleware, Next};

/// Context key under which the active limit is stored.
pub const BODY_LIMIT_KEY: &str = "router.body_limit";

/// Rejects request bodies larger than `limit` bytes.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit {
    limit: u64,
}

impl BodyLimit {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn reject(&self, ctx: &mut RouterContext) -> Result<()> {
        if ctx.is_response_written() {
            tracing::warn!(path = %ctx.path(), limit = self.limit, "body limit exceeded after response write");
            return Ok(());
        }
        let err = RouterError::PayloadTooLarge { limit: self.limit };
        tracing::debug!(path = %ctx.path(), limit = self.limit, "request body too large");
        ctx.json(StatusCode::PAYLOAD_TOO_LARGE, &err.envelope())
    }
}

#[async_trait]
impl Middleware for BodyLimit {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        let declared = ctx
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.limit) {
            return self.reject(ctx);
        }

        ctx.set(BODY_LIMIT_KEY, *self);
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        let body = std::mem::take(ctx.request_mut().body_mut());
        *ctx.request_mut().body_mut() = Body::new(Limited::new(body, limit));

        match next.run(ctx).await {
            Err(RouterError::PayloadTooLarge { .. }) => self.reject(ctx),
            other => other,
        }
    }
}

/// Format a byte count with binary units: `0 B`, `512 KB`, `1.5 KB`, `2 MB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", rounded, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use crate::http::middleware::{compose, run_chain};
    use axum::http::Request;
    use std::sync::Arc;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(10), "10 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(512 * 1024), "512 KB");
        assert_eq!(human_bytes(2 * 1024 * 1024), "2 MB");
    }

    fn limit(bytes: u64) -> Arc<dyn Middleware> {
        Arc::new(BodyLimit::new(bytes))
    }

    fn echo() -> Arc<dyn crate::http::handler::Handler> {
        handler_fn(|ctx| {
            Box::pin(async move {
                let body = ctx.body_bytes().await?;
                ctx.bytes(StatusCode::OK, "application/octet-stream", body)
            })
        })
    }

    #[tokio::test]
    async fn test_declared_length_rejected_up_front() {
        let req = Request::builder()
            .method("POST")
            .uri("/sms")
            .header("content-length", "4096")
            .body(Body::from(vec![b'a'; 4096]))
            .unwrap();
        let mut ctx = RouterContext::new(req);
        let chain = compose(&[&[limit(1024)]]);
        run_chain(chain, echo(), &mut ctx).await.unwrap();

        assert_eq!(ctx.response().status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: serde_json::Value =
            serde_json::from_slice(ctx.response().body().as_bytes().unwrap()).unwrap();
        assert_eq!(body["error"]["message"], "request body exceeds limit of 1 KB");
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit() {
        let chunks = vec![
            Ok::<_, std::io::Error>(bytes::Bytes::from(vec![b'x'; 800])),
            Ok(bytes::Bytes::from(vec![b'y'; 800])),
        ];
        let req = Request::builder()
            .method("POST")
            .uri("/sms")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();
        let mut ctx = RouterContext::new(req);
        let chain = compose(&[&[limit(1024)]]);
        run_chain(chain, echo(), &mut ctx).await.unwrap();

        assert_eq!(ctx.response().status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_small_body_passes() {
        let req = Request::builder()
            .method("POST")
            .uri("/sms")
            .body(Body::from("hello"))
            .unwrap();
        let mut ctx = RouterContext::new(req);
        let chain = compose(&[&[limit(1024)]]);
        run_chain(chain, echo(), &mut ctx).await.unwrap();

        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert_eq!(ctx.response().body().as_bytes().unwrap().as_ref(), b"hello");
    }
}
