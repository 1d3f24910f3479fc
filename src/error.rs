//! Router error taxonomy.
//!
//! Every failure the router core can produce is a [`RouterError`]:
//!
//! - construction: invalid configuration, unknown engine type
//! - registration: malformed routes, conflicts, native middleware type mismatch
//! - runtime: handler errors, routing misses, oversized bodies, timeouts, panics
//! - lifecycle: already running, not running, shutdown timeout, bind failure
//!
//! Runtime errors reach the client as the same JSON envelope on every engine:
//!
//! ```text
//! { "error": { "code": "NOT_FOUND", "message": "no route for GET /accounts/1" } }
//! ```

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::http::middleware::body_limit::human_bytes;

/// Errors produced by the router core.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Router configuration failed validation.
    #[error("invalid router configuration: {0}")]
    InvalidConfig(String),

    /// No constructor is registered for the requested engine.
    #[error("unknown engine type: {0}")]
    UnknownEngine(String),

    /// The adapter registry rejected a registration.
    #[error("adapter registry error: {0}")]
    Registry(String),

    /// Route metadata is incomplete or malformed.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// The same method and path were registered twice.
    #[error("route already registered: {method} {path}")]
    RouteConflict { method: String, path: String },

    /// `use_native` received a value of the wrong type.
    #[error("native middleware type mismatch: engine {engine} expects {expected}")]
    TypeMismatch {
        engine: &'static str,
        expected: &'static str,
    },

    /// A response header name or value was not valid.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A second response write was attempted.
    #[error("response already written")]
    AlreadyWritten,

    /// No route matches the path under any method.
    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },

    /// The path matches, but only under other methods.
    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<String>,
    },

    /// The request body exceeded the configured limit.
    #[error("request body exceeds limit of {}", human_bytes(*.limit))]
    PayloadTooLarge { limit: u64 },

    /// The request did not complete before its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A handler or middleware panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// The request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// A response body could not be serialized.
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Application-level error with an explicit status.
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: String,
        message: String,
    },

    /// `start` was called on a running adapter.
    #[error("router is already running")]
    AlreadyRunning,

    /// `shutdown` was called on an adapter that is not running.
    #[error("router is not running")]
    NotRunning,

    /// In-flight requests did not drain within the grace period.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for router operations.
pub type Result<T, E = RouterError> = std::result::Result<T, E>;

impl RouterError {
    /// Application error with a status and message; the code is derived from the status.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        RouterError::Http {
            status,
            code: code_for_status(status),
            message: message.into(),
        }
    }

    /// Overrides the machine-readable code of an [`RouterError::Http`] error.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        match self {
            RouterError::Http {
                status, message, ..
            } => RouterError::Http {
                status,
                code: code.into(),
                message,
            },
            other => other,
        }
    }

    /// HTTP status used when this error reaches the client.
    pub fn status(&self) -> StatusCode {
        match self {
            RouterError::NotFound { .. } => StatusCode::NOT_FOUND,
            RouterError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RouterError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RouterError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RouterError::BodyRead(_) => StatusCode::BAD_REQUEST,
            RouterError::Http { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            RouterError::InvalidConfig(_) => "INVALID_CONFIG",
            RouterError::UnknownEngine(_) => "UNKNOWN_ENGINE",
            RouterError::Registry(_) => "REGISTRY_ERROR",
            RouterError::InvalidRoute(_) => "INVALID_ROUTE",
            RouterError::RouteConflict { .. } => "ROUTE_CONFLICT",
            RouterError::TypeMismatch { .. } => "TYPE_MISMATCH",
            RouterError::InvalidHeader(_) => "INVALID_HEADER",
            RouterError::AlreadyWritten => "RESPONSE_ALREADY_WRITTEN",
            RouterError::NotFound { .. } => "NOT_FOUND",
            RouterError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            RouterError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            RouterError::Timeout(_) => "GATEWAY_TIMEOUT",
            RouterError::Panic(_) => "INTERNAL_ERROR",
            RouterError::BodyRead(_) => "BAD_REQUEST",
            RouterError::Serialize(_) => "SERIALIZATION_ERROR",
            RouterError::Http { code, .. } => code,
            RouterError::AlreadyRunning => "ALREADY_RUNNING",
            RouterError::NotRunning => "NOT_RUNNING",
            RouterError::ShutdownTimeout(_) => "SHUTDOWN_TIMEOUT",
            RouterError::Bind { .. } => "BIND_FAILED",
        }
    }

    /// Message shown to clients. Panic payloads stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            RouterError::Panic(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// The JSON error envelope written by the error handlers.
    pub fn envelope(&self) -> Value {
        json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        })
    }
}

/// `StatusCode::BAD_REQUEST` -> `"BAD_REQUEST"`.
fn code_for_status(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(|reason| {
            reason
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect()
        })
        .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()))
}
