//! Buffered response state.
//!
//! # Responsibilities
//! - Hold status, headers and body until the chain completes
//! - Enforce the write-once guard for bodies
//! - Convert into the engine-neutral `http::Response<Body>`
//!
//! # Design Decisions
//! - Headers stay mutable after the body is written (middleware adds
//!   headers on the way out), the body does not
//! - Streamed bodies are passed through untouched

use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use bytes::Bytes;

use crate::error::{Result, RouterError};

/// Body of a buffered response.
#[derive(Debug, Default)]
pub enum ResponseBody {
    /// Nothing written yet, or an intentionally empty body.
    #[default]
    Empty,
    /// A fully buffered body.
    Full(Bytes),
    /// A streamed body; never buffered or transformed.
    Stream(Body),
}

impl ResponseBody {
    /// Length of a buffered body.
    pub fn len(&self) -> Option<usize> {
        match self {
            ResponseBody::Empty => Some(0),
            ResponseBody::Full(bytes) => Some(bytes.len()),
            ResponseBody::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// The buffered bytes, if any.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Full(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Response being assembled for one request.
#[derive(Debug)]
pub struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    written: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            written: false,
        }
    }
}

impl ResponseState {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status. Ignored once the body has been written.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.written {
            tracing::debug!(status = %status, "status change after response write ignored");
            return;
        }
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Write status and body exactly once.
    pub(crate) fn write(&mut self, status: StatusCode, body: ResponseBody) -> Result<()> {
        if self.written {
            return Err(RouterError::AlreadyWritten);
        }
        self.status = status;
        self.body = body;
        self.written = true;
        Ok(())
    }

    /// Swap a buffered body for a transformed one (compression).
    /// Only legal on an already written, buffered body.
    pub(crate) fn transform_body(&mut self, bytes: Bytes) {
        if matches!(self.body, ResponseBody::Full(_)) {
            self.body = ResponseBody::Full(bytes);
        }
    }

    /// Build the outgoing response.
    pub fn into_response(self) -> Response<Body> {
        let body = match self.body {
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Full(bytes) => Body::from(bytes),
            ResponseBody::Stream(body) => body,
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
