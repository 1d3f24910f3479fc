//! Engine-neutral per-request context.
//!
//! A [`RouterContext`] is created by an adapter for every inbound request,
//! handed to the middleware chain by `&mut`, and converted back into the
//! engine's response type once the chain returns. It is owned by the task
//! serving the request and never shared.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::TryStream;
use http_body_util::{BodyExt, LengthLimitError};
use serde::Serialize;

use crate::error::{Result, RouterError};
use crate::http::middleware::body_limit::{BodyLimit, BODY_LIMIT_KEY};
use crate::http::request::RequestContext;
use crate::http::response::{ResponseBody, ResponseState};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-request state shared by middleware and the handler.
pub struct RouterContext {
    request: Request<Body>,
    response: ResponseState,
    params: HashMap<String, String>,
    data: HashMap<String, Box<dyn Any + Send + Sync>>,
    scope: RequestContext,
    native: Option<Box<dyn Any + Send + Sync>>,
    errors: Vec<RouterError>,
}

impl RouterContext {
    /// Wrap an inbound request. A [`RequestContext`] already present in the
    /// request's extensions is adopted; otherwise a fresh one is installed.
    pub fn new(mut request: Request<Body>) -> Self {
        let scope = match request.extensions().get::<RequestContext>() {
            Some(scope) => scope.clone(),
            None => {
                let scope = RequestContext::new();
                request.extensions_mut().insert(scope.clone());
                scope
            }
        };
        Self {
            request,
            response: ResponseState::default(),
            params: HashMap::new(),
            data: HashMap::new(),
            scope,
            native: None,
            errors: Vec::new(),
        }
    }

    /// Attach path parameters bound by the router.
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Attach the engine's native per-request value.
    pub fn with_native<T: Any + Send + Sync>(mut self, native: T) -> Self {
        self.native = Some(Box::new(native));
        self
    }

    /// The engine's native per-request value, if it is a `T`.
    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.as_ref().and_then(|n| n.downcast_ref::<T>())
    }

    // --- request ---

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// Replace the wrapped request. The current request context travels
    /// with it unless the new request brings its own.
    pub fn set_request(&mut self, mut request: Request<Body>) {
        match request.extensions().get::<RequestContext>() {
            Some(scope) => self.scope = scope.clone(),
            None => {
                request.extensions_mut().insert(self.scope.clone());
            }
        }
        self.request = request;
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// A request header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Path parameter bound from the route template.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.request.uri().query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Read the whole request body. The bytes are put back into the request
    /// so later readers see the same body.
    pub async fn body_bytes(&mut self) -> Result<Bytes> {
        let body = std::mem::take(self.request.body_mut());
        match body.collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                *self.request.body_mut() = Body::from(bytes.clone());
                Ok(bytes)
            }
            Err(err) => {
                if is_length_limit_error(&err) {
                    let limit = self
                        .get::<BodyLimit>(BODY_LIMIT_KEY)
                        .map(BodyLimit::limit)
                        .unwrap_or_default();
                    Err(RouterError::PayloadTooLarge { limit })
                } else {
                    Err(RouterError::BodyRead(err.to_string()))
                }
            }
        }
    }

    // --- scratch data ---

    /// Typed lookup in the per-request scratch map.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }

    // --- request context ---

    pub fn context(&self) -> &RequestContext {
        &self.scope
    }

    /// Replace the request context. Writes through to the request's
    /// extensions so native handlers reading the request observe it too.
    pub fn set_context(&mut self, scope: RequestContext) {
        self.request.extensions_mut().insert(scope.clone());
        self.scope = scope;
    }

    // --- response ---

    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseState {
        &mut self.response
    }

    /// Set the response status. Ignored after the body is written.
    pub fn status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    /// Set (replace) a response header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RouterError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RouterError::InvalidHeader(format!("{}: {}", name, e)))?;
        self.response.headers_mut().insert(name, value);
        Ok(())
    }

    pub fn is_response_written(&self) -> bool {
        self.response.is_written()
    }

    /// Serialize `body` as JSON and write it with `status`.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, body: &T) -> Result<()> {
        if self.response.is_written() {
            return Err(RouterError::AlreadyWritten);
        }
        let bytes = serde_json::to_vec(body)?;
        self.write_full(status, "application/json", Bytes::from(bytes))
    }

    /// Write a plain-text body.
    pub fn text(&mut self, status: StatusCode, body: impl Into<String>) -> Result<()> {
        self.write_full(status, "text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    /// Write raw bytes with an explicit content type.
    pub fn bytes(&mut self, status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Result<()> {
        self.write_full(status, content_type, body.into())
    }

    /// Write a status with an empty body.
    pub fn no_content(&mut self, status: StatusCode) -> Result<()> {
        self.response.write(status, ResponseBody::Empty)
    }

    /// Stream the body from `stream`. The stream is handed to the engine
    /// as-is; it is never buffered.
    pub fn stream<S>(&mut self, status: StatusCode, content_type: &str, stream: S) -> Result<()>
    where
        S: TryStream + Send + 'static,
        S::Ok: Into<Bytes>,
        S::Error: Into<BoxError>,
    {
        if self.response.is_written() {
            return Err(RouterError::AlreadyWritten);
        }
        let value = content_type_value(content_type)?;
        self.response.write(status, ResponseBody::Stream(Body::from_stream(stream)))?;
        self.response.headers_mut().insert(header::CONTENT_TYPE, value);
        Ok(())
    }

    fn write_full(&mut self, status: StatusCode, content_type: &str, bytes: Bytes) -> Result<()> {
        if self.response.is_written() {
            return Err(RouterError::AlreadyWritten);
        }
        let value = content_type_value(content_type)?;
        self.response.write(status, ResponseBody::Full(bytes))?;
        self.response.headers_mut().insert(header::CONTENT_TYPE, value);
        Ok(())
    }

    // --- accumulated errors ---

    /// Record an error without aborting the chain. Delivered to the error
    /// handler once the chain finishes.
    pub fn record_error(&mut self, err: RouterError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[RouterError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<RouterError> {
        std::mem::take(&mut self.errors)
    }

    /// Move this context out, leaving a bodiless copy of the request line,
    /// headers, params, response headers and request context in its place.
    pub(crate) fn detach(&mut self) -> RouterContext {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = self.request.method().clone();
        *request.uri_mut() = self.request.uri().clone();
        *request.version_mut() = self.request.version();
        *request.headers_mut() = self.request.headers().clone();
        request.extensions_mut().insert(self.scope.clone());

        let mut response = ResponseState::default();
        *response.headers_mut() = self.response.headers().clone();
        let placeholder = RouterContext {
            request,
            response,
            params: self.params.clone(),
            data: HashMap::new(),
            scope: self.scope.clone(),
            native: None,
            errors: Vec::new(),
        };
        std::mem::replace(self, placeholder)
    }

    /// Finish the request and produce the engine-neutral response.
    pub fn into_response(self) -> Response<Body> {
        self.response.into_response()
    }
}

impl fmt::Debug for RouterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterContext")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("params", &self.params)
            .field("status", &self.response.status())
            .field("written", &self.response.is_written())
            .field("errors", &self.errors.len())
            .finish()
    }
}

fn content_type_value(content_type: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(content_type)
        .map_err(|e| RouterError::InvalidHeader(format!("content-type: {}", e)))
}

fn is_length_limit_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() || e.to_string() == "length limit exceeded" {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(uri: &str) -> RouterContext {
        RouterContext::new(Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    #[test]
    fn test_double_json_write_is_rejected() {
        let mut ctx = ctx("/sms");
        ctx.json(StatusCode::CREATED, &json!({"id": 1})).unwrap();

        let err = ctx.json(StatusCode::OK, &json!({"id": 2})).unwrap_err();
        assert!(matches!(err, RouterError::AlreadyWritten));
        assert!(ctx.is_response_written());
        assert_eq!(ctx.response().status(), StatusCode::CREATED);
        assert_eq!(
            ctx.response().body().as_bytes().unwrap().as_ref(),
            br#"{"id":1}"#
        );
    }

    #[test]
    fn test_stream_after_write_is_rejected() {
        let mut ctx = ctx("/reports");
        ctx.text(StatusCode::OK, "done").unwrap();
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"x"))]);
        assert!(matches!(
            ctx.stream(StatusCode::OK, "text/csv", stream),
            Err(RouterError::AlreadyWritten)
        ));
    }

    #[test]
    fn test_query_param_decoding() {
        let ctx = ctx("/templates?name=order%20shipped&lang=en&lang=fr");
        assert_eq!(ctx.query_param("name").as_deref(), Some("order shipped"));
        assert_eq!(ctx.query_param("lang").as_deref(), Some("en"));
        assert_eq!(ctx.query_param("missing"), None);
    }

    #[test]
    fn test_params_and_data() {
        let mut ctx = ctx("/users/7");
        ctx.set_param("id", "7");
        ctx.set("tenant", "acme".to_string());
        assert_eq!(ctx.param("id"), Some("7"));
        assert_eq!(ctx.get::<String>("tenant").map(String::as_str), Some("acme"));
        assert!(ctx.get::<u32>("tenant").is_none());
    }

    #[test]
    fn test_set_context_writes_through_to_request() {
        let mut ctx = ctx("/");
        let scope = ctx.context().with_value("user", "alice".to_string());
        ctx.set_context(scope);

        let from_request = ctx.request().extensions().get::<RequestContext>().unwrap();
        assert_eq!(from_request.value::<String>("user").map(String::as_str), Some("alice"));
        assert_eq!(ctx.context().value::<String>("user").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_set_request_keeps_context() {
        let mut ctx = ctx("/");
        ctx.set_context(ctx.context().with_value("trace", 9u32));
        ctx.set_request(Request::builder().uri("/other").body(Body::empty()).unwrap());

        assert_eq!(ctx.path(), "/other");
        let scope = ctx.request().extensions().get::<RequestContext>().unwrap();
        assert_eq!(scope.value::<u32>("trace"), Some(&9));
    }

    #[test]
    fn test_headers_can_be_added_after_write() {
        let mut ctx = ctx("/");
        ctx.text(StatusCode::OK, "ok").unwrap();
        ctx.set_header("x-request-id", "abc").unwrap();
        let response = ctx.into_response();
        assert_eq!(response.headers()["x-request-id"], "abc");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_body_bytes_is_replayable() {
        let mut ctx = RouterContext::new(
            Request::builder().method("POST").uri("/sms").body(Body::from("hello")).unwrap(),
        );
        assert_eq!(ctx.body_bytes().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(ctx.body_bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_detach_leaves_placeholder() {
        let mut ctx = ctx("/slow?x=1");
        ctx.set_param("id", "3");
        ctx.set("k", 1u8);
        let owned = ctx.detach();

        assert_eq!(owned.get::<u8>("k"), Some(&1));
        assert_eq!(ctx.path(), "/slow");
        assert_eq!(ctx.param("id"), Some("3"));
        assert!(ctx.get::<u8>("k").is_none());
        assert!(!ctx.is_response_written());
    }
}
