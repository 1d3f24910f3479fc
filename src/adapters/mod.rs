//! Router adapters: one uniform contract over several HTTP engines.
//!
//! # Engines
//! ```text
//! "axum"         axum Router; errors accumulated by a trailing middleware
//! "axum-server"  axum Router served by axum-server; centralized error hook
//! "hyper"        bare hyper http1 connections + regex PathRouter
//! "tiny-http"    blocking tiny_http server bridged onto tokio; centralized hook
//! ```
//!
//! # Request Flow
//! ```text
//! native request
//!     → RouterContext::new
//!     → global middleware → group middleware → route middleware → handler
//!     → ErrorHandler (only if the chain failed)
//!     → RouterContext::into_response → native response
//! ```
//!
//! # Design Decisions
//! - Engines are identified by string, so new engines only need a
//!   registry entry
//! - Misses (404/405) run through the global middleware like any route
//! - Shared state sits behind one RwLock per adapter; dispatch only holds
//!   the read lock long enough to clone `Arc`s

pub mod axum_engine;
pub mod axum_server_engine;
pub mod factory;
pub mod hyper_engine;
pub mod tiny_http_engine;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Request, Response};

use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::error_handler::{forward_errors, ErrorHandler};
use crate::http::handler::Handler;
use crate::http::middleware::{panic_message, run_chain, Chain, Middleware};
use crate::routing::{RouteLookup, RouteMeta, RouterGroup};

pub use axum_engine::{AxumAdapter, AxumNativeMiddleware};
pub use axum_server_engine::{AxumServerAdapter, AxumServerNativeMiddleware};
pub use factory::{
    default_registry, must_new_router_adapter, new_router_adapter, AdapterConstructor, AdapterRegistry,
};
pub use hyper_engine::{HyperAdapter, HyperNativeMiddleware};
pub use tiny_http_engine::{TinyHttpAdapter, TinyHttpNativeMiddleware};

/// Engine id of the axum adapter (the default).
pub const ENGINE_AXUM: &str = "axum";
/// Engine id of the axum-server adapter.
pub const ENGINE_AXUM_SERVER: &str = "axum-server";
/// Engine id of the bare hyper adapter.
pub const ENGINE_HYPER: &str = "hyper";
/// Engine id of the tiny_http adapter.
pub const ENGINE_TINY_HTTP: &str = "tiny-http";

/// Uniform interface over one HTTP engine.
#[async_trait]
pub trait RouterAdapter: Send + Sync + 'static {
    /// Engine id, e.g. `"axum"`.
    fn engine_type(&self) -> &'static str;

    /// The engine's native value, for escape-hatch access.
    fn engine(&self) -> Box<dyn Any + Send>;

    /// Register one route.
    fn register_route(&self, meta: RouteMeta) -> Result<()>;

    /// Register a global middleware. Global middleware runs in registration
    /// order before any group or route middleware.
    fn register_middleware(&self, middleware: Arc<dyn Middleware>) -> Result<()>;

    /// A registrar that prefixes paths and prepends `middlewares`.
    fn register_group(&self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> RouterGroup<'_>;

    /// Install engine-specific middleware. Fails with
    /// [`RouterError::TypeMismatch`] for the wrong native type.
    fn use_native(&self, native: Box<dyn Any + Send>) -> Result<()>;

    /// Replace the error handler. Takes effect for the next request.
    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>);

    /// Dispatch a request in-process through the same path as network traffic.
    async fn serve_http(&self, request: Request<Body>) -> Response<Body>;

    /// Bind `addr` and serve in the background.
    async fn start(&self, addr: &str) -> Result<()>;

    /// Stop accepting and drain in-flight requests, bounded by `grace`.
    async fn shutdown(&self, grace: Duration) -> Result<()>;

    /// The bound address while running.
    fn local_addr(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;
}

impl dyn RouterAdapter {
    pub fn handle(&self, method: &str, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.register_route(RouteMeta::new(method, path, handler))
    }

    pub fn get(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("GET", path, handler)
    }

    pub fn post(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("POST", path, handler)
    }

    pub fn put(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("PUT", path, handler)
    }

    pub fn delete(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("DELETE", path, handler)
    }
}

/// Terminal handler for requests no route matched.
pub(crate) struct MissHandler {
    allowed: Option<Vec<String>>,
}

impl MissHandler {
    pub(crate) fn not_found() -> Self {
        Self { allowed: None }
    }

    pub(crate) fn method_not_allowed(allowed: Vec<String>) -> Self {
        Self { allowed: Some(allowed) }
    }

    pub(crate) fn from_lookup(lookup: RouteLookup) -> Self {
        match lookup {
            RouteLookup::MethodNotAllowed { allowed } => Self::method_not_allowed(allowed),
            _ => Self::not_found(),
        }
    }
}

#[async_trait]
impl Handler for MissHandler {
    async fn call(&self, ctx: &mut RouterContext) -> Result<()> {
        let method = ctx.method().to_string();
        let path = ctx.path().to_string();
        Err(match &self.allowed {
            Some(allowed) => RouterError::MethodNotAllowed {
                method,
                path,
                allowed: allowed.clone(),
            },
            None => RouterError::NotFound { method, path },
        })
    }
}

/// Run a chain and hand any failure straight to `error_handler`.
pub(crate) async fn dispatch(
    ctx: &mut RouterContext,
    chain: Chain,
    handler: Arc<dyn Handler>,
    error_handler: &dyn ErrorHandler,
) {
    let outcome = run_chain(chain, handler, ctx).await;
    forward_errors(error_handler, ctx, outcome);
}

/// Render `err` as a JSON envelope response, outside any chain.
pub(crate) fn error_response(err: &RouterError) -> Response<Body> {
    let body = serde_json::to_vec(&err.envelope()).unwrap_or_default();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = err.status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// 500 response for a panic raised by native middleware.
pub(crate) fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = panic_message(payload.as_ref());
    tracing::error!(panic = %message, "native middleware panicked");
    error_response(&RouterError::Panic(message))
}

/// Type-mismatch error for `use_native`.
pub(crate) fn native_mismatch<T>(engine: &'static str) -> RouterError {
    RouterError::TypeMismatch {
        engine,
        expected: std::any::type_name::<T>(),
    }
}
