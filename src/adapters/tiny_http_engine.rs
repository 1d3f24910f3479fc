//! tiny_http engine.
//!
//! tiny_http is a blocking server: one named accept thread pulls requests
//! off the server and hands each to the tokio runtime `start` ran on.
//! Blocking reads and writes of the socket go through `spawn_blocking`.
//!
//! The engine has no routing table, so it routes with [`PathRouter`].
//! Chain failures go to one engine-level error hook, which
//! `set_error_handler` replaces.
//!
//! Responses are fully buffered before they are written; streamed bodies
//! are collected first.

use std::any::Any;
use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::adapters::{error_response, native_mismatch, panic_response, MissHandler, RouterAdapter, ENGINE_TINY_HTTP};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::error_handler::{default_error_handler, last_error, ErrorHandler};
use crate::http::handler::Handler;
use crate::http::middleware::{compose, run_chain, Middleware};
use crate::net::{resolve, ConnectionTracker, PeerInfo};
use crate::routing::{PathRouter, RouteLookup, RouteMeta, RouterGroup};

/// Native middleware for the tiny_http engine. Sees the raw request
/// before its body is read; returning a response answers it directly.
pub type TinyHttpNativeMiddleware =
    Arc<dyn Fn(&tiny_http::Request) -> Option<tiny_http::ResponseBox> + Send + Sync>;

/// How long aborted requests get to unwind after a drain times out.
const ABORT_WAIT: Duration = Duration::from_millis(500);

/// The engine-level error hook.
type ErrorHook = Arc<dyn Fn(&mut RouterContext, RouterError) + Send + Sync>;

fn error_hook(handler: Arc<dyn ErrorHandler>) -> ErrorHook {
    Arc::new(move |ctx: &mut RouterContext, err: RouterError| handler.handle_error(ctx, err))
}

struct TinyState {
    router: PathRouter,
    global: Vec<Arc<dyn Middleware>>,
    native: Vec<TinyHttpNativeMiddleware>,
    on_error: ErrorHook,
    server: Option<RunningServer>,
}

struct RunningServer {
    addr: SocketAddr,
    server: Arc<tiny_http::Server>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    tracker: ConnectionTracker,
}

type Shared = Arc<RwLock<TinyState>>;

/// Route and run the chain for a converted request.
async fn dispatch_http(shared: &Shared, request: Request<Body>, peer: PeerInfo) -> Response<Body> {
    let (lookup, global, on_error) = {
        let state = shared.read();
        (
            state.router.lookup(request.method(), request.uri().path()),
            state.global.clone(),
            state.on_error.clone(),
        )
    };

    let (chain, handler, params): (_, Arc<dyn Handler>, _) = match lookup {
        RouteLookup::Found { route, params } => {
            (compose(&[&global[..], &route.middlewares[..]]), route.handler, params)
        }
        miss => (compose(&[&global[..]]), Arc::new(MissHandler::from_lookup(miss)), HashMap::new()),
    };

    let mut ctx = RouterContext::new(request).with_params(params).with_native(peer);
    let outcome = run_chain(chain, handler, &mut ctx).await;
    if let Some(err) = last_error(&mut ctx, outcome) {
        on_error(&mut ctx, err);
    }
    ctx.into_response()
}

fn to_http_request(request: &tiny_http::Request, body: Vec<u8>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(request.method().as_str()).uri(request.url());
    for header in request.headers() {
        builder = builder.header(header.field.as_str().as_str(), header.value.as_str());
    }
    builder
        .body(Body::from(body))
        .map_err(|err| RouterError::http(StatusCode::BAD_REQUEST, format!("malformed request: {err}")))
}

async fn to_tiny_response(response: Response<Body>) -> tiny_http::ResponseBox {
    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(engine = ENGINE_TINY_HTTP, error = %err, "response body failed, sending it empty");
            bytes::Bytes::new()
        }
    };

    let mut out = tiny_http::Response::from_data(bytes.to_vec()).with_status_code(parts.status.as_u16());
    for (name, value) in parts.headers.iter() {
        // tiny_http frames the body itself.
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        match tiny_http::Header::from_bytes(name.as_str().as_bytes(), value.as_bytes()) {
            Ok(header) => out.add_header(header),
            Err(()) => tracing::debug!(header = %name, "header not representable by tiny_http, skipped"),
        }
    }
    out.boxed()
}

async fn respond(request: tiny_http::Request, response: tiny_http::ResponseBox) {
    match tokio::task::spawn_blocking(move || request.respond(response)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(engine = ENGINE_TINY_HTTP, error = %err, "failed to write response"),
        Err(err) => tracing::warn!(engine = ENGINE_TINY_HTTP, error = %err, "response writer task failed"),
    }
}

/// Read the body on the blocking pool. With a cap, at most `cap + 1`
/// bytes are read so an oversized body is still detectable.
async fn read_body(
    mut request: tiny_http::Request,
    cap: Option<u64>,
) -> Option<(tiny_http::Request, std::io::Result<Vec<u8>>)> {
    let read = tokio::task::spawn_blocking(move || {
        let mut body = Vec::new();
        let reader = request.as_reader();
        let result = match cap {
            Some(cap) => reader.take(cap.saturating_add(1)).read_to_end(&mut body),
            None => reader.read_to_end(&mut body),
        };
        (request, result.map(|_| body))
    })
    .await;
    match read {
        Ok(read) => Some(read),
        Err(err) => {
            tracing::warn!(engine = ENGINE_TINY_HTTP, error = %err, "body reader task failed, request dropped");
            None
        }
    }
}

/// A body read by [`read_body`]. Past `cap` it is rejected rather than
/// handed on truncated.
fn checked_body(body: std::io::Result<Vec<u8>>, cap: Option<u64>) -> Result<Vec<u8>> {
    let body = body.map_err(|err| RouterError::BodyRead(err.to_string()))?;
    match cap {
        Some(limit) if body.len() as u64 > limit => Err(RouterError::PayloadTooLarge { limit }),
        _ => Ok(body),
    }
}

async fn handle_request(shared: Shared, request: tiny_http::Request, body_cap: Option<u64>) {
    let peer = PeerInfo {
        remote_addr: request.remote_addr().copied(),
        connection_id: None,
    };

    let native = shared.read().native.clone();
    for middleware in &native {
        match std::panic::catch_unwind(AssertUnwindSafe(|| middleware(&request))) {
            Ok(None) => {}
            Ok(Some(response)) => return respond(request, response).await,
            Err(payload) => {
                let response = to_tiny_response(panic_response(payload)).await;
                return respond(request, response).await;
            }
        }
    }

    let Some((request, body)) = read_body(request, body_cap).await else {
        return;
    };
    let response = match checked_body(body, body_cap).and_then(|body| to_http_request(&request, body)) {
        Ok(converted) => dispatch_http(&shared, converted, peer).await,
        Err(err) => error_response(&err),
    };
    respond(request, to_tiny_response(response).await).await;
}

fn accept_loop(
    server: Arc<tiny_http::Server>,
    stop: Arc<AtomicBool>,
    runtime: Handle,
    shared: Shared,
    tracker: ConnectionTracker,
    poll_interval: Duration,
    body_cap: Option<u64>,
) {
    while !stop.load(Ordering::SeqCst) {
        match server.recv_timeout(poll_interval) {
            Ok(Some(request)) => {
                tracker.spawn_on(&runtime, handle_request(shared.clone(), request, body_cap));
            }
            Ok(None) => {}
            Err(err) => {
                if !stop.load(Ordering::SeqCst) {
                    tracing::warn!(engine = ENGINE_TINY_HTTP, error = %err, "receive failed");
                }
            }
        }
    }
    tracing::debug!(engine = ENGINE_TINY_HTTP, "accept thread exiting");
}

/// Adapter over a tiny_http server.
pub struct TinyHttpAdapter {
    config: RouterConfig,
    state: Shared,
}

impl TinyHttpAdapter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RwLock::new(TinyState {
                router: PathRouter::new(),
                global: Vec::new(),
                native: Vec::new(),
                on_error: error_hook(default_error_handler()),
                server: None,
            })),
        }
    }

    fn body_cap(&self) -> Option<u64> {
        (self.config.body_limit_bytes > 0).then_some(self.config.body_limit_bytes)
    }
}

#[async_trait]
impl RouterAdapter for TinyHttpAdapter {
    fn engine_type(&self) -> &'static str {
        ENGINE_TINY_HTTP
    }

    /// `Option<Arc<tiny_http::Server>>`, set while running.
    fn engine(&self) -> Box<dyn Any + Send> {
        let server = self.state.read().server.as_ref().map(|s| s.server.clone());
        Box::new(server)
    }

    fn register_route(&self, meta: RouteMeta) -> Result<()> {
        let route = meta.compile()?;
        tracing::debug!(engine = ENGINE_TINY_HTTP, method = %route.method, path = route.path(), "route registered");
        self.state.write().router.insert(route)
    }

    fn register_middleware(&self, middleware: Arc<dyn Middleware>) -> Result<()> {
        self.state.write().global.push(middleware);
        Ok(())
    }

    fn register_group(&self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> RouterGroup<'_> {
        RouterGroup::new(self, prefix, middlewares)
    }

    fn use_native(&self, native: Box<dyn Any + Send>) -> Result<()> {
        let middleware = native
            .downcast::<TinyHttpNativeMiddleware>()
            .map_err(|_| native_mismatch::<TinyHttpNativeMiddleware>(ENGINE_TINY_HTTP))?;
        self.state.write().native.push(*middleware);
        Ok(())
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.state.write().on_error = error_hook(handler);
    }

    /// Native middleware is skipped: it needs a socket-backed request.
    async fn serve_http(&self, request: Request<Body>) -> Response<Body> {
        let peer = PeerInfo {
            remote_addr: None,
            connection_id: None,
        };
        dispatch_http(&self.state, request, peer).await
    }

    async fn start(&self, addr: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.server.is_some() {
            return Err(RouterError::AlreadyRunning);
        }

        let socket_addr = resolve(addr)?;
        let bind_err = |source: std::io::Error| RouterError::Bind {
            addr: addr.to_string(),
            source,
        };
        let server = tiny_http::Server::http(socket_addr)
            .map_err(|err| bind_err(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;
        let local_addr = server.server_addr().to_ip().ok_or_else(|| {
            bind_err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "tiny_http is not listening on an IP address",
            ))
        })?;
        let server = Arc::new(server);

        let stop = Arc::new(AtomicBool::new(false));
        let tracker = ConnectionTracker::new();
        let thread = {
            let server = server.clone();
            let stop = stop.clone();
            let runtime = Handle::current();
            let shared = self.state.clone();
            let tracker = tracker.clone();
            let poll_interval = Duration::from_millis(self.config.engines.tiny_http.poll_interval_ms);
            let body_cap = self.body_cap();
            std::thread::Builder::new()
                .name("tiny-http-accept".to_string())
                .spawn(move || accept_loop(server, stop, runtime, shared, tracker, poll_interval, body_cap))
                .map_err(bind_err)?
        };

        state.server = Some(RunningServer {
            addr: local_addr,
            server,
            stop,
            thread,
            tracker,
        });
        tracing::info!(engine = ENGINE_TINY_HTTP, address = %local_addr, "router started");
        Ok(())
    }

    async fn shutdown(&self, grace: Duration) -> Result<()> {
        let running = self.state.write().server.take();
        let RunningServer {
            addr,
            server,
            stop,
            thread,
            tracker,
        } = running.ok_or(RouterError::NotRunning)?;

        tracing::info!(
            engine = ENGINE_TINY_HTTP,
            address = %addr,
            in_flight = tracker.active_count(),
            grace = ?grace,
            "router shutting down"
        );
        stop.store(true, Ordering::SeqCst);
        server.unblock();
        if !matches!(tokio::task::spawn_blocking(move || thread.join()).await, Ok(Ok(()))) {
            tracing::warn!(engine = ENGINE_TINY_HTTP, "accept thread did not exit cleanly");
        }

        let drained = tracker.drain(grace).await;
        if drained.is_err() {
            let cut_off = tracker.abort_all();
            tracing::warn!(engine = ENGINE_TINY_HTTP, requests = cut_off, "in-flight requests cut off");
            if tokio::time::timeout(ABORT_WAIT, tracker.wait_idle()).await.is_err() {
                tracing::warn!(engine = ENGINE_TINY_HTTP, "aborted requests still unwinding");
            }
        }
        // Dropping the last handle closes the listening socket.
        drop(server);
        if drained.is_ok() {
            tracing::info!(engine = ENGINE_TINY_HTTP, "router stopped");
        }
        drained
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.read().server.as_ref().map(|s| s.addr)
    }

    fn is_running(&self) -> bool {
        self.state.read().server.is_some()
    }
}
