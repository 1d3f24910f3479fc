//! axum engine (reference adapter).
//!
//! # Responsibilities
//! - Translate registered routes into an axum `Router`
//! - Run the engine-neutral chain inside axum handlers
//! - Serve the router over hyper connections owned by the adapter
//!
//! # Design Decisions
//! - axum accepts the path; the route is picked by the crate's
//!   [`PathRouter`], so precedence, 404 and 405 match the other engines
//! - One axum path per route shape, so axum still reports a
//!   `MatchedPath` for the native value
//! - Errors are accumulated on the context and forwarded by a trailing
//!   middleware that sits outermost in every chain
//! - The router is built lazily and cached; route and native middleware
//!   changes invalidate the cache, global middleware and the error
//!   handler are read per request
//! - A running server keeps the router it was started with
//! - Connections live in the accept loop's `JoinSet`; a shutdown past its
//!   grace aborts them together with the loop

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::routing::any;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper::server::conn::http1;
use hyper_util::rt::TokioTimer;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;

use crate::adapters::hyper_engine::{serve_connections, ConnectionService};
use crate::adapters::{
    dispatch, error_response, native_mismatch, panic_response, MissHandler, RouterAdapter, ENGINE_AXUM,
};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::error_handler::{default_error_handler, last_error, ErrorHandler};
use crate::http::handler::Handler;
use crate::http::middleware::{compose, panic_message, Chain, Middleware, Next};
use crate::net::{bind_tokio_listener, ConnectionTracker, PeerInfo};
use crate::routing::{PathRouter, Route, RouteLookup, RouteMeta, RouterGroup};

/// Native middleware for the axum engine, installed with
/// `axum::middleware::from_fn`. Runs before the engine-neutral chain.
pub type AxumNativeMiddleware =
    Arc<dyn Fn(Request<Body>, axum::middleware::Next) -> BoxFuture<'static, Response<Body>> + Send + Sync>;

/// One axum path, standing for every route of one shape.
pub(crate) struct PathGroup {
    pub(crate) axum_path: String,
    pub(crate) shape: Arc<str>,
}

/// One group per distinct shape, in registration order of first appearance.
pub(crate) fn group_by_shape(routes: &[Route]) -> Vec<PathGroup> {
    let mut groups: Vec<PathGroup> = Vec::new();
    for route in routes {
        let shape = route.pattern.shape();
        if groups.iter().all(|group| &*group.shape != shape) {
            groups.push(PathGroup {
                axum_path: route.pattern.axum_path(),
                shape: Arc::from(shape),
            });
        }
    }
    groups
}

/// The table route selection runs against.
pub(crate) fn path_router(routes: &[Route]) -> Result<Arc<PathRouter>> {
    let mut router = PathRouter::new();
    for route in routes {
        router.insert(route.clone())?;
    }
    Ok(Arc::new(router))
}

/// Build a router, turning axum's registration panics into errors.
pub(crate) fn guarded_build<F>(build: F) -> Result<Router>
where
    F: FnOnce() -> Router,
{
    std::panic::catch_unwind(AssertUnwindSafe(build)).map_err(|payload| {
        RouterError::InvalidRoute(format!(
            "axum rejected the route table: {}",
            panic_message(payload.as_ref())
        ))
    })
}

/// Check that axum accepts one path per shape of `routes`.
pub(crate) fn check_axum_paths(routes: &[Route]) -> Result<()> {
    let groups = group_by_shape(routes);
    guarded_build(|| {
        groups
            .iter()
            .fold(Router::new(), |router, group| router.route(&group.axum_path, any(|| async {})))
    })
    .map(drop)
}

/// A request with its route picked.
pub(crate) struct Selected {
    pub(crate) ctx: RouterContext,
    pub(crate) middlewares: Chain,
    pub(crate) handler: Arc<dyn Handler>,
}

/// Pick the route for a request axum has accepted. `shape` is the shape
/// of the axum path that matched, if any; the matched path becomes the
/// native value only when the picked route has that shape.
pub(crate) fn select(paths: &PathRouter, shape: Option<&str>, request: Request<Body>) -> Selected {
    let matched = request.extensions().get::<MatchedPath>().cloned();
    match paths.lookup(request.method(), request.uri().path()) {
        RouteLookup::Found { route, params } => {
            let mut ctx = RouterContext::new(request).with_params(params);
            if let (Some(matched), Some(shape)) = (matched, shape) {
                if route.pattern.shape() == shape {
                    ctx = ctx.with_native(matched);
                }
            }
            Selected {
                ctx,
                middlewares: route.middlewares,
                handler: route.handler,
            }
        }
        miss => Selected {
            ctx: RouterContext::new(request),
            middlewares: Chain::from(Vec::new()),
            handler: Arc::new(MissHandler::from_lookup(miss)),
        },
    }
}

/// HTTP/1 connection settings for the adapter's own listener.
fn connection_builder(config: &RouterConfig) -> http1::Builder {
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(Duration::from_secs(config.read_header_timeout_secs));
    builder
}

/// Serve `router` for every request the accept loop hands over.
fn router_service(router: Router) -> ConnectionService {
    Arc::new(move |request: Request<Body>, _peer: PeerInfo| {
        let router = router.clone();
        async move {
            match router.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            }
        }
        .boxed()
    })
}

struct AxumState {
    routes: Vec<Route>,
    global: Vec<Arc<dyn Middleware>>,
    native: Vec<AxumNativeMiddleware>,
    error_handler: Arc<dyn ErrorHandler>,
    server: Option<RunningServer>,
}

struct RunningServer {
    addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    tracker: ConnectionTracker,
}

type Shared = Arc<RwLock<AxumState>>;

/// Forwards the chain's errors to the error handler. Always the first
/// middleware of the chain, so it sees everything downstream.
struct ErrorForwarder {
    handler: Arc<dyn ErrorHandler>,
}

#[async_trait]
impl Middleware for ErrorForwarder {
    async fn handle(&self, ctx: &mut RouterContext, next: Next) -> Result<()> {
        let outcome = match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "request handler panicked");
                Err(RouterError::Panic(message))
            }
        };
        if let Some(err) = last_error(ctx, outcome) {
            self.handler.handle_error(ctx, err);
        }
        Ok(())
    }
}

async fn handle(shared: Shared, paths: Arc<PathRouter>, shape: Option<Arc<str>>, request: Request<Body>) -> Response<Body> {
    let Selected {
        mut ctx,
        middlewares,
        handler,
    } = select(&paths, shape.as_deref(), request);
    let (global, error_handler) = {
        let state = shared.read();
        (state.global.clone(), state.error_handler.clone())
    };
    let forwarder: Arc<dyn Middleware> = Arc::new(ErrorForwarder {
        handler: error_handler.clone(),
    });

    let chain = compose(&[std::slice::from_ref(&forwarder), &global[..], &middlewares[..]]);
    dispatch(&mut ctx, chain, handler, error_handler.as_ref()).await;
    ctx.into_response()
}

fn build_router(
    shared: &Shared,
    routes: &[Route],
    native: &[AxumNativeMiddleware],
    config: &RouterConfig,
) -> Result<Router> {
    let paths = path_router(routes)?;
    let groups = group_by_shape(routes);
    let mut router = guarded_build(|| {
        let mut router = Router::new();
        for group in groups {
            let shared = shared.clone();
            let paths = paths.clone();
            let shape = group.shape;
            router = router.route(
                &group.axum_path,
                any(move |request: Request<Body>| handle(shared.clone(), paths.clone(), Some(shape.clone()), request)),
            );
        }
        let shared = shared.clone();
        router.fallback(move |request: Request<Body>| handle(shared.clone(), paths.clone(), None, request))
    })?;

    // Later layers wrap earlier ones; the first registered native runs first.
    for middleware in native.iter().rev() {
        let middleware = middleware.clone();
        router = router.layer(axum::middleware::from_fn(
            move |request: Request<Body>, next: axum::middleware::Next| middleware(request, next),
        ));
    }
    if config.engines.axum.catch_native_panics {
        router = router.layer(CatchPanicLayer::custom(panic_response));
    }
    Ok(router)
}

/// Adapter over an axum `Router`.
pub struct AxumAdapter {
    config: RouterConfig,
    state: Shared,
    router_cache: Mutex<Option<Router>>,
}

impl AxumAdapter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RwLock::new(AxumState {
                routes: Vec::new(),
                global: Vec::new(),
                native: Vec::new(),
                error_handler: default_error_handler(),
                server: None,
            })),
            router_cache: Mutex::new(None),
        }
    }

    /// The current router, built on first use after a change.
    pub fn router(&self) -> Result<Router> {
        let mut cache = self.router_cache.lock();
        if let Some(router) = cache.as_ref() {
            return Ok(router.clone());
        }
        let router = {
            let state = self.state.read();
            build_router(&self.state, &state.routes, &state.native, &self.config)?
        };
        *cache = Some(router.clone());
        Ok(router)
    }

    fn invalidate(&self) {
        self.router_cache.lock().take();
    }
}

#[async_trait]
impl RouterAdapter for AxumAdapter {
    fn engine_type(&self) -> &'static str {
        ENGINE_AXUM
    }

    fn engine(&self) -> Box<dyn Any + Send> {
        let router = self.router().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "axum router unavailable, returning an empty router");
            Router::new()
        });
        Box::new(router)
    }

    fn register_route(&self, meta: RouteMeta) -> Result<()> {
        let route = meta.compile()?;
        {
            let mut state = self.state.write();
            if state.routes.iter().any(|existing| existing.conflicts_with(&route)) {
                return Err(route.conflict_error());
            }
            let mut candidate = state.routes.clone();
            candidate.push(route.clone());
            check_axum_paths(&candidate)?;

            tracing::debug!(engine = ENGINE_AXUM, method = %route.method, path = route.path(), "route registered");
            state.routes.push(route);
        }
        self.invalidate();
        Ok(())
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
            .downcast::<AxumNativeMiddleware>()
            .map_err(|_| native_mismatch::<AxumNativeMiddleware>(ENGINE_AXUM))?;
        self.state.write().native.push(*middleware);
        self.invalidate();
        Ok(())
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.state.write().error_handler = handler;
    }

    async fn serve_http(&self, request: Request<Body>) -> Response<Body> {
        let router = match self.router() {
            Ok(router) => router,
            Err(err) => return error_response(&err),
        };
        match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    async fn start(&self, addr: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.server.is_some() {
            return Err(RouterError::AlreadyRunning);
        }

        let listener = bind_tokio_listener(addr)?;
        let local_addr = listener.local_addr().map_err(|source| RouterError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let router = build_router(&self.state, &state.routes, &state.native, &self.config)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let tracker = ConnectionTracker::new();
        let task = tokio::spawn(serve_connections(
            ENGINE_AXUM,
            listener,
            connection_builder(&self.config),
            router_service(router),
            tracker.clone(),
            stop_rx,
        ));

        state.server = Some(RunningServer {
            addr: local_addr,
            stop_tx,
            task,
            tracker,
        });
        tracing::info!(engine = ENGINE_AXUM, address = %local_addr, "router started");
        Ok(())
    }

    async fn shutdown(&self, grace: Duration) -> Result<()> {
        let server = self.state.write().server.take();
        let RunningServer {
            addr,
            stop_tx,
            mut task,
            tracker,
        } = server.ok_or(RouterError::NotRunning)?;

        tracing::info!(
            engine = ENGINE_AXUM,
            address = %addr,
            connections = tracker.active_count(),
            grace = ?grace,
            "router shutting down"
        );
        let _ = stop_tx.send(true);
        stop_task(ENGINE_AXUM, &mut task, grace).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.read().server.as_ref().map(|s| s.addr)
    }

    fn is_running(&self) -> bool {
        self.state.read().server.is_some()
    }
}

/// Wait for a serving task to finish within `grace`; abort it otherwise.
/// The task owns its connections, so aborting it cuts them off too.
/// Returns once the task is gone and its listener released.
pub(crate) async fn stop_task(engine: &'static str, task: &mut JoinHandle<()>, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, &mut *task).await {
        Ok(_) => {
            tracing::info!(engine, "router stopped");
            Ok(())
        }
        Err(_) => {
            task.abort();
            let _ = (&mut *task).await;
            tracing::warn!(engine, grace = ?grace, "drain timed out, connections cut off");
            Err(RouterError::ShutdownTimeout(grace))
        }
    }
}
