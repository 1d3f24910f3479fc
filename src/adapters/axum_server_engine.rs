//! axum-server engine.
//!
//! Routes are mounted as tower services on an axum `Router` and served by
//! `axum-server`; the route itself is picked by the crate's [`PathRouter`],
//! as on the axum engine. Chain failures leave the route service as a
//! typed error and are rendered by a single centralized hook
//! (`HandleError`), which calls the adapter's current error handler.
//!
//! Native middleware receives the assembled `Router` and returns a wrapped
//! one, so anything expressible as a tower layer can be installed.

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::error_handling::HandleError;
use axum::http::{Request, Response};
use axum::Router;
use axum_server::Handle;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower::{service_fn, Service, ServiceExt};
use tower_http::catch_panic::CatchPanicLayer;

use crate::adapters::axum_engine::{
    check_axum_paths, group_by_shape, guarded_build, path_router, select, stop_task, Selected,
};
use crate::adapters::{error_response, native_mismatch, panic_response, RouterAdapter, ENGINE_AXUM_SERVER};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::error_handler::{default_error_handler, last_error, ErrorHandler};
use crate::http::handler::Handler;
use crate::http::middleware::{compose, panic_message, run_chain, Middleware};
use crate::net::bind_listener;
use crate::routing::{PathRouter, Route, RouteMeta, RouterGroup};

/// Native middleware for the axum-server engine: wraps the assembled router.
pub type AxumServerNativeMiddleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Poll interval while waiting for connections to drain.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// A failed chain, carried to the centralized error hook.
pub struct DispatchFailure {
    pub ctx: RouterContext,
    pub error: RouterError,
}

struct ServerState {
    routes: Vec<Route>,
    global: Vec<Arc<dyn Middleware>>,
    native: Vec<AxumServerNativeMiddleware>,
    error_handler: Arc<dyn ErrorHandler>,
    server: Option<RunningServer>,
}

struct RunningServer {
    addr: SocketAddr,
    handle: Handle,
    task: JoinHandle<()>,
}

type Shared = Arc<RwLock<ServerState>>;

async fn run_request(
    shared: Shared,
    paths: Arc<PathRouter>,
    shape: Option<Arc<str>>,
    request: Request<Body>,
) -> std::result::Result<Response<Body>, DispatchFailure> {
    let Selected {
        mut ctx,
        middlewares,
        handler,
    } = select(&paths, shape.as_deref(), request);
    let global = shared.read().global.clone();

    let chain = compose(&[&global[..], &middlewares[..]]);
    let outcome = run_chain(chain, handler, &mut ctx).await;
    match last_error(&mut ctx, outcome) {
        None => Ok(ctx.into_response()),
        Some(error) => Err(DispatchFailure { ctx, error }),
    }
}

/// A route service whose failures are rendered by the current error handler.
fn route_service(
    shared: Shared,
    paths: Arc<PathRouter>,
    shape: Option<Arc<str>>,
) -> impl Service<
    Request<Body>,
    Response = Response<Body>,
    Error = Infallible,
    Future = impl Future<Output = std::result::Result<Response<Body>, Infallible>> + Send + 'static,
> + Clone
       + Send
       + Sync
       + 'static {
    let hook_state = shared.clone();
    let routed = service_fn(move |request: Request<Body>| {
        run_request(shared.clone(), paths.clone(), shape.clone(), request)
    });
    HandleError::new(routed, move |failure: DispatchFailure| {
        let error_handler = hook_state.read().error_handler.clone();
        async move {
            let DispatchFailure { mut ctx, error } = failure;
            error_handler.handle_error(&mut ctx, error);
            ctx.into_response()
        }
    })
}

fn build_router(
    shared: &Shared,
    routes: &[Route],
    native: &[AxumServerNativeMiddleware],
    config: &RouterConfig,
) -> Result<Router> {
    let paths = path_router(routes)?;
    let groups = group_by_shape(routes);
    let mut router = guarded_build(|| {
        let mut router = Router::new();
        for group in groups {
            router = router.route_service(
                &group.axum_path,
                route_service(shared.clone(), paths.clone(), Some(group.shape)),
            );
        }
        router.fallback_service(route_service(shared.clone(), paths, None))
    })?;

    for wrap in native {
        let wrapped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| wrap(router.clone())));
        router = wrapped.map_err(|payload| {
            RouterError::Panic(format!(
                "native middleware failed to wrap the router: {}",
                panic_message(payload.as_ref())
            ))
        })?;
    }
    if config.engines.axum_server.catch_native_panics {
        router = router.layer(CatchPanicLayer::custom(panic_response));
    }
    Ok(router)
}

/// Adapter over axum-server.
pub struct AxumServerAdapter {
    config: RouterConfig,
    state: Shared,
    router_cache: Mutex<Option<Router>>,
}

impl AxumServerAdapter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RwLock::new(ServerState {
                routes: Vec::new(),
                global: Vec::new(),
                native: Vec::new(),
                error_handler: default_error_handler(),
                server: None,
            })),
            router_cache: Mutex::new(None),
        }
    }

    fn router(&self) -> Result<Router> {
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
impl RouterAdapter for AxumServerAdapter {
    fn engine_type(&self) -> &'static str {
        ENGINE_AXUM_SERVER
    }

    /// `Option<axum_server::Handle>`: the running server's handle.
    fn engine(&self) -> Box<dyn Any + Send> {
        let handle = self.state.read().server.as_ref().map(|s| s.handle.clone());
        Box::new(handle)
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

            tracing::debug!(engine = ENGINE_AXUM_SERVER, method = %route.method, path = route.path(), "route registered");
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
        let wrap = native
            .downcast::<AxumServerNativeMiddleware>()
            .map_err(|_| native_mismatch::<AxumServerNativeMiddleware>(ENGINE_AXUM_SERVER))?;
        self.state.write().native.push(*wrap);
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

        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr().map_err(|source| RouterError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let router = build_router(&self.state, &state.routes, &state.native, &self.config)?;

        let handle = Handle::new();
        let server = axum_server::from_tcp(listener).handle(handle.clone());
        let task = tokio::spawn(async move {
            if let Err(err) = server.serve(router.into_make_service()).await {
                tracing::error!(engine = ENGINE_AXUM_SERVER, error = %err, "server error");
            }
        });

        state.server = Some(RunningServer {
            addr: local_addr,
            handle,
            task,
        });
        tracing::info!(engine = ENGINE_AXUM_SERVER, address = %local_addr, "router started");
        Ok(())
    }

    async fn shutdown(&self, grace: Duration) -> Result<()> {
        let server = self.state.write().server.take();
        let RunningServer { addr, handle, mut task } = server.ok_or(RouterError::NotRunning)?;

        tracing::info!(engine = ENGINE_AXUM_SERVER, address = %addr, grace = ?grace, "router shutting down");
        handle.graceful_shutdown(Some(grace));

        let drained = tokio::time::timeout(grace, async {
            while handle.connection_count() > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        // axum-server closes leftover connections itself once `grace` passes.
        let stopped = stop_task(ENGINE_AXUM_SERVER, &mut task, DRAIN_POLL * 10).await;
        match drained {
            Ok(()) => stopped,
            Err(_) => {
                tracing::warn!(
                    engine = ENGINE_AXUM_SERVER,
                    connections = handle.connection_count(),
                    "drain deadline exceeded"
                );
                Err(RouterError::ShutdownTimeout(grace))
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.read().server.as_ref().map(|s| s.addr)
    }

    fn is_running(&self) -> bool {
        self.state.read().server.is_some()
    }
}
