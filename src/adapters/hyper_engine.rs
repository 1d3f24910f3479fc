//! Bare hyper engine.
//!
//! # Responsibilities
//! - Accept TCP connections and serve each with hyper's `http1` builder
//! - Route with the crate's own [`PathRouter`] (404/405 included)
//! - Track connections and drain them on shutdown
//!
//! # Design Decisions
//! - One tokio task per connection, held in a `JoinSet` owned by the
//!   accept loop; stopping the loop joins every connection. The axum
//!   engine serves its router through the same loop
//! - Shutdown is a `watch` flag: the accept loop stops and every
//!   connection switches to hyper's graceful shutdown (finish the
//!   in-flight request, then close)
//! - Native middleware sees the request before routing and may answer it

use std::any::Any;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::adapters::axum_engine::stop_task;
use crate::adapters::{dispatch, native_mismatch, panic_response, MissHandler, RouterAdapter, ENGINE_HYPER};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::http::context::RouterContext;
use crate::http::error_handler::{default_error_handler, ErrorHandler};
use crate::http::handler::Handler;
use crate::http::middleware::{compose, Middleware};
use crate::net::{bind_tokio_listener, ConnectionTracker, PeerInfo};
use crate::routing::{PathRouter, RouteLookup, RouteMeta, RouterGroup};

/// Native middleware for the hyper engine. Runs before routing; returning
/// a response answers the request without entering the chain.
pub type HyperNativeMiddleware = Arc<dyn Fn(&mut Request<Body>) -> Option<Response<Body>> + Send + Sync>;

/// hyper refuses read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8192;

struct HyperState {
    router: PathRouter,
    global: Vec<Arc<dyn Middleware>>,
    native: Vec<HyperNativeMiddleware>,
    error_handler: Arc<dyn ErrorHandler>,
    server: Option<RunningServer>,
}

struct RunningServer {
    addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    tracker: ConnectionTracker,
}

type Shared = Arc<RwLock<HyperState>>;

fn connection_builder(config: &RouterConfig) -> http1::Builder {
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(Duration::from_secs(config.read_header_timeout_secs))
        .keep_alive(config.engines.hyper.keep_alive)
        .half_close(config.engines.hyper.half_close)
        .max_buf_size(config.max_header_bytes.max(MIN_BUF_SIZE));
    builder
}

/// Run native middleware, route, and dispatch one request.
async fn handle_request(shared: Shared, mut request: Request<Body>, peer: PeerInfo) -> Response<Body> {
    let native = shared.read().native.clone();
    for middleware in &native {
        match std::panic::catch_unwind(AssertUnwindSafe(|| middleware(&mut request))) {
            Ok(None) => {}
            Ok(Some(response)) => return response,
            Err(payload) => return panic_response(payload),
        }
    }

    let (lookup, global, error_handler) = {
        let state = shared.read();
        (
            state.router.lookup(request.method(), request.uri().path()),
            state.global.clone(),
            state.error_handler.clone(),
        )
    };

    let (chain, handler, params): (_, Arc<dyn Handler>, _) = match lookup {
        RouteLookup::Found { route, params } => {
            (compose(&[&global[..], &route.middlewares[..]]), route.handler, params)
        }
        miss => (compose(&[&global[..]]), Arc::new(MissHandler::from_lookup(miss)), HashMap::new()),
    };

    let mut ctx = RouterContext::new(request).with_params(params).with_native(peer);
    dispatch(&mut ctx, chain, handler, error_handler.as_ref()).await;
    ctx.into_response()
}

/// Per-request entry point of a connection-serving loop.
pub(crate) type ConnectionService =
    Arc<dyn Fn(Request<Body>, PeerInfo) -> BoxFuture<'static, Response<Body>> + Send + Sync>;

/// Accept connections until `stop` flips, serving each with `builder` in a
/// task of this loop's `JoinSet`. Once stopped, every connection finishes
/// its in-flight request and closes; dropping the loop aborts the rest.
pub(crate) async fn serve_connections(
    engine: &'static str,
    listener: TcpListener,
    builder: http1::Builder,
    service: ConnectionService,
    tracker: ConnectionTracker,
    mut stop: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(engine, error = %err, "accept failed");
                        continue;
                    }
                };

                let guard = tracker.track();
                let peer = PeerInfo {
                    remote_addr: Some(remote_addr),
                    connection_id: Some(guard.id()),
                };
                tracing::trace!(connection_id = %guard.id(), peer = %remote_addr, "connection accepted");

                let builder = builder.clone();
                let service = service.clone();
                let mut stop = stop.clone();
                connections.spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let response = service(request.map(Body::new), peer);
                        async move { Ok::<_, Infallible>(response.await) }
                    });
                    let conn = builder.serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        _ = stop.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.as_mut().await
                        }
                    };
                    if let Err(err) = result {
                        tracing::debug!(connection_id = %guard.id(), error = %err, "connection error");
                    }
                    drop(guard);
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// Adapter over bare hyper connections.
pub struct HyperAdapter {
    config: RouterConfig,
    state: Shared,
}

impl HyperAdapter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RwLock::new(HyperState {
                router: PathRouter::new(),
                global: Vec::new(),
                native: Vec::new(),
                error_handler: default_error_handler(),
                server: None,
            })),
        }
    }

    /// Connections currently open. Zero when stopped.
    pub fn active_connections(&self) -> u64 {
        self.state
            .read()
            .server
            .as_ref()
            .map(|s| s.tracker.active_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RouterAdapter for HyperAdapter {
    fn engine_type(&self) -> &'static str {
        ENGINE_HYPER
    }

    /// The configured `hyper::server::conn::http1::Builder`.
    fn engine(&self) -> Box<dyn Any + Send> {
        Box::new(connection_builder(&self.config))
    }

    fn register_route(&self, meta: RouteMeta) -> Result<()> {
        let route = meta.compile()?;
        tracing::debug!(engine = ENGINE_HYPER, method = %route.method, path = route.path(), "route registered");
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
            .downcast::<HyperNativeMiddleware>()
            .map_err(|_| native_mismatch::<HyperNativeMiddleware>(ENGINE_HYPER))?;
        self.state.write().native.push(*middleware);
        Ok(())
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.state.write().error_handler = handler;
    }

    async fn serve_http(&self, request: Request<Body>) -> Response<Body> {
        let peer = PeerInfo {
            remote_addr: None,
            connection_id: None,
        };
        handle_request(self.state.clone(), request, peer).await
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

        let (stop_tx, stop_rx) = watch::channel(false);
        let tracker = ConnectionTracker::new();
        let shared = self.state.clone();
        let service: ConnectionService =
            Arc::new(move |request: Request<Body>, peer: PeerInfo| handle_request(shared.clone(), request, peer).boxed());
        let task = tokio::spawn(serve_connections(
            ENGINE_HYPER,
            listener,
            connection_builder(&self.config),
            service,
            tracker.clone(),
            stop_rx,
        ));

        state.server = Some(RunningServer {
            addr: local_addr,
            stop_tx,
            task,
            tracker,
        });
        tracing::info!(engine = ENGINE_HYPER, address = %local_addr, "router started");
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
            engine = ENGINE_HYPER,
            address = %addr,
            connections = tracker.active_count(),
            grace = ?grace,
            "router shutting down"
        );
        let _ = stop_tx.send(true);
        stop_task(ENGINE_HYPER, &mut task, grace).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.read().server.as_ref().map(|s| s.addr)
    }

    fn is_running(&self) -> bool {
        self.state.read().server.is_some()
    }
}
