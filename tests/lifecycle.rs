//! Start/stop behaviour on real sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use parking_lot::Mutex;

use message_gateway::adapters::{ENGINE_HYPER, ENGINE_TINY_HTTP};
use message_gateway::net::PeerInfo;
use message_gateway::{handler_fn, Lifecycle, LifecycleHook, RouterError, RouterHook};

mod common;
use common::*;

const LOOPBACK: &str = "127.0.0.1:0";

fn url(adapter: &dyn message_gateway::RouterAdapter, path: &str) -> String {
    format!("http://{}{}", adapter.local_addr().unwrap(), path)
}

#[tokio::test]
async fn test_start_serve_stop() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.get("/ping", text("pong")).unwrap();
        assert!(!adapter.is_running());

        adapter.start(LOOPBACK).await.unwrap();
        assert!(adapter.is_running(), "engine {engine}");
        assert_ne!(adapter.local_addr().unwrap().port(), 0, "engine {engine}");

        let response = client().get(url(adapter.as_ref(), "/ping")).send().await.unwrap();
        assert_eq!(response.status(), 200, "engine {engine}");
        assert_eq!(response.text().await.unwrap(), "pong", "engine {engine}");

        let response = client().get(url(adapter.as_ref(), "/nope")).send().await.unwrap();
        assert_eq!(response.status(), 404, "engine {engine}");
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND", "engine {engine}");

        let err = adapter.start(LOOPBACK).await.unwrap_err();
        assert!(matches!(err, RouterError::AlreadyRunning), "engine {engine}");

        adapter.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(!adapter.is_running(), "engine {engine}");
        assert!(adapter.local_addr().is_none(), "engine {engine}");

        let err = adapter.shutdown(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RouterError::NotRunning), "engine {engine}");
    }
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let taken = std::net::TcpListener::bind(LOOPBACK).unwrap();
    let addr = taken.local_addr().unwrap().to_string();
    for engine in ENGINES {
        let adapter = adapter(engine);
        let err = adapter.start(&addr).await.unwrap_err();
        assert!(matches!(err, RouterError::Bind { .. }), "engine {engine}: {err}");
        assert!(!adapter.is_running(), "engine {engine}");
    }
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_requests() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.get("/slow", slow(Duration::from_millis(300))).unwrap();
        adapter.start(LOOPBACK).await.unwrap();

        let in_flight = tokio::spawn(client().get(url(adapter.as_ref(), "/slow")).send());
        tokio::time::sleep(Duration::from_millis(100)).await;

        adapter.shutdown(Duration::from_secs(5)).await.unwrap();
        let response = in_flight.await.unwrap().unwrap();
        assert_eq!(response.status(), 200, "engine {engine}");
        assert_eq!(response.text().await.unwrap(), "done", "engine {engine}");
    }
}

#[tokio::test]
async fn test_shutdown_timeout_cuts_off_handlers() {
    for engine in ENGINES {
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let adapter = adapter(engine);
        adapter
            .get(
                "/stuck",
                handler_fn(move |ctx| {
                    let flag = flag.clone();
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        flag.store(true, Ordering::SeqCst);
                        ctx.text(StatusCode::OK, "done")
                    })
                }),
            )
            .unwrap();
        adapter.start(LOOPBACK).await.unwrap();

        let in_flight = tokio::spawn(client().get(url(adapter.as_ref(), "/stuck")).send());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let err = adapter.shutdown(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, RouterError::ShutdownTimeout(_)), "engine {engine}: {err}");
        assert!(started.elapsed() < Duration::from_secs(3), "engine {engine}");
        assert!(!adapter.is_running(), "engine {engine}");

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(!completed.load(Ordering::SeqCst), "engine {engine}: handler ran past shutdown");
        in_flight.abort();
    }
}

/// Stand-in for a connection pool the handlers depend on.
struct Pool {
    open: AtomicBool,
    stop_started: Mutex<Option<Instant>>,
}

#[async_trait]
impl LifecycleHook for Pool {
    fn name(&self) -> &str {
        "pool"
    }

    async fn start(&self) -> message_gateway::Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _grace: Duration) -> message_gateway::Result<()> {
        *self.stop_started.lock() = Some(Instant::now());
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Records when the wrapped hook finished stopping.
struct Timed {
    inner: RouterHook,
    stopped: Mutex<Option<Instant>>,
}

#[async_trait]
impl LifecycleHook for Timed {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn start(&self) -> message_gateway::Result<()> {
        self.inner.start().await
    }

    async fn stop(&self, grace: Duration) -> message_gateway::Result<()> {
        let outcome = self.inner.stop(grace).await;
        *self.stopped.lock() = Some(Instant::now());
        outcome
    }
}

#[tokio::test]
async fn test_router_stops_before_dependent_resources() {
    for engine in ENGINES {
        let pool = Arc::new(Pool {
            open: AtomicBool::new(false),
            stop_started: Mutex::new(None),
        });

        let adapter = adapter(engine);
        let handler_pool = pool.clone();
        adapter
            .get(
                "/sms",
                handler_fn(move |ctx| {
                    let pool = handler_pool.clone();
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        if !pool.open.load(Ordering::SeqCst) {
                            return Err(RouterError::http(StatusCode::SERVICE_UNAVAILABLE, "pool closed"));
                        }
                        ctx.text(StatusCode::OK, "sent")
                    })
                }),
            )
            .unwrap();

        let router = Arc::new(Timed {
            inner: RouterHook::new(adapter.clone(), LOOPBACK),
            stopped: Mutex::new(None),
        });
        let mut lifecycle = Lifecycle::new(Duration::from_secs(5));
        lifecycle.append(pool.clone()).append(router.clone());
        lifecycle.start().await.unwrap();

        let in_flight = tokio::spawn(client().get(url(adapter.as_ref(), "/sms")).send());
        tokio::time::sleep(Duration::from_millis(100)).await;
        lifecycle.stop().await.unwrap();

        let response = in_flight.await.unwrap().unwrap();
        assert_eq!(response.status(), 200, "engine {engine}");

        let router_done = router.stopped.lock().unwrap();
        let pool_stop = pool.stop_started.lock().unwrap();
        assert!(router_done <= pool_stop, "engine {engine}: router must finish draining first");
    }
}

#[tokio::test]
async fn test_socket_engines_expose_peer_info() {
    for engine in [ENGINE_HYPER, ENGINE_TINY_HTTP] {
        let adapter = adapter(engine);
        adapter
            .get(
                "/whoami",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let ip = ctx
                            .native::<PeerInfo>()
                            .and_then(|peer| peer.remote_addr)
                            .map(|addr| addr.ip().to_string())
                            .unwrap_or_default();
                        ctx.text(StatusCode::OK, ip)
                    })
                }),
            )
            .unwrap();
        adapter.start(LOOPBACK).await.unwrap();

        let response = client().get(url(adapter.as_ref(), "/whoami")).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "127.0.0.1", "engine {engine}");
        adapter.shutdown(Duration::from_secs(2)).await.unwrap();
    }
}
