//! Shared utilities for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;

use message_gateway::adapters::{ENGINE_AXUM, ENGINE_AXUM_SERVER, ENGINE_HYPER, ENGINE_TINY_HTTP};
use message_gateway::config::RouterConfig;
use message_gateway::{handler_fn, middleware_fn, new_router_adapter, Handler, Middleware, RouterAdapter};

/// Every built-in engine.
pub const ENGINES: [&str; 4] = [ENGINE_AXUM, ENGINE_AXUM_SERVER, ENGINE_HYPER, ENGINE_TINY_HTTP];

pub fn config_for(engine: &str) -> RouterConfig {
    RouterConfig {
        engine_type: engine.to_string(),
        ..RouterConfig::default()
    }
}

pub fn adapter(engine: &str) -> Arc<dyn RouterAdapter> {
    adapter_with(config_for(engine))
}

pub fn adapter_with(config: RouterConfig) -> Arc<dyn RouterAdapter> {
    new_router_adapter(&config).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(body.into()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Handler answering 200 with a fixed text body.
pub fn text(body: &'static str) -> Arc<dyn Handler> {
    handler_fn(move |ctx| Box::pin(async move { ctx.text(StatusCode::OK, body) }))
}

/// Handler that sleeps, then answers 200 "done".
pub fn slow(delay: Duration) -> Arc<dyn Handler> {
    handler_fn(move |ctx| {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            ctx.text(StatusCode::OK, "done")
        })
    })
}

/// Shared event log for ordering assertions.
pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

/// Middleware recording `"<name>:before"` and `"<name>:after"` around next.
pub fn recording(name: &'static str, log: &Trace) -> Arc<dyn Middleware> {
    let log = log.clone();
    middleware_fn(move |ctx, next| {
        let log = log.clone();
        Box::pin(async move {
            log.lock().push(format!("{name}:before"));
            let outcome = next.run(ctx).await;
            log.lock().push(format!("{name}:after"));
            outcome
        })
    })
}

/// Client for real-socket tests: no proxy, no pooled connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
