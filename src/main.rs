//! Message gateway server.
//!
//! Builds the configured router engine, mounts the gateway's HTTP surface
//! and serves it until SIGINT / SIGTERM, then drains the router before the
//! resources behind it close.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use clap::Parser;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use message_gateway::config::{load_config, GatewayConfig};
use message_gateway::error::{Result, RouterError};
use message_gateway::http::middleware::{RequestIdMiddleware, RequestLogger, Timeout};
use message_gateway::lifecycle::{spawn_signal_listener, Lifecycle, LifecycleHook, RouterHook, Shutdown};
use message_gateway::observability::init_logging;
use message_gateway::{handler_fn, new_router_adapter, Handler, RouterAdapter};

#[derive(Parser)]
#[command(name = "message-gateway")]
#[command(about = "Message gateway API server", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the router engine (axum, axum-server, hyper, tiny-http).
    #[arg(short, long)]
    engine: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    id: u64,
    to: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    to: String,
    body: String,
}

/// In-memory outbox standing in for the message store.
#[derive(Default)]
struct Outbox {
    messages: RwLock<Vec<Message>>,
    open: RwLock<bool>,
}

#[async_trait]
impl LifecycleHook for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn start(&self) -> Result<()> {
        *self.open.write() = true;
        Ok(())
    }

    async fn stop(&self, _grace: Duration) -> Result<()> {
        *self.open.write() = false;
        tracing::info!(messages = self.messages.read().len(), "outbox closed");
        Ok(())
    }
}

fn unavailable() -> RouterError {
    RouterError::http(StatusCode::SERVICE_UNAVAILABLE, "outbox is closed").with_code("OUTBOX_CLOSED")
}

fn send_message(outbox: Arc<Outbox>) -> Arc<dyn Handler> {
    handler_fn(move |ctx| {
        let outbox = outbox.clone();
        Box::pin(async move {
            if !*outbox.open.read() {
                return Err(unavailable());
            }
            let body = ctx.body_bytes().await?;
            let request: SendRequest = serde_json::from_slice(&body)
                .map_err(|err| RouterError::http(StatusCode::BAD_REQUEST, format!("invalid message: {err}")))?;

            let message = {
                let mut messages = outbox.messages.write();
                let message = Message {
                    id: messages.len() as u64 + 1,
                    to: request.to,
                    body: request.body,
                };
                messages.push(message.clone());
                message
            };
            tracing::info!(id = message.id, to = %message.to, "message queued");
            ctx.json(StatusCode::CREATED, &message)
        })
    })
}

fn get_message(outbox: Arc<Outbox>) -> Arc<dyn Handler> {
    handler_fn(move |ctx| {
        let outbox = outbox.clone();
        Box::pin(async move {
            let id: u64 = ctx
                .param("id")
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| RouterError::http(StatusCode::BAD_REQUEST, "message id must be a number"))?;
            let found = outbox.messages.read().iter().find(|m| m.id == id).cloned();
            match found {
                Some(message) => ctx.json(StatusCode::OK, &message),
                None => Err(RouterError::http(StatusCode::NOT_FOUND, format!("message {id} not found"))),
            }
        })
    })
}

fn mount(adapter: &dyn RouterAdapter, outbox: Arc<Outbox>, request_timeout: Duration) -> Result<()> {
    adapter.register_middleware(Arc::new(RequestIdMiddleware::new()))?;
    adapter.register_middleware(Arc::new(RequestLogger::new()))?;

    adapter.handle(
        "GET",
        "/healthz",
        handler_fn(|ctx| Box::pin(async move { ctx.json(StatusCode::OK, &serde_json::json!({"status": "ok"})) })),
    )?;

    let api = adapter.register_group("/api/v1", vec![Arc::new(Timeout::new(request_timeout))]);
    let sms = api.group("/sms", Vec::new());
    sms.post("", send_message(outbox.clone()))?;
    sms.get("/:id", get_message(outbox))?;
    Ok(())
}

fn load(cli: &Cli) -> std::result::Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(engine) = &cli.engine {
        config.router.engine_type = engine.clone();
    }
    if let Some(port) = cli.port {
        config.router.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;
    init_logging(&config.observability.log_level, config.observability.json_logs);

    tracing::info!(
        engine = %config.router.engine_type,
        port = config.router.port,
        compression = config.router.enable_compression,
        "message-gateway v0.1.0 starting"
    );

    let adapter = new_router_adapter(&config.router)?;
    let outbox = Arc::new(Outbox::default());
    mount(
        adapter.as_ref(),
        outbox.clone(),
        Duration::from_secs(config.router.write_timeout_secs),
    )?;

    // The router is appended last so it stops first.
    let mut lifecycle = Lifecycle::new(Duration::from_secs(config.shutdown_grace_secs));
    lifecycle
        .append(outbox)
        .append(Arc::new(RouterHook::new(adapter, config.router.listen_addr())));

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());
    lifecycle.run(&shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
