//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML, and every
//! struct defaults its fields so minimal files work.

use serde::{Deserialize, Serialize};

use crate::adapters::ENGINE_AXUM;
use crate::http::middleware::gzip::{DEFAULT_EXCLUDED_EXTENSIONS, DEFAULT_MIN_SIZE};

/// Root configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP router settings.
    pub router: RouterConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,

    /// Time allowed for in-flight requests to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown_grace_secs: 10,
        }
    }
}

/// Router adapter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Engine id: "axum", "axum-server", "hyper" or "tiny-http".
    /// Empty selects the default engine.
    pub engine_type: String,

    /// Listen port, 1-65535.
    pub port: u32,

    /// Time allowed to read a whole request.
    pub read_timeout_secs: u64,

    /// Time allowed to produce a response. Enforced by the `Timeout`
    /// middleware the binary mounts, the same way on every engine.
    pub write_timeout_secs: u64,

    /// Keep-alive idle time between requests.
    pub idle_timeout_secs: u64,

    /// Time allowed to read request headers.
    pub read_header_timeout_secs: u64,

    /// Upper bound for request header bytes.
    pub max_header_bytes: usize,

    /// Install the gzip middleware.
    pub enable_compression: bool,

    /// Gzip level: -1 for the default, or 1-9.
    pub compression_level: i32,

    /// Gzip tuning.
    pub gzip: GzipConfig,

    /// Request body limit in bytes; 0 disables the limit.
    pub body_limit_bytes: u64,

    /// Engine-specific settings.
    pub engines: EngineConfigs,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            engine_type: ENGINE_AXUM.to_string(),
            port: 8080,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            idle_timeout_secs: 120,
            read_header_timeout_secs: 10,
            max_header_bytes: 1 << 20,
            enable_compression: false,
            compression_level: -1,
            gzip: GzipConfig::default(),
            body_limit_bytes: 0,
            engines: EngineConfigs::default(),
        }
    }
}

impl RouterConfig {
    /// `0.0.0.0:<port>`.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Gzip middleware tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GzipConfig {
    /// Bodies below this many bytes are sent uncompressed.
    pub min_size: usize,

    /// Path prefixes that are never compressed.
    pub excluded_paths: Vec<String>,

    /// File extensions that are never compressed.
    pub excluded_extensions: Vec<String>,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            excluded_paths: Vec::new(),
            excluded_extensions: DEFAULT_EXCLUDED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Per-engine knobs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfigs {
    pub axum: AxumEngineConfig,
    pub axum_server: AxumEngineConfig,
    pub hyper: HyperEngineConfig,
    pub tiny_http: TinyHttpEngineConfig,
}

/// Settings shared by the axum-based engines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AxumEngineConfig {
    /// Convert panics in native middleware into 500 responses.
    pub catch_native_panics: bool,
}

impl Default for AxumEngineConfig {
    fn default() -> Self {
        Self {
            catch_native_panics: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HyperEngineConfig {
    /// Serve more than one request per connection.
    pub keep_alive: bool,

    /// Keep the connection open after the client half-closes.
    pub half_close: bool,
}

impl Default for HyperEngineConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            half_close: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TinyHttpEngineConfig {
    /// How often the accept thread checks for shutdown.
    pub poll_interval_ms: u64,
}

impl Default for TinyHttpEngineConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 50 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
