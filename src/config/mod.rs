//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → RouterConfig handed to the adapter registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AxumEngineConfig, EngineConfigs, GatewayConfig, GzipConfig, HyperEngineConfig, ObservabilityConfig,
    RouterConfig, TinyHttpEngineConfig,
};
pub use validation::{validate_config, validate_router_config, ValidationError};
