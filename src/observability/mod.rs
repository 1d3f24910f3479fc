//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! adapters, middleware, lifecycle
//!     → tracing macros with structured fields
//!     → logging.rs (EnvFilter + fmt or JSON layer)
//!     → stdout
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the access log
//! - `RUST_LOG` overrides the configured level

pub mod logging;

pub use logging::init_logging;
