//! Message gateway router core.
//!
//! One route table, middleware chain and shutdown sequence, served
//! unmodified by any of four HTTP engines.
//!
//! # Architecture Overview
//!
//! ```text
//!   RouterConfig ──▶ AdapterRegistry ──▶ Arc<dyn RouterAdapter>
//!                                           │
//!            routes / groups / middleware ──┤
//!                                           ▼
//!   ┌──────────────┬──────────────┬──────────────┬──────────────┐
//!   │     axum     │ axum-server  │    hyper     │  tiny-http   │
//!   └──────┬───────┴──────┬───────┴──────┬───────┴──────┬───────┘
//!          └──────────────┴──────┬───────┴──────────────┘
//!                                ▼
//!          RouterContext → middleware chain → handler
//!                                │
//!                                ▼ (on error)
//!                           ErrorHandler
//! ```

// Core subsystems
pub mod adapters;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use adapters::{new_router_adapter, must_new_router_adapter, AdapterRegistry, RouterAdapter};
pub use config::{GatewayConfig, RouterConfig};
pub use error::{Result, RouterError};
pub use http::{handler_fn, middleware_fn, ErrorHandler, Handler, Middleware, Next, RouterContext};
pub use lifecycle::{Lifecycle, LifecycleHook, RouterHook, Shutdown};
pub use routing::{RouteMeta, RouterGroup};
