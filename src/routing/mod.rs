//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration:
//!     RouteMeta (method, path, handler, middlewares)
//!     → meta.rs (validate method/path/handler)
//!     → matcher.rs (compile template to anchored regex)
//!     → Route stored by the adapter
//!
//! Lookup (hyper / tiny_http engines):
//!     (method, path)
//!     → router.rs (per-method linear scan)
//!     → Found { route, params } | MethodNotAllowed { allowed } | NotFound
//! ```
//!
//! # Design Decisions
//! - Templates compiled once at registration, immutable afterwards
//! - First match wins, in registration order
//! - Groups only rewrite registrations; they add no lookup cost

pub mod group;
pub mod matcher;
pub mod meta;
pub mod router;

pub use group::RouterGroup;
pub use matcher::RoutePattern;
pub use meta::{join_paths, Route, RouteMeta};
pub use router::{PathRouter, RouteLookup};
