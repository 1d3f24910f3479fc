//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! RouterAdapter::start(addr)
//!     → listener.rs (resolve, bind, non-blocking)
//!     → engine accept loop
//!     → connection.rs (in-flight tracking)
//!     → RouterAdapter::shutdown(grace) drains the tracker
//! ```
//!
//! # Design Decisions
//! - Binding is synchronous so bind errors surface from `start`
//! - Each connection or request is tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, PeerInfo};
pub use listener::{bind_listener, bind_tokio_listener, resolve};
