//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     hooks start in registration order → router hook last (traffic only when ready)
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → hooks stop in reverse order
//!     → router drains first → dependent resources close after
//! ```
//!
//! # Design Decisions
//! - Fail fast on start: a failed hook stops the hooks already started
//! - Stop never short-circuits: every hook gets its stop call, the first
//!   error is reported
//! - Each hook's stop is bounded by the shared grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{shutdown_signal, spawn_signal_listener};
pub use startup::{Lifecycle, LifecycleHook, RouterHook};
