//! HTTP abstraction shared by every engine.
//!
//! # Data Flow
//! ```text
//! native request (axum / hyper / tiny_http)
//!     → context.rs (RouterContext: request, params, data, scope)
//!     → middleware/ (global → group → route)
//!     → handler.rs (business handler)
//!     → error_handler.rs (only when the chain failed)
//!     → response.rs (write-once buffered response)
//!     → native response
//! ```

pub mod context;
pub mod error_handler;
pub mod handler;
pub mod middleware;
pub mod request;
pub mod response;

pub use context::RouterContext;
pub use error_handler::{default_error_handler, ErrorHandler, JsonErrorHandler};
pub use handler::{handler_fn, Handler};
pub use middleware::{compose, middleware_fn, Chain, Middleware, Next};
pub use request::RequestContext;
pub use response::{ResponseBody, ResponseState};
