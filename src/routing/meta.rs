//! Route registration metadata.

use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::error::{Result, RouterError};
use crate::http::handler::Handler;
use crate::http::middleware::{compose, Chain, Middleware};
use crate::routing::matcher::RoutePattern;

/// One `(method, path, handler, middlewares)` registration.
#[derive(Clone, Default)]
pub struct RouteMeta {
    pub method: String,
    pub path: String,
    pub handler: Option<Arc<dyn Handler>>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl RouteMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            handler: Some(handler),
            middlewares: Vec::new(),
        }
    }

    /// Append a route-level middleware (innermost).
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Validate and compile into a dispatchable [`Route`].
    pub fn compile(self) -> Result<Route> {
        let method_str = self.method.trim();
        if method_str.is_empty() {
            return Err(RouterError::InvalidRoute(format!("empty method for path '{}'", self.path)));
        }
        if self.path.is_empty() {
            return Err(RouterError::InvalidRoute(format!("empty path for method {}", method_str)));
        }
        let method = Method::from_bytes(method_str.to_ascii_uppercase().as_bytes()).map_err(|_| {
            RouterError::InvalidRoute(format!("'{}' is not a valid HTTP method", method_str))
        })?;
        let handler = self.handler.ok_or_else(|| {
            RouterError::InvalidRoute(format!("no handler for {} {}", method, self.path))
        })?;
        let pattern = RoutePattern::compile(&self.path)?;

        Ok(Route {
            method,
            pattern,
            handler,
            middlewares: compose(&[&self.middlewares]),
        })
    }
}

impl fmt::Debug for RouteMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMeta")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler.is_some())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// A validated, compiled route.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: RoutePattern,
    pub handler: Arc<dyn Handler>,
    pub middlewares: Chain,
}

impl Route {
    pub fn path(&self) -> &str {
        self.pattern.template()
    }

    /// Two routes conflict when they share a method and match the same paths.
    pub fn conflicts_with(&self, other: &Route) -> bool {
        self.method == other.method && self.pattern.shape() == other.pattern.shape()
    }

    pub(crate) fn conflict_error(&self) -> RouterError {
        RouterError::RouteConflict {
            method: self.method.to_string(),
            path: self.path().to_string(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Join a group prefix and a route path: `("/api/", "/sms")` -> `"/api/sms"`.
pub fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        return if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        };
    }
    if path.starts_with('/') {
        format!("{}{}", prefix, path)
    } else {
        format!("{}/{}", prefix, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;

    fn ok() -> Arc<dyn Handler> {
        handler_fn(|_ctx| Box::pin(async move { Ok(()) }))
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/api", "/sms"), "/api/sms");
        assert_eq!(join_paths("/api/", "/sms"), "/api/sms");
        assert_eq!(join_paths("/api", "sms"), "/api/sms");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(join_paths("", "/sms"), "/sms");
        assert_eq!(join_paths("/", "/"), "/");
    }

    #[test]
    fn test_compile_normalizes_method() {
        let route = RouteMeta::new("get", "/sms/:id", ok()).compile().unwrap();
        assert_eq!(route.method, Method::GET);
        assert_eq!(route.path(), "/sms/:id");
    }

    #[test]
    fn test_compile_rejects_incomplete_meta() {
        let missing_handler = RouteMeta {
            method: "GET".into(),
            path: "/sms".into(),
            ..Default::default()
        };
        assert!(matches!(missing_handler.compile(), Err(RouterError::InvalidRoute(_))));
        assert!(matches!(RouteMeta::new("", "/sms", ok()).compile(), Err(RouterError::InvalidRoute(_))));
        assert!(matches!(RouteMeta::new("GET", "", ok()).compile(), Err(RouterError::InvalidRoute(_))));
        assert!(matches!(RouteMeta::new("GE T", "/sms", ok()).compile(), Err(RouterError::InvalidRoute(_))));
        assert!(matches!(RouteMeta::new("GET", "sms", ok()).compile(), Err(RouterError::InvalidRoute(_))));
    }

    #[test]
    fn test_conflicts_ignore_param_names() {
        let a = RouteMeta::new("GET", "/sms/:id", ok()).compile().unwrap();
        let b = RouteMeta::new("GET", "/sms/:sid", ok()).compile().unwrap();
        let c = RouteMeta::new("POST", "/sms/:id", ok()).compile().unwrap();
        assert!(a.conflicts_with(&b));
        assert!(!a.conflicts_with(&c));
    }
}
