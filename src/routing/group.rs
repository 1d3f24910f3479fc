//! Prefixed route registration.

use std::sync::Arc;

use crate::adapters::RouterAdapter;
use crate::error::Result;
use crate::http::handler::Handler;
use crate::http::middleware::Middleware;
use crate::routing::meta::{join_paths, RouteMeta};

/// Registers routes under a shared prefix and middleware list.
///
/// Group middleware runs after the adapter's global middleware and before
/// route-level middleware. Nested groups run parent middleware first.
pub struct RouterGroup<'a> {
    adapter: &'a dyn RouterAdapter,
    prefix: String,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl<'a> RouterGroup<'a> {
    pub fn new(adapter: &'a dyn RouterAdapter, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            adapter,
            prefix: join_paths("", prefix),
            middlewares,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    /// Add a middleware for routes registered after this call.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Nested group; its middleware runs after this group's.
    pub fn group(&self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> RouterGroup<'a> {
        let mut combined = self.middlewares.clone();
        combined.extend(middlewares);
        RouterGroup {
            adapter: self.adapter,
            prefix: join_paths(&self.prefix, prefix),
            middlewares: combined,
        }
    }

    /// Register `meta` with the group prefix and middleware applied.
    pub fn register_route(&self, meta: RouteMeta) -> Result<()> {
        let mut middlewares = self.middlewares.clone();
        middlewares.extend(meta.middlewares);
        self.adapter.register_route(RouteMeta {
            method: meta.method,
            path: join_paths(&self.prefix, &meta.path),
            handler: meta.handler,
            middlewares,
        })
    }

    pub fn handle(&self, method: &str, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.register_route(RouteMeta::new(method, path, handler))
    }

    pub fn get(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("GET", path, handler)
    }

    pub fn post(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("POST", path, handler)
    }

    pub fn put(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("PUT", path, handler)
    }

    pub fn patch(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("PATCH", path, handler)
    }

    pub fn delete(&self, path: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.handle("DELETE", path, handler)
    }
}
