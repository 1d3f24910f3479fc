//! Route lookup for engines without a router of their own.
//!
//! # Responsibilities
//! - Store compiled routes per method
//! - Look up the route for a request, binding path parameters
//! - Tell 404 (no route for the path) apart from 405 (path exists under
//!   other methods)
//!
//! # Design Decisions
//! - Linear scan per method, first registered match wins
//! - The 405 pass ignores the method and collects every method whose
//!   pattern matches, sorted for a stable `Allow` header
//! - Explicit miss results rather than a silent default

use std::collections::HashMap;

use axum::http::Method;

use crate::error::{Result, RouterError};
use crate::routing::meta::Route;

/// Result of a route lookup.
#[derive(Debug)]
pub enum RouteLookup {
    Found {
        route: Route,
        params: HashMap<String, String>,
    },
    MethodNotAllowed {
        allowed: Vec<String>,
    },
    NotFound,
}

impl RouteLookup {
    /// The routing error for a miss, `None` when a route was found.
    pub fn miss_error(&self, method: &Method, path: &str) -> Option<RouterError> {
        match self {
            RouteLookup::Found { .. } => None,
            RouteLookup::MethodNotAllowed { allowed } => Some(RouterError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
                allowed: allowed.clone(),
            }),
            RouteLookup::NotFound => Some(RouterError::NotFound {
                method: method.to_string(),
                path: path.to_string(),
            }),
        }
    }
}

/// Regex-backed method + path router.
#[derive(Debug, Default, Clone)]
pub struct PathRouter {
    routes: HashMap<Method, Vec<Route>>,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Fails when a route with the same method and shape exists.
    pub fn insert(&mut self, route: Route) -> Result<()> {
        let bucket = self.routes.entry(route.method.clone()).or_default();
        if bucket.iter().any(|existing| existing.conflicts_with(&route)) {
            return Err(route.conflict_error());
        }
        bucket.push(route);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flatten()
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteLookup {
        if let Some(bucket) = self.routes.get(method) {
            for route in bucket {
                if let Some(params) = route.pattern.captures(path) {
                    return RouteLookup::Found {
                        route: route.clone(),
                        params,
                    };
                }
            }
        }

        let mut allowed: Vec<String> = self
            .routes
            .iter()
            .filter(|(m, _)| *m != method)
            .filter(|(_, bucket)| bucket.iter().any(|r| r.pattern.is_match(path)))
            .map(|(m, _)| m.to_string())
            .collect();
        if allowed.is_empty() {
            return RouteLookup::NotFound;
        }
        allowed.sort();
        RouteLookup::MethodNotAllowed { allowed }
    }
}
