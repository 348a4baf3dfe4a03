//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request
//! - Rewrite the forwarded path when a route strips its prefix
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan over routes sorted by priority, then prefix length
//! - Explicit `None` rather than a silent default backend

use axum::http::request::Parts;

use crate::config::schema::RouteConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    name: String,
    backend: String,
    priority: u32,
    strip_prefix: bool,
    path: PathPrefixMatcher,
    matcher: AndMatcher,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Self {
        let path = PathPrefixMatcher::new(config.path_prefix.clone());
        let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(path.clone())];
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }

        Self {
            name: config.name.clone(),
            backend: config.backend.clone(),
            priority: config.priority,
            strip_prefix: config.strip_prefix,
            path,
            matcher: AndMatcher::new(matchers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the backend this route forwards to.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Path and query to send to the backend.
    pub fn forward_path_and_query(&self, parts: &Parts) -> String {
        let path = parts.uri.path();
        let path = match self.path.remainder(path) {
            Some(rest) if self.strip_prefix => {
                if rest.is_empty() {
                    "/"
                } else {
                    rest
                }
            }
            _ => path,
        };

        match parts.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        }
    }
}

/// Ordered, immutable set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(configs: &[RouteConfig]) -> Self {
        let mut routes: Vec<Route> = configs.iter().map(Route::from_config).collect();
        // Stable: equal keys keep declaration order.
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.path.prefix().len().cmp(&a.path.prefix().len()))
        });
        Self { routes }
    }

    /// First matching route, if any.
    pub fn match_request(&self, parts: &Parts) -> Option<&Route> {
        self.routes.iter().find(|route| route.matcher.matches(parts))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
