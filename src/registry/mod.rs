//! Service registry.
//!
//! # Responsibilities
//! - Map backend names to runtime [`Backend`] entries
//! - Reject duplicate registrations
//! - Serve lookups for the dispatcher and the health aggregator
//!
//! # Design Decisions
//! - Registration takes `&mut self`; the registry is complete before it is
//!   wrapped in an `Arc`, so serving-time reads take no lock
//! - Each backend owns exactly one breaker, never replaced

pub mod backend;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::schema::BackendConfig;
use crate::observability::MetricsRecorder;

pub use backend::Backend;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("backend '{0}' is already registered")]
    DuplicateBackend(String),

    #[error("backend '{0}' not found")]
    BackendNotFound(String),

    #[error("backend '{name}' has an invalid url: {reason}")]
    InvalidUrl { name: String, reason: String },
}

/// Name → backend map, immutable once shared.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    backends: HashMap<String, Arc<Backend>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one breaker-guarded backend per config entry.
    pub fn from_config(
        configs: &[BackendConfig],
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for config in configs {
            let backend = Backend::from_config(config, metrics.clone())?;
            registry.register(backend)?;
        }
        Ok(registry)
    }

    /// Store `backend` under its name.
    pub fn register(&mut self, backend: Backend) -> Result<Arc<Backend>, RegistryError> {
        if self.backends.contains_key(backend.name()) {
            return Err(RegistryError::DuplicateBackend(backend.name().to_string()));
        }

        tracing::debug!(backend = %backend.name(), url = %backend.base_url(), "Registered backend");
        let backend = Arc::new(backend);
        self.backends
            .insert(backend.name().to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Backend>, RegistryError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::BackendNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.values()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
