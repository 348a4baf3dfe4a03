//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single named backend service
//! - Own the backend's circuit breaker for the whole process lifetime
//! - Build forward and health-probe URIs from the base URL

use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use url::Position;

use crate::config::schema::{BackendConfig, CircuitBreakerConfig};
use crate::config::validation::check_backend_url;
use crate::observability::MetricsRecorder;
use crate::registry::RegistryError;
use crate::resilience::{BreakerSettings, CircuitBreaker};

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            success_threshold: config.success_threshold,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }
}

/// A single backend service.
#[derive(Debug)]
pub struct Backend {
    name: String,
    /// `scheme://host:port`, no trailing slash.
    origin: String,
    /// Base path without a trailing slash; empty for the root.
    base_path: String,
    health_path: Option<String>,
    request_timeout: Duration,
    trip_on_server_error: bool,
    breaker: CircuitBreaker,
}

impl Backend {
    /// Build a backend and its breaker from configuration.
    pub fn from_config(
        config: &BackendConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, RegistryError> {
        let url = check_backend_url(&config.url).map_err(|reason| RegistryError::InvalidUrl {
            name: config.name.clone(),
            reason,
        })?;

        let breaker = CircuitBreaker::new(config.name.clone(), (&config.circuit_breaker).into())
            .with_metrics(metrics);

        Ok(Self {
            name: config.name.clone(),
            origin: url[..Position::BeforePath].to_string(),
            base_path: url.path().trim_end_matches('/').to_string(),
            health_path: config
                .health_path
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            trip_on_server_error: config.circuit_breaker.trip_on_server_error,
            breaker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL as configured, normalized.
    pub fn base_url(&self) -> String {
        format!("{}{}", self.origin, self.base_path)
    }

    pub fn health_path(&self) -> Option<&str> {
        self.health_path.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Whether backend 5xx responses count as breaker failures.
    pub fn trip_on_server_error(&self) -> bool {
        self.trip_on_server_error
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Absolute URI for a forwarded request. `path_and_query` must start
    /// with `/`.
    pub fn forward_uri(&self, path_and_query: &str) -> Result<Uri, axum::http::uri::InvalidUri> {
        format!("{}{}{}", self.origin, self.base_path, path_and_query).parse()
    }

    /// Absolute URI of the health endpoint, if one is configured.
    pub fn health_uri(&self) -> Option<Result<Uri, axum::http::uri::InvalidUri>> {
        self.health_path.as_deref().map(|path| {
            let path = path.trim_start_matches('/');
            format!("{}{}/{}", self.origin, self.base_path, path).parse()
        })
    }
}
