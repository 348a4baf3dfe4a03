//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing backends)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid listener bind address '{0}'")]
    BindAddress(String),

    #[error("backend #{0} has an empty name")]
    EmptyBackendName(usize),

    #[error("duplicate backend name '{0}'")]
    DuplicateBackend(String),

    #[error("backend '{name}' has invalid url '{url}': {reason}")]
    BackendUrl { name: String, url: String, reason: String },

    #[error("backend '{name}': {field} must be greater than zero")]
    Zero { name: String, field: &'static str },

    #[error("route '{route}' references unknown backend '{backend}'")]
    UnknownBackend { route: String, backend: String },

    #[error("route '{0}' path prefix must start with '/'")]
    RoutePrefix(String),

    #[error("retries.multiplier must be at least 1.0")]
    Multiplier,

    #[error("health_check.{0} must be greater than zero")]
    HealthCheck(&'static str),

    #[error("invalid log level '{0}'")]
    LogLevel(String),
}

/// Check the configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let mut names = HashSet::new();
    for (index, backend) in config.backends.iter().enumerate() {
        if backend.name.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendName(index));
        } else if !names.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }

        if let Err(reason) = check_backend_url(&backend.url) {
            errors.push(ValidationError::BackendUrl {
                name: backend.name.clone(),
                url: backend.url.clone(),
                reason,
            });
        }

        let breaker = &backend.circuit_breaker;
        let numeric = [
            ("request_timeout_ms", backend.request_timeout_ms),
            ("circuit_breaker.max_failures", u64::from(breaker.max_failures)),
            ("circuit_breaker.success_threshold", u64::from(breaker.success_threshold)),
            ("circuit_breaker.reset_timeout_ms", breaker.reset_timeout_ms),
            ("circuit_breaker.call_timeout_ms", breaker.call_timeout_ms),
        ];
        for (field, value) in numeric {
            if value == 0 {
                errors.push(ValidationError::Zero {
                    name: backend.name.clone(),
                    field,
                });
            }
        }
    }

    for route in &config.routes {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::RoutePrefix(route.name.clone()));
        }
        if !names.contains(route.backend.as_str()) {
            errors.push(ValidationError::UnknownBackend {
                route: route.name.clone(),
                backend: route.backend.clone(),
            });
        }
    }

    if !(config.retries.multiplier >= 1.0) {
        errors.push(ValidationError::Multiplier);
    }
    if config.health_check.timeout_secs == 0 {
        errors.push(ValidationError::HealthCheck("timeout_secs"));
    }
    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::HealthCheck("interval_secs"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Only plain HTTP backends with a host are reachable through the client.
pub(crate) fn check_backend_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("query and fragment are not allowed".to_string());
    }
    Ok(url)
}
