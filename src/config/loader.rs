//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file, or the built-in defaults when no
/// path is given, then apply environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `PORT` and `<BACKEND>_URL` overrides.
///
/// The backend key is the backend name upper-cased with `-` replaced by `_`,
/// so `user-service` reads `USER_SERVICE_URL`. Values without a scheme get
/// `http://` prepended.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT").filter(|p| !p.trim().is_empty()) {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{host}:{}", port.trim());
        tracing::debug!(bind_address = %config.listener.bind_address, "Listener overridden by PORT");
    }

    for backend in &mut config.backends {
        let key = format!("{}_URL", backend.name.to_ascii_uppercase().replace('-', "_"));
        if let Some(url) = lookup(&key).filter(|u| !u.trim().is_empty()) {
            let url = url.trim();
            backend.url = if url.contains("://") {
                url.to_string()
            } else {
                format!("http://{url}")
            };
            tracing::debug!(backend = %backend.name, url = %backend.url, "Backend URL overridden by {key}");
        }
    }
}
