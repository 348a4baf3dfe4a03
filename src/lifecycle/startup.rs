//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry, route table, dispatcher, and health aggregator
//! - Translate configuration failures into one startup error
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The registry is complete before it is shared

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, GatewayConfig};
use crate::health::HealthAggregator;
use crate::observability::MetricsRecorder;
use crate::proxy::Dispatcher;
use crate::registry::{RegistryError, ServiceRegistry};
use crate::resilience::BackoffPolicy;
use crate::routing::RouteTable;

/// Fatal error while bringing the gateway up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("route '{route}' references unknown backend '{backend}'")]
    UnknownBackend { route: String, backend: String },
}

/// Wired-up core subsystems.
#[derive(Debug, Clone)]
pub struct Components {
    pub registry: Arc<ServiceRegistry>,
    pub routes: Arc<RouteTable>,
    pub dispatcher: Dispatcher,
    pub health: HealthAggregator,
}

/// Build every core subsystem from a validated configuration.
pub fn build_components(
    config: &GatewayConfig,
    metrics: Arc<dyn MetricsRecorder>,
    shutdown: CancellationToken,
) -> Result<Components, StartupError> {
    let registry = Arc::new(ServiceRegistry::from_config(&config.backends, Arc::clone(&metrics))?);

    for route in &config.routes {
        if registry.lookup(&route.backend).is_err() {
            return Err(StartupError::UnknownBackend {
                route: route.name.clone(),
                backend: route.backend.clone(),
            });
        }
    }
    let routes = Arc::new(RouteTable::new(&config.routes));

    let mut dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&metrics))
        .with_shutdown(shutdown)
        .with_max_body_size(config.security.max_body_size);
    if config.retries.enabled {
        dispatcher = dispatcher.with_retry(BackoffPolicy::from(&config.retries));
    }

    let health = HealthAggregator::new(Arc::clone(&registry), metrics)
        .with_probe_timeout(Duration::from_secs(config.health_check.timeout_secs));

    tracing::info!(
        backends = ?registry.names(),
        routes = routes.len(),
        retries = config.retries.enabled,
        "Gateway components initialized"
    );

    Ok(Components {
        registry,
        routes,
        dispatcher,
        health,
    })
}
