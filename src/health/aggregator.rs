//! Concurrent health aggregation.
//!
//! # Responsibilities
//! - Probe every registered backend at once, one task per backend
//! - Merge each probe result with the backend's breaker snapshot
//! - Report overall health as the AND of all backends
//!
//! # Design Decisions
//! - Probe timeout is fixed and independent of the request timeout
//! - Tasks are joined against one shared deadline, so the wall time is
//!   bounded by the slowest probe, not the sum
//! - A panicked or overdue task becomes that backend's unhealthy result

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, Request};
use futures_util::StreamExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::observability::MetricsRecorder;
use crate::proxy::dispatcher::HttpClient;
use crate::registry::{Backend, RegistryError, ServiceRegistry};
use crate::resilience::BreakerSnapshot;

/// Per-probe deadline unless overridden.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time granted to the join after the probe timeout.
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// Bytes of an unhealthy response body quoted in the details.
const BODY_EXCERPT_LIMIT: usize = 1024;

/// Health of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub details: String,
    pub circuit_breaker: BreakerSnapshot,
}

/// Aggregate health of every registered backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub services: BTreeMap<String, ServiceHealth>,
    /// Unix seconds.
    pub timestamp: u64,
}

/// Outcome of one probe, before the breaker snapshot is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeResult {
    healthy: bool,
    details: String,
}

impl ProbeResult {
    fn healthy(details: impl Into<String>) -> Self {
        Self {
            healthy: true,
            details: details.into(),
        }
    }

    fn unhealthy(details: impl Into<String>) -> Self {
        Self {
            healthy: false,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    client: HttpClient,
    metrics: Arc<dyn MetricsRecorder>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(registry: Arc<ServiceRegistry>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            client,
            metrics,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probe all backends concurrently.
    pub async fn check_all(&self) -> HealthReport {
        let handles: Vec<_> = self
            .registry
            .iter()
            .map(|backend| (Arc::clone(backend), self.spawn_probe(backend)))
            .collect();

        let services = self.gather(handles).await;
        for (name, health) in &services {
            self.metrics.record_backend_health(name, health.healthy);
        }

        HealthReport {
            healthy: services.values().all(|s| s.healthy),
            services,
            timestamp: unix_now(),
        }
    }

    /// Probe a single backend.
    pub async fn check_one(&self, name: &str) -> Result<ServiceHealth, RegistryError> {
        let backend = self.registry.lookup(name)?;
        let handle = self.spawn_probe(&backend);
        let mut services = self.gather(vec![(backend, handle)]).await;

        let health = services
            .remove(name)
            .ok_or_else(|| RegistryError::BackendNotFound(name.to_string()))?;
        self.metrics.record_backend_health(name, health.healthy);
        Ok(health)
    }

    fn spawn_probe(&self, backend: &Arc<Backend>) -> JoinHandle<ProbeResult> {
        let client = self.client.clone();
        let backend = Arc::clone(backend);
        let timeout = self.probe_timeout;
        tokio::spawn(async move { probe(&client, &backend, timeout).await })
    }

    /// Join probe tasks against one deadline.
    pub(crate) async fn gather(
        &self,
        handles: Vec<(Arc<Backend>, JoinHandle<ProbeResult>)>,
    ) -> BTreeMap<String, ServiceHealth> {
        let deadline = Instant::now() + self.probe_timeout + JOIN_GRACE;
        let mut services = BTreeMap::new();

        for (backend, mut handle) in handles {
            let result = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(backend = %backend.name(), "Health probe panicked");
                    ProbeResult::unhealthy("Health check failed: probe panicked")
                }
                Ok(Err(e)) => ProbeResult::unhealthy(format!("Health check failed: {e}")),
                Err(_) => {
                    handle.abort();
                    tracing::warn!(backend = %backend.name(), "Health probe did not finish in time");
                    ProbeResult::unhealthy("Health check failed: probe did not finish in time")
                }
            };

            services.insert(
                backend.name().to_string(),
                ServiceHealth {
                    healthy: result.healthy,
                    details: result.details,
                    circuit_breaker: backend.breaker().snapshot(),
                },
            );
        }

        services
    }
}

/// `GET base + health_path`; 2xx within `timeout` is healthy.
async fn probe(client: &HttpClient, backend: &Backend, timeout: Duration) -> ProbeResult {
    let uri = match backend.health_uri() {
        None => return ProbeResult::healthy("No health check configured"),
        Some(Ok(uri)) => uri,
        Some(Err(e)) => return ProbeResult::unhealthy(format!("Health check failed: {e}")),
    };

    let request = match Request::get(uri)
        .header(header::USER_AGENT, "edge-gateway-health-check")
        .body(Body::empty())
    {
        Ok(request) => request,
        Err(e) => return ProbeResult::unhealthy(format!("Health check failed: {e}")),
    };

    let check = async {
        let response = match client.request(request).await {
            Ok(response) => response,
            Err(e) => return ProbeResult::unhealthy(format!("Health check failed: {e}")),
        };
        let status = response.status();
        if status.is_success() {
            return ProbeResult::healthy("Health check passed");
        }

        let body = body_excerpt(Body::new(response.into_body()), BODY_EXCERPT_LIMIT).await;
        ProbeResult::unhealthy(format!(
            "Health check failed with status {}: {}",
            status.as_u16(),
            String::from_utf8_lossy(&body).trim()
        ))
    };

    let result = tokio::time::timeout(timeout, check).await.unwrap_or_else(|_| {
        ProbeResult::unhealthy(format!("Health check failed: timed out after {timeout:?}"))
    });

    if !result.healthy {
        tracing::debug!(backend = %backend.name(), details = %result.details, "Health probe failed");
    }
    result
}

/// Up to `limit` leading bytes of `body`. A read error ends the excerpt early.
async fn body_excerpt(body: Body, limit: usize) -> Vec<u8> {
    let mut excerpt = Vec::new();
    let mut chunks = body.into_data_stream();
    while excerpt.len() < limit {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - excerpt.len());
                excerpt.extend_from_slice(&chunk[..take]);
            }
            Some(Err(_)) | None => break,
        }
    }
    excerpt
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
