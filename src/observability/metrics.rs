//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, breaker activity, backend health)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, method, status
//! - `gateway_request_duration_seconds` (histogram): latency per service
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `circuit_breaker_requests_total` (counter): calls by service and result
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Components receive an `Arc<dyn MetricsRecorder>` so tests can swap in
//!   a no-op or capturing recorder
//! - `PrometheusRecorder` forwards to the `metrics` facade; the exporter is
//!   installed once at startup

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Result of one call attempt as seen by a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    Success,
    Failure,
    /// Rejected without being attempted.
    Rejected,
}

impl CallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallResult::Success => "success",
            CallResult::Failure => "failure",
            CallResult::Rejected => "rejected",
        }
    }
}

/// Sink for gateway metrics.
pub trait MetricsRecorder: Send + Sync + std::fmt::Debug {
    /// One dispatched request and the status returned to the client.
    fn record_request(&self, service: &str, method: &str, status: u16, elapsed: Duration);

    /// One call evaluated by a backend's circuit breaker.
    fn record_breaker_call(&self, service: &str, result: CallResult);

    /// A circuit breaker state change.
    fn record_breaker_transition(&self, service: &str, from: CircuitState, to: CircuitState);

    /// Latest health probe result for a backend.
    fn record_backend_health(&self, service: &str, healthy: bool);
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_request(&self, _service: &str, _method: &str, _status: u16, _elapsed: Duration) {}
    fn record_breaker_call(&self, _service: &str, _result: CallResult) {}
    fn record_breaker_transition(&self, _service: &str, _from: CircuitState, _to: CircuitState) {}
    fn record_backend_health(&self, _service: &str, _healthy: bool) {}
}

/// Recorder backed by the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusRecorder;

impl MetricsRecorder for PrometheusRecorder {
    fn record_request(&self, service: &str, method: &str, status: u16, elapsed: Duration) {
        ::metrics::counter!(
            "gateway_requests_total",
            "service" => service.to_string(),
            "method" => method.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        ::metrics::histogram!(
            "gateway_request_duration_seconds",
            "service" => service.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn record_breaker_call(&self, service: &str, result: CallResult) {
        ::metrics::counter!(
            "circuit_breaker_requests_total",
            "service" => service.to_string(),
            "result" => result.as_str()
        )
        .increment(1);
    }

    fn record_breaker_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        ::metrics::gauge!("circuit_breaker_state", "service" => service.to_string())
            .set(to.gauge_value());
        ::metrics::counter!(
            "circuit_breaker_transitions_total",
            "service" => service.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    fn record_backend_health(&self, service: &str, healthy: bool) {
        ::metrics::gauge!("gateway_backend_health", "service" => service.to_string())
            .set(if healthy { 1.0 } else { 0.0 });
    }
}

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
