//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms via MetricsRecorder)
//!     → tracing.rs (W3C trace context propagated to backends)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Backend services (x-trace-id / x-span-id headers)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metrics are injected as a trait object, never a global singleton
//! - Every forwarded request carries trace headers, continuing the caller's
//!   trace when it sent one

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use metrics::{CallResult, MetricsRecorder, NoopRecorder, PrometheusRecorder};
pub use tracing::TraceContext;
