//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health, GET /health/{service}, or monitor tick
//!     → aggregator.rs (one probe task per backend, shared deadline)
//!     → merge with breaker snapshots
//!     → HealthReport (healthy = AND over backends)
//!
//! Background (monitor.rs, when enabled):
//!     interval tick → aggregator.check_all → log transitions, health gauges
//! ```
//!
//! # Design Decisions
//! - Probe health is reported, never fed back into the breakers
//! - One backend's probe failure or panic cannot affect the others

pub mod aggregator;
pub mod monitor;

pub use aggregator::{HealthAggregator, HealthReport, ServiceHealth, DEFAULT_PROBE_TIMEOUT};
pub use monitor::HealthMonitor;
