//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (fail fast when open, enforce call timeout,
//!       track consecutive failures)
//!     → retries.rs (is the request replayable?)
//!     → backoff.rs (retry transport failures with exponential backoff + jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - Circuit breaker prevents cascading failures
//! - Backoff sleeps are cancellable

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use backoff::{BackoffPolicy, RetryError};
pub use circuit_breaker::{
    BreakerError, BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState, Outcome,
};
