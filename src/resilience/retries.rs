//! Retry eligibility.
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Only transport failures are retried; a completed round-trip is final
//! - Retries run inside one breaker call, so a retried sequence counts as
//!   a single breaker outcome

use axum::http::Method;

/// Whether a request with this method may be replayed against a backend.
pub fn is_retryable(method: &Method) -> bool {
    method.is_idempotent()
}
