//! Reverse-proxy subsystem.
//!
//! # Data Flow
//! ```text
//! matched route (backend name, rewritten path)
//!     → dispatcher.rs (registry lookup, breaker.execute_classified)
//!     → headers.rs (hop-by-hop stripping, gateway + trace headers)
//!     → hyper client round-trip (request timeout, panic guard)
//!     → error.rs (transport outcome → 502 / 503 JSON)
//! ```

pub mod dispatcher;
pub mod error;
pub mod headers;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
