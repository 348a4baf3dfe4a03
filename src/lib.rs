//! Edge gateway library.
//!
//! Routes inbound HTTP calls to named backend services, each guarded by its
//! own circuit breaker, and aggregates backend health concurrently.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod registry;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
