//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions mapping path prefixes to backends.
    pub routes: Vec<RouteConfig>,

    /// Backend service definitions.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,
}

impl Default for GatewayConfig {
    /// The five-service deployment behind `/api/v1`.
    fn default() -> Self {
        let backends = [
            ("user-service", 8081),
            ("order-service", 8082),
            ("product-service", 8083),
            ("payment-service", 8084),
            ("notification-service", 8085),
        ]
        .into_iter()
        .map(|(name, port)| {
            BackendConfig::new(name, format!("http://{name}:{port}")).with_health_path("/health")
        })
        .collect();

        let routes = [
            ("auth", "/api/v1/auth", "user-service"),
            ("users", "/api/v1/users", "user-service"),
            ("products", "/api/v1/products", "product-service"),
            ("admin-products", "/api/v1/admin/products", "product-service"),
            ("orders", "/api/v1/orders", "order-service"),
            ("payments", "/api/v1/payments", "payment-service"),
            ("payment-webhooks", "/api/v1/webhooks/payments", "payment-service"),
            ("notifications", "/api/v1/notifications", "notification-service"),
        ]
        .into_iter()
        .map(|(name, prefix, backend)| RouteConfig::new(name, prefix, backend))
        .collect();

        Self {
            listener: ListenerConfig::default(),
            routes,
            backends,
            health_check: HealthCheckConfig::default(),
            timeouts: TimeoutConfig::default(),
            retries: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// A configuration with no backends or routes.
    pub fn empty() -> Self {
        Self {
            routes: Vec::new(),
            backends: Vec::new(),
            ..Self::default()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Route configuration mapping requests to a backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match, on segment boundaries.
    pub path_prefix: String,

    /// Backend name to forward to.
    pub backend: String,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

impl RouteConfig {
    pub fn new(name: impl Into<String>, path_prefix: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            path_prefix: path_prefix.into(),
            backend: backend.into(),
            strip_prefix: false,
            priority: 0,
        }
    }

    pub fn stripping_prefix(mut self) -> Self {
        self.strip_prefix = true;
        self
    }
}

/// Backend service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier, used as the lookup key.
    pub name: String,

    /// Base URL (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Relative path probed for liveness. Absent or empty means assume healthy.
    #[serde(default)]
    pub health_path: Option<String>,

    /// Deadline for one forwarded request in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Circuit breaker settings for this backend.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            health_path: None,
            request_timeout_ms: default_request_timeout_ms(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = Some(path.into());
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }
}

/// Per-backend circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub max_failures: u32,

    /// Cooldown before a half-open trial, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,

    /// Deadline for a call made through the breaker, in milliseconds.
    pub call_timeout_ms: u64,

    /// Count backend 5xx responses as breaker failures.
    pub trip_on_server_error: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 3,
            call_timeout_ms: 30_000,
            trip_on_server_error: false,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run the periodic health monitor.
    pub enabled: bool,

    /// Health monitor interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
            timeout_secs: 5,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outer request timeout (whole handler) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry idempotent requests on transport failures.
    pub enabled: bool,

    /// Attempts after the first one.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Randomize each delay to [0.5, 1.0] of its value.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Answer CORS preflights and add permissive CORS headers.
    pub cors_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            cors_enabled: true,
        }
    }
}
