//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: health endpoints plus the proxy fallback
//! - Wire up middleware (request ID, tracing, timeout, body limit, CORS)
//! - Match routes and hand requests to the dispatcher
//! - Run the health monitor and serve until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::health::{HealthAggregator, HealthMonitor};
use crate::http::request::{request_id, MakeRequestUuid, X_REQUEST_ID};
use crate::lifecycle::startup::{build_components, StartupError};
use crate::observability::MetricsRecorder;
use crate::proxy::{DispatchError, Dispatcher};
use crate::routing::RouteTable;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub dispatcher: Dispatcher,
    pub health: HealthAggregator,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    health: HealthAggregator,
    shutdown: CancellationToken,
}

impl HttpServer {
    /// Build the registry, route table, and router from `config`.
    pub fn new(
        config: GatewayConfig,
        metrics: Arc<dyn MetricsRecorder>,
        shutdown: CancellationToken,
    ) -> Result<Self, StartupError> {
        let components = build_components(&config, metrics, shutdown.clone())?;

        let state = AppState {
            routes: components.routes,
            dispatcher: components.dispatcher,
            health: components.health.clone(),
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            health: components.health,
            shutdown,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/{service}", get(service_health_handler))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            );

        if config.security.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// The fully layered router, for serving on a custom listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections until shutdown is triggered.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(
                self.health.clone(),
                Duration::from_secs(self.config.health_check.interval_secs),
            );
            tokio::spawn(monitor.run(self.shutdown.clone()));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// `GET /health`: every backend, 503 unless all are healthy.
async fn health_handler(State(state): State<AppState>) -> Response {
    let report = state.health.check_all().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// `GET /health/{service}`: one backend, 404 if unknown.
async fn service_health_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Response {
    match state.health.check_one(&service).await {
        Ok(health) => {
            let status = if health.healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(health)).into_response()
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Service not found", "service": service })),
        )
            .into_response(),
    }
}

/// Main proxy handler.
/// Looks up the route and forwards the request to its backend.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();
    let request_id = request_id(&parts.headers).to_string();

    let Some(route) = state.routes.match_request(&parts) else {
        tracing::warn!(request_id = %request_id, path = %parts.uri.path(), "No route matched");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No matching route" })),
        )
            .into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        route = %route.name(),
        backend = %route.backend(),
        method = %parts.method,
        path = %parts.uri.path(),
        "Proxying request"
    );

    match route.forward_path_and_query(&parts).parse::<Uri>() {
        Ok(uri) => parts.uri = uri,
        Err(e) => return DispatchError::InvalidRequest(e.to_string()).into_response(),
    }

    match state
        .dispatcher
        .dispatch(route.backend(), Request::from_parts(parts, body))
        .await
    {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}
