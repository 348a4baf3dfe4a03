//! Reverse-proxy dispatcher.
//!
//! # Responsibilities
//! - Resolve the backend by name in the registry
//! - Forward one request under that backend's circuit breaker
//! - Optionally retry transport failures inside the same breaker call
//! - Map the outcome to a client-facing response
//!
//! # Design Decisions
//! - Only transport failures (connect, timeout, panic) count against the
//!   breaker unless the backend opts into `trip_on_server_error`
//! - A completed round-trip is relayed verbatim, whatever its status
//! - Shutdown during backoff and unreadable request bodies say nothing about
//!   the backend and leave the breaker untouched
//! - Retryable bodies are buffered only after the breaker admits the call
//! - Dropping the dispatch future aborts the forward call and any backoff

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use futures_util::FutureExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::observability::{MetricsRecorder, TraceContext};
use crate::proxy::error::DispatchError;
use crate::proxy::headers::{prepare_forward_headers, strip_hop_by_hop};
use crate::registry::{Backend, ServiceRegistry};
use crate::resilience::retries::is_retryable;
use crate::resilience::{BackoffPolicy, BreakerError, Outcome, RetryError};

/// Pooled HTTP/1.1 client shared by all dispatches.
pub type HttpClient = Client<HttpConnector, Body>;

/// Default cap on buffered bodies for retried requests.
const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Failure of a single forward attempt.
#[derive(Debug, Error)]
pub(crate) enum ForwardError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("forward call panicked")]
    Panicked,

    #[error("retry cancelled")]
    Cancelled,

    #[error("unreadable request body: {0}")]
    Body(String),
}

impl ForwardError {
    /// Whether this failure reflects on the backend's health.
    fn counts_against_backend(&self) -> bool {
        !matches!(self, ForwardError::Cancelled | ForwardError::Body(_))
    }
}

impl From<hyper_util::client::legacy::Error> for ForwardError {
    fn from(e: hyper_util::client::legacy::Error) -> Self {
        let detail = match std::error::Error::source(&e) {
            Some(source) => format!("{e}: {source}"),
            None => e.to_string(),
        };
        if e.is_connect() {
            ForwardError::Connect(detail)
        } else {
            ForwardError::Transport(detail)
        }
    }
}

/// Request line and headers of a forwarded call, reusable across attempts.
#[derive(Debug)]
struct ForwardHead {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl ForwardHead {
    fn build(&self, body: Body) -> Request<Body> {
        let mut request = Request::new(body);
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}

/// Forwards requests to registered backends.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    client: HttpClient,
    metrics: Arc<dyn MetricsRecorder>,
    retry: Option<BackoffPolicy>,
    shutdown: CancellationToken,
    max_body_size: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            client,
            metrics,
            retry: None,
            shutdown: CancellationToken::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Retry transport failures of idempotent requests with `policy`.
    pub fn with_retry(mut self, policy: BackoffPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Abort backoff sleeps when `token` fires.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Largest body buffered for a retryable request.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Forward `request` to the backend named `backend_name`.
    ///
    /// The request URI's path and query are appended to the backend base URL.
    #[tracing::instrument(name = "dispatch", skip_all, fields(service = %backend_name, method = %request.method()))]
    pub async fn dispatch(
        &self,
        backend_name: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, DispatchError> {
        let started = Instant::now();
        let method = request.method().clone();

        let result = self.dispatch_inner(backend_name, request).await;

        let status = match &result {
            Ok(response) => response.status(),
            Err(e) => e.status(),
        };
        self.metrics
            .record_request(backend_name, method.as_str(), status.as_u16(), started.elapsed());

        match &result {
            Ok(_) => tracing::debug!(status = status.as_u16(), "Backend responded"),
            Err(DispatchError::CircuitOpen(_)) => {
                tracing::debug!("Rejected by open circuit breaker");
            }
            Err(e) => tracing::warn!(error = %e, status = status.as_u16(), "Dispatch failed"),
        }
        result
    }

    async fn dispatch_inner(
        &self,
        backend_name: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, DispatchError> {
        let backend = self
            .registry
            .lookup(backend_name)
            .map_err(|_| DispatchError::BackendNotFound(backend_name.to_string()))?;

        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let uri = backend
            .forward_uri(path_and_query)
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let trace = TraceContext::for_forwarding(&parts.headers);

        let mut headers = parts.headers;
        prepare_forward_headers(&mut headers, backend.name(), client_addr, &trace);
        let head = ForwardHead {
            method: parts.method,
            uri,
            headers,
        };

        let trip_on_server_error = backend.trip_on_server_error();
        let classify = move |result: &Result<Response<Incoming>, ForwardError>| match result {
            Ok(response) if trip_on_server_error && response.status().is_server_error() => {
                Outcome::Failure
            }
            Ok(_) => Outcome::Success,
            Err(e) if e.counts_against_backend() => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        };

        let breaker = backend.breaker();
        let result = match self.retry.as_ref().filter(|_| is_retryable(&head.method)) {
            Some(policy) => {
                breaker
                    .execute_classified(
                        || async {
                            let bytes = match axum::body::to_bytes(body, self.max_body_size).await {
                                Ok(bytes) => bytes,
                                Err(e) => return Err(ForwardError::Body(e.to_string())),
                            };
                            policy
                                .retry_if(
                                    &self.shutdown,
                                    || self.forward(&backend, head.build(Body::from(bytes.clone()))),
                                    |e| !matches!(e, ForwardError::Panicked),
                                )
                                .await
                                .map_err(|e| match e {
                                    RetryError::Cancelled => ForwardError::Cancelled,
                                    RetryError::Exhausted(e) => e,
                                })
                        },
                        classify,
                    )
                    .await
            }
            None => {
                breaker
                    .execute_classified(|| self.forward(&backend, head.build(body)), classify)
                    .await
            }
        };

        let name = backend.name().to_string();
        match result {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(BreakerError::Open) => Err(DispatchError::CircuitOpen(name)),
            Err(BreakerError::Timeout(timeout))
            | Err(BreakerError::Failed(ForwardError::Timeout(timeout))) => {
                Err(DispatchError::UpstreamTimeout { service: name, timeout })
            }
            Err(BreakerError::Failed(ForwardError::Connect(reason)))
            | Err(BreakerError::Failed(ForwardError::Transport(reason))) => {
                Err(DispatchError::UpstreamUnreachable { service: name, reason })
            }
            Err(BreakerError::Failed(ForwardError::Panicked)) => {
                Err(DispatchError::UpstreamPanicked(name))
            }
            Err(BreakerError::Failed(ForwardError::Cancelled)) => Err(DispatchError::Cancelled(name)),
            Err(BreakerError::Failed(e @ ForwardError::Body(_))) => {
                Err(DispatchError::InvalidRequest(e.to_string()))
            }
        }
    }

    /// One round-trip to `backend`, bounded by its request timeout.
    async fn forward(
        &self,
        backend: &Backend,
        request: Request<Body>,
    ) -> Result<Response<Incoming>, ForwardError> {
        guarded(backend.request_timeout(), self.client.request(request)).await
    }
}

/// Await `call` with a deadline, turning a panic into [`ForwardError::Panicked`].
pub(crate) async fn guarded<F, T, E>(timeout: Duration, call: F) -> Result<T, ForwardError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ForwardError>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Err(_) => Err(ForwardError::Timeout(timeout)),
        Ok(Err(_panic)) => Err(ForwardError::Panicked),
        Ok(Ok(result)) => result.map_err(Into::into),
    }
}
