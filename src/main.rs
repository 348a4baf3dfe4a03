//! Edge gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────────┐
//!                          │                    EDGE GATEWAY                      │
//!                          │                                                      │
//!     Client Request       │  ┌─────────┐    ┌──────────┐    ┌──────────────┐     │
//!     ─────────────────────┼─▶│  http   │───▶│ routing  │───▶│    proxy     │     │
//!                          │  │ server  │    │  table   │    │  dispatcher  │     │
//!                          │  └────┬────┘    └──────────┘    └──────┬───────┘     │
//!                          │       │                                │             │
//!                          │       ▼                                ▼             │
//!                          │  ┌─────────┐    ┌──────────┐    ┌──────────────┐     │
//!                          │  │ health  │───▶│ registry │◀───│   circuit    │─────┼──▶ Backend
//!                          │  │aggregatr│    │ backends │    │   breaker    │     │    Services
//!                          │  └─────────┘    └──────────┘    └──────────────┘     │
//!                          │                                                      │
//!                          │  config · observability · resilience · lifecycle     │
//!                          └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::config::load_config;
use edge_gateway::lifecycle::signals::wait_for_signal;
use edge_gateway::observability::logging::init_logging;
use edge_gateway::observability::metrics::init_metrics;
use edge_gateway::observability::{MetricsRecorder, NoopRecorder, PrometheusRecorder};
use edge_gateway::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "edge-gateway", version)]
#[command(about = "Edge gateway with per-service circuit breakers", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        "edge-gateway starting"
    );

    let metrics: Arc<dyn MetricsRecorder> = if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => match init_metrics(addr) {
                Ok(()) => Arc::new(PrometheusRecorder),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                    Arc::new(NoopRecorder)
                }
            },
            Err(e) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                );
                Arc::new(NoopRecorder)
            }
        }
    } else {
        Arc::new(NoopRecorder)
    };

    let shutdown = Shutdown::new();
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, metrics, shutdown.token())?;

    tokio::spawn(wait_for_signal(shutdown.clone()));
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
