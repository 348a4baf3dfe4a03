//! Periodic health monitoring.
//!
//! # Responsibilities
//! - Run the aggregator on a fixed interval until shutdown
//! - Log backends that change between healthy and unhealthy

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::health::aggregator::{HealthAggregator, HealthReport};

pub struct HealthMonitor {
    aggregator: HealthAggregator,
    interval: Duration,
    last_seen: HashMap<String, bool>,
}

impl HealthMonitor {
    pub fn new(aggregator: HealthAggregator, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
            last_seen: HashMap::new(),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            probe_timeout = ?self.aggregator.probe_timeout(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                report = self.aggregator.check_all() => report,
            };
            self.observe(&report);
        }

        tracing::info!("Health monitor stopped");
    }

    /// Record `report`, returning the backends whose health changed.
    fn observe(&mut self, report: &HealthReport) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, health) in &report.services {
            let previous = self.last_seen.insert(name.clone(), health.healthy);
            match previous {
                Some(was) if was == health.healthy => continue,
                // First observation of a healthy backend is not news.
                None if health.healthy => continue,
                _ => {}
            }

            if health.healthy {
                tracing::info!(backend = %name, "Backend recovered");
            } else {
                tracing::warn!(
                    backend = %name,
                    details = %health.details,
                    breaker = %health.circuit_breaker.state,
                    "Backend unhealthy"
                );
            }
            changed.push(name.clone());
        }
        changed
    }
}
