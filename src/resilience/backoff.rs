//! Exponential backoff with jitter.
//!
//! `delay(n) = min(base_delay * multiplier^(n-1), max_delay)`, optionally
//! scaled by a uniform factor in `[0.5, 1.0]`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::schema::RetryConfig;

/// Errors returned by [`BackoffPolicy::retry`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The token fired before the operation succeeded.
    #[error("retry cancelled")]
    Cancelled,

    /// The most recent failure once no attempts remain.
    #[error("{0}")]
    Exhausted(E),
}

impl<E> RetryError<E> {
    /// The last underlying failure, if the retries were not cancelled.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted(e) => Some(e),
        }
    }
}

/// Retry delay policy.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based). Attempt 0 has no delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let max_secs = self.max_delay.as_secs_f64();
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() { raw.clamp(0.0, max_secs) } else { max_secs };

        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };

        Duration::from_secs_f64(capped * factor)
    }

    /// Invoke `op` until it succeeds, retrying every failure.
    pub async fn retry<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_if(cancel, op, |_| true).await
    }

    /// Invoke `op` until it succeeds, retrying only failures accepted by
    /// `should_retry`. At most `max_retries + 1` attempts are made.
    pub async fn retry_if<F, Fut, T, E, P>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.delay(attempt);
                tracing::debug!(attempt, delay = ?delay, "Backing off before retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_retries || !should_retry(&e) => {
                    return Err(RetryError::Exhausted(e));
                }
                Err(_) => attempt += 1,
            }
        }
    }
}
