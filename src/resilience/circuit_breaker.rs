//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: first call after reset_timeout since the last failure
//! Half-Open → Closed: consecutive successes >= success_threshold
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering backend);
//!   concurrent callers are rejected until the trial resolves
//! - Open → Half-Open is checked lazily on each call, no background timer.
//!   A backend with no traffic stays Open past `reset_timeout` until the
//!   next call arrives
//! - State, counters, timestamp and trial flag live behind one mutex, and
//!   every check-then-act happens inside a single critical section
//! - Outcomes are tagged with the generation they were admitted in, so a
//!   slow call from an earlier state never drives a later one
//! - An `Ignored` outcome is treated like a dropped call: the permit is
//!   released and no counter moves

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics::{CallResult, MetricsRecorder, NoopRecorder};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Open => "OPEN",
        }
    }

    /// Value exported on the `circuit_breaker_state` gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable breaker settings.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures in Closed before opening.
    pub max_failures: u32,
    /// Time since the last failure before a trial is allowed.
    pub reset_timeout: Duration,
    /// Consecutive trial successes needed to close.
    pub success_threshold: u32,
    /// Deadline applied to every admitted call.
    pub call_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 3,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was not attempted.
    #[error("circuit breaker is open")]
    Open,

    /// The call exceeded `call_timeout`.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The call itself failed.
    #[error("{0}")]
    Failed(E),
}

/// How a completed call counts against the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Says nothing about the backend. The permit is released and no
    /// counter moves.
    Ignored,
}

/// Point-in-time view of a breaker, taken under its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every state change.
    generation: u64,
}

impl Inner {
    fn transition(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.trial_in_flight = false;
        self.generation += 1;
        Some((from, to))
    }
}

type Transition = Option<(CircuitState, CircuitState)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Trial,
}

/// Admission ticket for one call. Dropping an unsettled trial frees the slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    kind: PermitKind,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.kind == PermitKind::Trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// Circuit breaker guarding a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                trial_in_flight: false,
                generation: 0,
            }),
            metrics: Arc::new(NoopRecorder),
        }
    }

    /// Report calls and transitions to the given recorder.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Stored state. Does not evaluate the Open → Half-Open timeout.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consistent view of state and counters.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_ms_ago: inner
                .last_failure_at
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Run `call` under breaker protection. Any `Err` counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(call, |result| match result {
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        })
        .await
    }

    /// Run `call` under breaker protection, letting `classify` decide how
    /// its result counts. The result is returned to the caller either way.
    /// Exceeding `call_timeout` is always a failure.
    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        call: F,
        classify: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> Outcome,
    {
        let Some(permit) = self.acquire() else {
            self.metrics.record_breaker_call(&self.name, CallResult::Rejected);
            return Err(BreakerError::Open);
        };

        match tokio::time::timeout(self.settings.call_timeout, call()).await {
            Ok(result) => {
                let outcome = classify(&result);
                self.settle(permit, outcome);
                result.map_err(BreakerError::Failed)
            }
            Err(_) => {
                self.settle(permit, Outcome::Failure);
                Err(BreakerError::Timeout(self.settings.call_timeout))
            }
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        let mut transition = None;

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .last_failure_at
                .map_or(true, |at| at.elapsed() > self.settings.reset_timeout);
            if cooled_down {
                transition = inner.transition(CircuitState::HalfOpen);
            }
        }

        let kind = match inner.state {
            CircuitState::Closed => Some(PermitKind::Normal),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Some(PermitKind::Trial)
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        };
        let generation = inner.generation;
        drop(inner);

        self.notify(transition);
        kind.map(|kind| Permit {
            breaker: self,
            generation,
            kind,
            settled: false,
        })
    }

    fn settle(&self, mut permit: Permit<'_>, outcome: Outcome) {
        let result = match outcome {
            Outcome::Success => CallResult::Success,
            Outcome::Failure => CallResult::Failure,
            Outcome::Ignored => {
                // Dropping the unsettled permit frees a trial slot.
                tracing::trace!(breaker = %self.name, "Call outcome ignored");
                return;
            }
        };
        permit.settled = true;

        let mut inner = self.inner.lock();
        if inner.generation != permit.generation {
            drop(inner);
            tracing::trace!(breaker = %self.name, ?outcome, "Ignoring outcome from an earlier breaker state");
            return;
        }
        if permit.kind == PermitKind::Trial {
            inner.trial_in_flight = false;
        }

        let transition = match (inner.state, outcome) {
            (CircuitState::Closed, Outcome::Success) => {
                inner.consecutive_failures = 0;
                None
            }
            (CircuitState::Closed, Outcome::Failure) => {
                inner.consecutive_failures += 1;
                inner.last_failure_at = Some(Instant::now());
                if inner.consecutive_failures >= self.settings.max_failures {
                    inner.transition(CircuitState::Open)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.settings.success_threshold {
                    inner.transition(CircuitState::Closed)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.last_failure_at = Some(Instant::now());
                inner.transition(CircuitState::Open)
            }
            // No permits are issued while Open within one generation.
            (CircuitState::Open, _) | (_, Outcome::Ignored) => None,
        };
        drop(inner);

        self.metrics.record_breaker_call(&self.name, result);
        self.notify(transition);
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.trial_in_flight = false;
        }
    }

    fn notify(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => {
                tracing::warn!(breaker = %self.name, from = %from, to = %to, "Circuit breaker opened");
            }
            _ => {
                tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state changed");
            }
        }
        self.metrics.record_breaker_transition(&self.name, from, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    fn settings(max_failures: u32, success_threshold: u32) -> BreakerSettings {
        BreakerSettings {
            max_failures,
            reset_timeout: Duration::from_secs(10),
            success_threshold,
            call_timeout: Duration::from_secs(1),
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), BreakerError<&'static str>> {
        breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), BreakerError<&'static str>> {
        breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await
    }

    async fn open_breaker(breaker: &CircuitBreaker, calls: &AtomicU32) {
        for _ in 0..breaker.settings().max_failures {
            let _ = fail(breaker, calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_max_failures() {
        let breaker = CircuitBreaker::new("svc", settings(3, 1));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            assert!(matches!(fail(&breaker, &calls).await, Err(BreakerError::Failed("boom"))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);

        // The k-th call is still attempted.
        assert!(matches!(fail(&breaker, &calls).await, Err(BreakerError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state(), CircuitState::Open);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
        assert!(snapshot.last_failure_ms_ago.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count_in_closed() {
        let breaker = CircuitBreaker::new("svc", settings(3, 1));
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.snapshot().consecutive_failures, 0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_calling_until_reset_timeout() {
        let breaker = CircuitBreaker::new("svc", settings(2, 1));
        let calls = AtomicU32::new(0);
        open_breaker(&breaker, &calls).await;
        let attempted = calls.load(Ordering::SeqCst);

        for _ in 0..5 {
            assert!(matches!(succeed(&breaker, &calls).await, Err(BreakerError::Open)));
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        // Exactly reset_timeout is not enough; the window must be exceeded.
        assert!(matches!(succeed(&breaker, &calls).await, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), attempted);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_after_reset_timeout_is_half_open_trial() {
        let breaker = CircuitBreaker::new("svc", settings(2, 2));
        let calls = AtomicU32::new(0);
        open_breaker(&breaker, &calls).await;
        let attempted = calls.load(Ordering::SeqCst);

        tokio::time::advance(Duration::from_millis(10_001)).await;
        succeed(&breaker, &calls).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), attempted + 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().consecutive_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close_the_circuit() {
        let breaker = CircuitBreaker::new("svc", settings(2, 3));
        let calls = AtomicU32::new(0);
        open_breaker(&breaker, &calls).await;
        tokio::time::advance(Duration::from_millis(10_001)).await;

        succeed(&breaker, &calls).await.unwrap();
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker, &calls).await.unwrap();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("svc", settings(2, 3));
        let calls = AtomicU32::new(0);
        open_breaker(&breaker, &calls).await;
        tokio::time::advance(Duration::from_millis(10_001)).await;

        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.snapshot().consecutive_successes, 1);
        assert!(matches!(fail(&breaker, &calls).await, Err(BreakerError::Failed(_))));

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_successes, 0);
        assert_eq!(snapshot.last_failure_ms_ago, Some(0));

        // The cooldown restarts from the trial failure.
        let attempted = calls.load(Ordering::SeqCst);
        assert!(matches!(succeed(&breaker, &calls).await, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), attempted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("svc", settings(1, 1));
        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout(d)) if d == Duration::from_secs(1)));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_can_mark_ok_values_as_failures() {
        let breaker = CircuitBreaker::new("svc", settings(2, 1));
        for _ in 0..2 {
            let value = breaker
                .execute_classified(
                    || async { Ok::<u16, &'static str>(500) },
                    |result| match result {
                        Ok(status) if *status < 500 => Outcome::Success,
                        _ => Outcome::Failure,
                    },
                )
                .await
                .unwrap();
            assert_eq!(value, 500);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = Arc::new(CircuitBreaker::new("svc", settings(1, 1)));
        let calls = Arc::new(AtomicU32::new(0));
        open_breaker(&breaker, &calls).await;
        tokio::time::advance(Duration::from_millis(10_001)).await;

        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<(), &'static str>(())
                    })
                    .await
            })
        };
        started_rx.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A concurrent caller is turned away while the trial is pending.
        let before = calls.load(Ordering::SeqCst);
        assert!(matches!(succeed(&breaker, &calls).await, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), before);

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker, &calls).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let breaker = Arc::new(CircuitBreaker::new("svc", settings(1, 1)));
        let calls = Arc::new(AtomicU32::new(0));
        open_breaker(&breaker, &calls).await;
        tokio::time::advance(Duration::from_millis(10_001)).await;

        let (started_tx, started_rx) = oneshot::channel();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = started_tx.send(());
                        std::future::pending::<Result<(), &'static str>>().await
                    })
                    .await
            })
        };
        started_rx.await.unwrap();
        trial.abort();
        assert!(trial.await.unwrap_err().is_cancelled());

        // The abandoned trial recorded nothing and the next caller may probe.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_error_leaves_closed_breaker_untouched() {
        let breaker = CircuitBreaker::new("svc", settings(1, 1));

        let result = breaker
            .execute_classified(|| async { Err::<(), _>("shutting down") }, |_| Outcome::Ignored)
            .await;

        assert!(matches!(result, Err(BreakerError::Failed("shutting down"))));
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.last_failure_ms_ago, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_trial_frees_the_slot() {
        let breaker = CircuitBreaker::new("svc", settings(1, 2));
        let calls = AtomicU32::new(0);
        open_breaker(&breaker, &calls).await;
        tokio::time::advance(Duration::from_millis(10_001)).await;

        let _ = breaker
            .execute_classified(|| async { Err::<(), _>("shutting down") }, |_| Outcome::Ignored)
            .await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().consecutive_successes, 0);

        // The next caller gets the trial.
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.snapshot().consecutive_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_independent() {
        let a = CircuitBreaker::new("a", settings(1, 1));
        let b = CircuitBreaker::new("b", settings(1, 1));
        let calls = AtomicU32::new(0);

        open_breaker(&b, &calls).await;
        succeed(&a, &calls).await.unwrap();
        assert_eq!(a.state(), CircuitState::Closed);
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_state_serializes_as_screaming_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }
}
