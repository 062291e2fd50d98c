//! Circuit breaker guarding flaky dependencies.
//!
//! Wraps calls to the language backend and the document store. Repeated
//! failures open the circuit and calls fail immediately with
//! [`Error::CircuitBreakerOpen`] until a cooldown elapses; a half-open
//! probe then decides whether to close it again.

use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing; calls are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed; the next call is a recovery probe.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerStats {
    /// Calls attempted, including rejected ones.
    pub total_calls: u64,
    /// Calls that completed successfully.
    pub successful_calls: u64,
    /// Recoverable failures recorded against the circuit.
    pub failed_calls: u64,
    /// Calls rejected while the circuit was open.
    pub rejected_calls: u64,
    /// Times the circuit transitioned to open.
    pub opened_count: u32,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    stats: CircuitBreakerStats,
}

/// Consecutive-failure circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                stats: CircuitBreakerStats::default(),
            }),
        }
    }

    /// Current state, advancing open -> half-open when the cooldown has
    /// elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let cooled = inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.cooldown);
            if cooled {
                inner.state = CircuitState::HalfOpen;
                debug!("circuit breaker half-open, probing");
            }
        }
        inner.state
    }

    /// Snapshot of call counters.
    pub fn stats(&self) -> CircuitBreakerStats {
        self.inner.lock().stats
    }

    /// Execute `operation` under the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitBreakerOpen`] without invoking the operation
    /// while the circuit is open; otherwise propagates the operation's
    /// error after recording it.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Admission check; the lock is released before any await.
        match self.state() {
            CircuitState::Open => {
                let mut inner = self.inner.lock();
                inner.stats.total_calls += 1;
                inner.stats.rejected_calls += 1;
                return Err(Error::CircuitBreakerOpen);
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                self.inner.lock().stats.total_calls += 1;
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure(&error);
                Err(error)
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.stats.successful_calls += 1;
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            debug!("circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    fn record_failure(&self, error: &Error) {
        // Only recoverable errors count toward opening the circuit; a
        // validation or semantic failure says nothing about the
        // dependency's health.
        if !error.is_recoverable() {
            debug!(%error, "non-recoverable error, circuit state unchanged");
            return;
        }
        let mut inner = self.inner.lock();
        inner.stats.failed_calls += 1;
        inner.consecutive_failures += 1;
        let should_open = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if should_open && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.stats.opened_count += 1;
            warn!(
                consecutive_failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }
}
