//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast without contacting it
//! - Half-Open: one trial call decides whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: recovery_timeout elapsed since opened_at (checked lazily)
//! Half-Open → Closed: trial call succeeds, failures reset to 0
//! Half-Open → Open: trial call fails, opened_at reset to now
//! ```
//!
//! The breaker never performs the call itself. All transitions are computed
//! synchronously under one lock per target.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Start of the outstanding half-open trial, if any.
    trial_started: Option<Instant>,
}

/// Per-target circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::with_settings(target, config.failure_threshold, config.recovery_timeout())
    }

    pub fn with_settings(target: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            target: target.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_started: None,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Gate a call before attempting it.
    ///
    /// In Half-Open only one caller at a time is admitted as the trial. A
    /// trial that is neither resolved nor released within `recovery_timeout`
    /// counts as abandoned and the next caller becomes the trial.
    pub fn can_execute(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if !self.recovery_elapsed(&inner, now) {
                    return false;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_started = Some(now);
                true
            }
            CircuitState::HalfOpen => match inner.trial_started {
                Some(started) if now.duration_since(started) < self.recovery_timeout => false,
                _ => {
                    inner.trial_started = Some(now);
                    true
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.trial_started = None;
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            // A late success from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                inner.opened_at = Some(now);
                inner.trial_started = None;
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Hand back a half-open trial whose outcome says nothing about the
    /// target's health (e.g. the request itself was malformed).
    pub fn release(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.trial_started = None;
        }
    }

    /// Current state without side effects. An open circuit whose recovery
    /// window has elapsed reports Half-Open.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::Open && self.recovery_elapsed(&inner, Instant::now()) {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    /// True while the circuit is open and still inside its recovery window.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("circuit breaker mutex poisoned")
            .consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            target: self.target.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
        }
    }

    fn recovery_elapsed(&self, inner: &BreakerState, now: Instant) -> bool {
        inner
            .opened_at
            .map_or(true, |opened| now.duration_since(opened) >= self.recovery_timeout)
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                target_service = %self.target,
                from = from.as_str(),
                failures = inner.consecutive_failures,
                "Circuit opened"
            ),
            _ => tracing::info!(
                target_service = %self.target,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
        metrics::record_breaker_transition(&self.target, to.as_str());
        metrics::record_breaker_state(&self.target, to.gauge_value());
    }
}
