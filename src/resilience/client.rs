//! Breaker-gated, retried, deadline-bounded downstream calls.
//!
//! # Data Flow
//! ```text
//! execute(op)
//!     → breaker.can_execute()          (refused: BreakerOpen, target untouched)
//!     → timeouts::with_timeout(op())   (one attempt)
//!     → RetryPolicy                    (transient: back off, re-check breaker, retry)
//!     → breaker.record_success / record_failure / release
//! ```
//!
//! A call counts once against the breaker, however many attempts it made.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RetryConfig, TimeoutConfig};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::errors::{CallError, ResilienceError};
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retries::{RetryFailure, RetryPolicy};
use crate::resilience::timeouts::with_timeout;

/// Composes a circuit breaker, a retry policy and a per-attempt timeout
/// around calls to one target.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    target: String,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        target: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            breaker,
            policy,
            timeout,
        }
    }

    pub fn from_registry(
        target: &str,
        registry: &BreakerRegistry,
        retries: &RetryConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self::new(
            target,
            registry.get(target),
            RetryPolicy::from_config(retries),
            timeouts.call(),
        )
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` through the breaker, retries and timeout.
    ///
    /// The breaker is consulted before every attempt, so a circuit opened by
    /// concurrent callers ends the retry loop early. Only an exhausted call
    /// is reported as a failure. Retries after the first attempt check
    /// `is_open` rather than `can_execute` so a half-open trial keeps its
    /// own retry budget.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let breaker = &self.breaker;
        let timeout = self.timeout;

        let gate = |attempt: u32| {
            if attempt == 0 {
                breaker.can_execute()
            } else {
                !breaker.is_open()
            }
        };

        let try_once = |retry: u32| {
            if retry > 0 {
                metrics::record_call_retry(&self.target);
            }
            with_timeout(timeout, op())
        };

        match self.policy.run(&self.target, gate, try_once).await {
            Ok(value) => {
                breaker.record_success();
                metrics::record_call_outcome(&self.target, "success");
                Ok(value)
            }
            Err(RetryFailure::Gated { attempt }) => {
                tracing::warn!(
                    target_service = %self.target,
                    attempt = attempt + 1,
                    "Circuit open, call not attempted"
                );
                metrics::record_breaker_rejection(&self.target);
                metrics::record_call_outcome(&self.target, "breaker_open");
                Err(ResilienceError::BreakerOpen {
                    target: self.target.clone(),
                })
            }
            Err(RetryFailure::NonRetryable { error, .. }) => {
                // The target answered; its health is unaffected.
                breaker.release();
                metrics::record_call_outcome(&self.target, "non_retryable");
                Err(ResilienceError::NonRetryable {
                    target: self.target.clone(),
                    source: error,
                })
            }
            Err(RetryFailure::Exhausted { attempts, last }) => {
                tracing::error!(
                    target_service = %self.target,
                    attempts,
                    error = %last,
                    "Retries exhausted"
                );
                breaker.record_failure();
                if matches!(last, CallError::Timeout(_)) {
                    metrics::record_call_outcome(&self.target, "timeout");
                    Err(ResilienceError::Timeout {
                        target: self.target.clone(),
                        attempts,
                    })
                } else {
                    metrics::record_call_outcome(&self.target, "exhausted");
                    Err(ResilienceError::RetriesExhausted {
                        target: self.target.clone(),
                        attempts,
                        last,
                    })
                }
            }
        }
    }
}
