//! Retry logic.
//!
//! # Responsibilities
//! - Determine whether a failed attempt is retryable
//! - Execute retries with exponential backoff + jitter
//! - Consult a gate before every attempt so an opened circuit stops the loop
//!
//! # Design Decisions
//! - Only transient failures and timeouts are retried
//! - Jittered backoff prevents thundering herd
//! - The total number of attempts is bounded by `max_retries + 1`

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::errors::CallError;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    /// The gate refused attempt number `attempt` (0-based).
    Gated { attempt: u32 },
    NonRetryable { attempts: u32, error: CallError },
    Exhausted { attempts: u32, last: CallError },
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_delay, self.max_delay, self.jitter_ratio)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `gate` is asked before each attempt with the 0-based attempt number.
    pub async fn run<T, G, F, Fut>(&self, label: &str, mut gate: G, mut op: F) -> Result<T, RetryFailure>
    where
        G: FnMut(u32) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0;
        loop {
            if !gate(attempt) {
                return Err(RetryFailure::Gated { attempt });
            }

            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let attempts = attempt + 1;

            if !error.is_retryable() {
                return Err(RetryFailure::NonRetryable { attempts, error });
            }
            if attempts >= self.max_attempts() {
                return Err(RetryFailure::Exhausted { attempts, last: error });
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                target_service = label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
