//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! section falls back to defaults so a minimal file (or none) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the reliability layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Service identity, used for table names and log fields.
    pub service: ServiceConfig,

    /// Transactional outbox and reconciliation sweep.
    pub outbox: OutboxConfig,

    /// Request deduplication.
    pub idempotency: IdempotencyConfig,

    /// Per-target circuit breakers.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry and backoff for downstream calls.
    pub retries: RetryConfig,

    /// Bounded timeouts for every outbound call.
    pub timeouts: TimeoutConfig,

    /// Admission control.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "claim-svc".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn outbox_table(&self) -> String {
        format!("{}_outbox", self.name)
    }

    pub fn idempotency_table(&self) -> String {
        format!("{}_idem", self.name)
    }

    pub fn rate_limit_table(&self) -> String {
        format!("{}_rate", self.name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// How long a record is retained before it may be purged.
    pub retention_secs: u64,

    /// Unpublished records younger than this are left to the inline path.
    pub grace_period_secs: u64,

    /// Records re-driven per sweep batch.
    pub batch_size: usize,

    /// Interval between sweeps in milliseconds.
    pub sweep_interval_ms: u64,

    /// Upper bound on back-to-back full batches in one tick.
    pub max_batches_per_tick: usize,

    /// Cap on the delay before a failed record is re-driven again.
    pub max_retry_delay_secs: u64,

    /// Validate outgoing envelopes against the event registry.
    pub validate_events: bool,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 3600,
            grace_period_secs: 30,
            batch_size: 10,
            sweep_interval_ms: 5_000,
            max_batches_per_tick: 5,
            max_retry_delay_secs: 15 * 60,
            validate_events: true,
        }
    }
}

impl OutboxConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Retention of cached responses.
    pub ttl_secs: u64,

    /// Interval between expiry purges in seconds.
    pub purge_interval_secs: u64,

    /// Records deleted per purge.
    pub purge_batch_size: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            purge_interval_secs: 15 * 60,
            purge_batch_size: 100,
        }
    }
}

impl IdempotencyConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call.
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Random extra delay as a fraction of the computed delay (0.0 disables).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Downstream service call timeout in milliseconds.
    pub call_ms: u64,

    /// Topic publish timeout in milliseconds.
    pub publish_ms: u64,

    /// Store operation timeout in milliseconds.
    pub store_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_ms: 30_000,
            publish_ms: 5_000,
            store_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }
}

/// Which rate-window backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackendKind {
    InMemory,
    Shared,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests admitted per key per window.
    pub limit: u32,

    /// Sliding window length in seconds.
    pub window_secs: u64,

    pub backend: RateLimitBackendKind,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window_secs: 60,
            backend: RateLimitBackendKind::InMemory,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
