//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field
//! consistency. All problems are reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ReliabilityConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ReliabilityConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }

    let outbox = &config.outbox;
    if outbox.batch_size == 0 {
        errors.push(ValidationError::new("outbox.batch_size", "must be > 0"));
    }
    if outbox.max_batches_per_tick == 0 {
        errors.push(ValidationError::new("outbox.max_batches_per_tick", "must be > 0"));
    }
    if outbox.sweep_interval_ms == 0 {
        errors.push(ValidationError::new("outbox.sweep_interval_ms", "must be > 0"));
    }
    if outbox.max_retry_delay_secs == 0 {
        errors.push(ValidationError::new("outbox.max_retry_delay_secs", "must be > 0"));
    }
    if outbox.grace_period_secs >= outbox.retention_secs {
        errors.push(ValidationError::new(
            "outbox.grace_period_secs",
            "must be shorter than outbox.retention_secs",
        ));
    }

    if config.idempotency.ttl_secs == 0 {
        errors.push(ValidationError::new("idempotency.ttl_secs", "must be > 0"));
    }
    if config.idempotency.purge_interval_secs == 0 {
        errors.push(ValidationError::new("idempotency.purge_interval_secs", "must be > 0"));
    }
    if config.idempotency.purge_batch_size == 0 {
        errors.push(ValidationError::new("idempotency.purge_batch_size", "must be > 0"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }

    let retries = &config.retries;
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= retries.base_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&retries.jitter_ratio) {
        errors.push(ValidationError::new("retries.jitter_ratio", "must be within 0.0..=1.0"));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.call_ms", timeouts.call_ms),
        ("timeouts.publish_ms", timeouts.publish_ms),
        ("timeouts.store_ms", timeouts.store_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "every outbound call needs a deadline"));
        }
    }

    if config.rate_limit.limit == 0 {
        errors.push(ValidationError::new("rate_limit.limit", "must be > 0"));
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
