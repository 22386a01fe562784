//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reliability_outbox_recorded_total` (counter)
//! - `reliability_outbox_published_total{path}` (counter): inline or sweep
//! - `reliability_outbox_publish_deferred_total` (counter)
//! - `reliability_outbox_purged_total` (counter)
//! - `reliability_idempotency_total{outcome}` (counter)
//! - `reliability_breaker_state{target}` (gauge): 0 closed, 1 half-open, 2 open
//! - `reliability_breaker_transitions_total{target,to}` (counter)
//! - `reliability_breaker_rejections_total{target}` (counter)
//! - `reliability_call_retries_total{target}` (counter)
//! - `reliability_calls_total{target,outcome}` (counter)
//! - `reliability_rate_limited_total{backend}` (counter)
//! - `reliability_rate_limiter_fail_open_total` (counter)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_outbox_recorded() {
    counter!("reliability_outbox_recorded_total").increment(1);
}

pub fn record_outbox_published(path: &'static str) {
    counter!("reliability_outbox_published_total", "path" => path).increment(1);
}

pub fn record_outbox_deferred() {
    counter!("reliability_outbox_publish_deferred_total").increment(1);
}

pub fn record_outbox_purged(count: u64) {
    counter!("reliability_outbox_purged_total").increment(count);
}

pub fn record_idempotency(outcome: &'static str) {
    counter!("reliability_idempotency_total", "outcome" => outcome).increment(1);
}

pub fn record_breaker_state(target: &str, state_code: f64) {
    gauge!("reliability_breaker_state", "target" => target.to_string()).set(state_code);
}

pub fn record_breaker_transition(target: &str, to: &'static str) {
    counter!(
        "reliability_breaker_transitions_total",
        "target" => target.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(target: &str) {
    counter!("reliability_breaker_rejections_total", "target" => target.to_string()).increment(1);
}

pub fn record_call_retry(target: &str) {
    counter!("reliability_call_retries_total", "target" => target.to_string()).increment(1);
}

pub fn record_call_outcome(target: &str, outcome: &'static str) {
    counter!(
        "reliability_calls_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rate_limited(backend: &'static str) {
    counter!("reliability_rate_limited_total", "backend" => backend).increment(1);
}

pub fn record_rate_limiter_fail_open() {
    counter!("reliability_rate_limiter_fail_open_total").increment(1);
}
