//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All components produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (target, event_id, dedup_key) on every event
//! - Breaker-open rejections are counted apart from real call failures
//! - Metrics are cheap when no recorder is installed

pub mod logging;
pub mod metrics;
