//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a sibling service:
//!     → registry.rs (breaker for the target)
//!     → circuit_breaker.rs (gate: fail fast while open)
//!     → timeouts.rs (deadline per attempt)
//!     → On failure: retries.rs (retryable? back off via backoff.rs, re-check gate)
//!     → errors.rs (final ResilienceError, mapped to an HTTP status)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Only transient failures and timeouts are retried
//! - Circuit breaker prevents cascading failures
//! - Breaker state is per process and never persisted

pub mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod errors;
pub mod http;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use client::ResilientClient;
pub use errors::{CallError, ResilienceError};
pub use http::{ResilientServiceClient, ServiceClient};
pub use registry::BreakerRegistry;
pub use retries::{RetryFailure, RetryPolicy};
