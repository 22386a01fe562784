//! Reliability layer for insurance microservices: transactional outbox,
//! request idempotency, resilient inter-service calls, and rate limiting.

pub mod clock;
pub mod config;
pub mod events;
pub mod idempotency;
pub mod lifecycle;
pub mod observability;
pub mod outbox;
pub mod resilience;
pub mod security;
pub mod store;
pub mod topic;

pub use config::schema::ReliabilityConfig;
pub use idempotency::IdempotencyManager;
pub use lifecycle::Shutdown;
pub use outbox::{OutboxPublisher, Reconciler};
pub use resilience::{BreakerRegistry, ResilientClient};
pub use security::RateLimiter;
