//! Admission control.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs middleware (key by x-api-key header, else peer IP)
//!     → RateLimiter::check
//!         in_memory: per-key VecDeque<Instant> in a DashMap
//!         shared:    window_store.rs (CAS on a versioned window item)
//!     → admitted: next handler | rejected: 429 + Retry-After
//!
//! Pruner (run_pruner):
//!     in_memory: drop keys whose window emptied
//!     shared:    delete expired window items, guarded on version
//! ```
//!
//! # Design Decisions
//! - Both backends implement the same sliding-window semantics
//! - Fail open: an unreachable shared backend admits requests
//! - Rejection is a "slow down" signal, not a system fault

pub mod rate_limit;
pub mod window_store;

pub use rate_limit::{rate_limit_middleware, RateLimitBackend, RateLimitError, RateLimiter};
pub use window_store::{KvWindowStore, WindowStore};
