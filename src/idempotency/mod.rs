//! Request idempotency.
//!
//! # Data Flow
//! ```text
//! mutating request (token, body)
//!     → key.rs (IDEM#token#sha256(canonical body)[..16])
//!     → manager.rs check_and_reserve: get(key)
//!         hit  → cached response, mutation skipped
//!         miss → caller runs the mutation
//!     → manager.rs commit: insert_if(absent or expired)
//!         won  → caller's response
//!         lost → winner's response
//! ```
//!
//! # Design Decisions
//! - The body digest is part of the key, so a reused token with different
//!   content is a different request
//! - Store read failures fail the request; they are never treated as a miss
//! - Expired records are ignored before they are purged

use thiserror::Error;

use crate::store::StoreError;

pub mod key;
pub mod manager;

pub use key::{canonical_json, DedupKey};
pub use manager::{IdempotencyManager, IdempotencyRecord, Outcome};

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("invalid idempotency token: {0}")]
    InvalidToken(String),

    #[error("idempotency store call failed for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("idempotency record {key} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A conditional insert lost to a record that could not then be read.
    #[error("idempotency record {0} disappeared after a lost race")]
    Vanished(String),
}
