//! Durable key-value store seam.
//!
//! # Data Flow
//! ```text
//! OutboxPublisher ──insert_if_absent──▶ outbox table ◀──query/update_if── Reconciler
//! IdempotencyManager ──get / insert_if──▶ idempotency table
//! KvWindowStore ──get / update_if (CAS)──▶ rate window table
//! ```
//!
//! # Design Decisions
//! - Items are JSON documents; timestamps are epoch milliseconds so range
//!   conditions compare numerically on every backend
//! - Conditional writes are explicit trait methods, not assumed constraints,
//!   so the same callers work on key-value and relational backends
//! - The store is accessed without local locking; correctness relies on the
//!   backend's own conditional-write atomicity

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryStore;

/// A stored document.
pub type Item = Value;

/// Errors returned by a [`KeyValueStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0}ms")]
    Timeout(u64),
    #[error("conflicting write on {table}/{key}")]
    Conflict { table: String, key: String },
    #[error("item {table}/{key} not found")]
    NotFound { table: String, key: String },
    #[error("malformed item: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Precondition for a conditional insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The key must not exist.
    Absent,
    /// The key must not exist, or its numeric `field` must be `<= now_ms`.
    AbsentOrExpired { field: String, now_ms: i64 },
}

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Equality guard for [`KeyValueStore::update_if`].
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub equals: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
        }
    }
}

/// Outcome of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    ConditionFailed,
    NotFound,
}

/// Secondary-key range query.
///
/// Selects items whose `equals` field matches, whose numeric `below` field is
/// strictly less than the bound, ordered ascending by that field.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub equals: Option<(String, Value)>,
    pub below: Option<(String, i64)>,
    pub limit: usize,
}

impl RangeQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            equals: None,
            below: None,
            limit,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals = Some((field.into(), value.into()));
        self
    }

    pub fn where_below(mut self, field: impl Into<String>, bound: i64) -> Self {
        self.below = Some((field.into(), bound));
        self
    }
}

/// External durable store used by the outbox, idempotency and shared
/// rate-limit components.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Unconditional write.
    async fn put(&self, table: &str, key: &str, item: Item) -> StoreResult<()>;

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Item>>;

    /// Atomic conditional insert.
    async fn insert_if(
        &self,
        table: &str,
        key: &str,
        item: Item,
        precondition: Precondition,
    ) -> StoreResult<InsertOutcome>;

    /// Create-if-absent.
    async fn insert_if_absent(&self, table: &str, key: &str, item: Item) -> StoreResult<InsertOutcome> {
        self.insert_if(table, key, item, Precondition::Absent).await
    }

    /// Merge `fields` into an existing item.
    async fn update(&self, table: &str, key: &str, fields: Map<String, Value>) -> StoreResult<()>;

    /// Merge `fields` only when the guard holds, atomically.
    async fn update_if(
        &self,
        table: &str,
        key: &str,
        condition: Condition,
        fields: Map<String, Value>,
    ) -> StoreResult<UpdateOutcome>;

    async fn query(&self, table: &str, query: RangeQuery) -> StoreResult<Vec<Item>>;

    /// Returns whether an item was removed.
    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool>;

    /// Remove the item only when the guard holds, atomically.
    async fn delete_if(&self, table: &str, key: &str, condition: Condition) -> StoreResult<UpdateOutcome>;
}

/// Builds an update map from `(field, value)` pairs.
pub fn fields<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
