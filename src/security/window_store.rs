//! Shared sliding-window storage for multi-instance rate limiting.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::store::{
    fields, Condition, InsertOutcome, KeyValueStore, RangeQuery, StoreError, StoreResult,
    UpdateOutcome,
};

/// Atomic per-key sliding-window admission.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Drop timestamps at or before `now_ms - window_ms`, then record `now_ms`
    /// and return `true` only if fewer than `limit` remain.
    async fn admit(&self, key: &str, now_ms: i64, window_ms: i64, limit: u32) -> StoreResult<bool>;

    /// Delete up to `limit` windows whose every stamp expired by `now_ms`.
    /// Returns the number deleted.
    async fn purge_expired(&self, now_ms: i64, limit: usize) -> StoreResult<usize>;
}

#[derive(Debug, Serialize, Deserialize)]
struct WindowItem {
    #[serde(default)]
    key: String,
    version: u64,
    stamps: Vec<i64>,
    expires_at: i64,
}

/// [`WindowStore`] over any [`KeyValueStore`], using optimistic
/// compare-and-swap on a `version` field.
///
/// Each admission reads the window, prunes it, and writes it back only if
/// the version is unchanged. A lost swap re-reads, up to `max_attempts`
/// times, after which [`StoreError::Conflict`] is returned.
pub struct KvWindowStore {
    store: Arc<dyn KeyValueStore>,
    table: String,
    max_attempts: u32,
}

impl KvWindowStore {
    pub fn new(store: Arc<dyn KeyValueStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            max_attempts: 8,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    async fn try_admit(&self, key: &str, now_ms: i64, window_ms: i64, limit: u32) -> StoreResult<Option<bool>> {
        let current = match self.store.get(&self.table, key).await? {
            Some(item) => Some(serde_json::from_value::<WindowItem>(item)?),
            None => None,
        };

        let horizon = now_ms - window_ms;
        let (version, mut stamps) = match current {
            Some(w) => (Some(w.version), w.stamps),
            None => (None, Vec::new()),
        };
        stamps.retain(|t| *t > horizon);

        if stamps.len() >= limit as usize {
            return Ok(Some(false));
        }
        stamps.push(now_ms);
        let expires_at = now_ms + window_ms;

        let written = match version {
            None => {
                let item = serde_json::to_value(WindowItem {
                    key: key.to_string(),
                    version: 1,
                    stamps,
                    expires_at,
                })?;
                self.store.insert_if_absent(&self.table, key, item).await? == InsertOutcome::Inserted
            }
            Some(v) => {
                let update = fields([
                    ("version", json!(v + 1)),
                    ("stamps", json!(stamps)),
                    ("expires_at", json!(expires_at)),
                ]);
                self.store
                    .update_if(&self.table, key, Condition::new("version", v), update)
                    .await?
                    == UpdateOutcome::Updated
            }
        };

        Ok(written.then_some(true))
    }
}

#[async_trait]
impl WindowStore for KvWindowStore {
    async fn admit(&self, key: &str, now_ms: i64, window_ms: i64, limit: u32) -> StoreResult<bool> {
        for attempt in 1..=self.max_attempts {
            if let Some(admitted) = self.try_admit(key, now_ms, window_ms, limit).await? {
                return Ok(admitted);
            }
            tracing::debug!(key, attempt, "Rate window write raced, retrying");
        }

        Err(StoreError::Conflict {
            table: self.table.clone(),
            key: key.to_string(),
        })
    }

    /// Deletes are guarded on `version`, so a window admitted after the
    /// query survives.
    async fn purge_expired(&self, now_ms: i64, limit: usize) -> StoreResult<usize> {
        // `expires_at <= now_ms`
        let query = RangeQuery::new(limit).where_below("expires_at", now_ms + 1);
        let items = self.store.query(&self.table, query).await?;

        let mut purged = 0;
        for item in items {
            let window = match serde_json::from_value::<WindowItem>(item) {
                Ok(window) if !window.key.is_empty() => window,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(table = %self.table, error = %e, "Skipping malformed rate window");
                    continue;
                }
            };
            let outcome = self
                .store
                .delete_if(&self.table, &window.key, Condition::new("version", window.version))
                .await?;
            if outcome == UpdateOutcome::Updated {
                purged += 1;
            }
        }
        Ok(purged)
    }
}
