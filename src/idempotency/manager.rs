//! Deduplication of client-retried mutating requests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::{IdempotencyConfig, ServiceConfig, TimeoutConfig};
use crate::idempotency::key::{canonical_json, DedupKey};
use crate::idempotency::IdempotencyError;
use crate::observability::metrics;
use crate::resilience::timeouts::bounded;
use crate::store::{InsertOutcome, KeyValueStore, Precondition, RangeQuery, StoreError};

/// A previously accepted mutating request and the response it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub dedup_key: String,
    pub token: String,
    /// Canonical request body.
    pub request_fingerprint: String,
    pub response_snapshot: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of [`IdempotencyManager::check_and_reserve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not seen before: execute, then [`IdempotencyManager::commit`].
    New,
    /// Seen before: return this response instead of executing.
    Duplicate(Value),
}

/// Check-then-commit deduplication over a [`KeyValueStore`].
///
/// Two concurrent first requests can both see [`Outcome::New`] and both run
/// the mutation. Only one commit wins; the other gets the winner's response.
/// Mutations that must not apply twice should key their own record on
/// [`DedupKey::derive_id`] and insert it with `insert_if_absent`.
pub struct IdempotencyManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    table: String,
    ttl: chrono::Duration,
    store_timeout: Duration,
    purge_interval: Duration,
    purge_batch_size: usize,
}

impl IdempotencyManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        service: &ServiceConfig,
        config: &IdempotencyConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            store,
            clock,
            table: service.idempotency_table(),
            ttl: chrono::Duration::seconds(config.ttl_secs as i64),
            store_timeout: timeouts.store(),
            purge_interval: config.purge_interval(),
            purge_batch_size: config.purge_batch_size.max(1),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Look up a prior response for `token` + `body`.
    ///
    /// A store failure is returned as an error, never read as "absent".
    pub async fn check_and_reserve(&self, token: &str, body: &Value) -> Result<Outcome, IdempotencyError> {
        let key = DedupKey::derive(token, body)?;

        match self.lookup(&key).await? {
            Some(record) => {
                tracing::info!(dedup_key = %key, "Returning cached response for duplicate request");
                metrics::record_idempotency("duplicate");
                Ok(Outcome::Duplicate(record.response_snapshot))
            }
            None => Ok(Outcome::New),
        }
    }

    /// Store `response` for `token` + `body` unless another request got
    /// there first.
    ///
    /// Returns the response the caller should send: `response` on a win, the
    /// stored one on a lost race.
    pub async fn commit(&self, token: &str, body: &Value, response: Value) -> Result<Value, IdempotencyError> {
        let key = DedupKey::derive(token, body)?;
        self.commit_key(&key, body, response).await
    }

    /// Check, run `op` on a miss, then commit its response.
    ///
    /// `op` receives the dedup key so it can derive a deterministic resource
    /// id. If `op` fails nothing is committed.
    pub async fn execute<F, Fut, E>(&self, token: &str, body: &Value, op: F) -> Result<Value, E>
    where
        F: FnOnce(DedupKey) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<IdempotencyError>,
    {
        let key = DedupKey::derive(token, body)?;

        if let Some(record) = self.lookup(&key).await? {
            tracing::info!(dedup_key = %key, "Returning cached response for duplicate request");
            metrics::record_idempotency("duplicate");
            return Ok(record.response_snapshot);
        }

        let response = op(key.clone()).await?;
        Ok(self.commit_key(&key, body, response).await?)
    }

    /// Delete one batch of expired records.
    pub async fn purge_expired(&self, limit: usize) -> Result<usize, IdempotencyError> {
        let now = self.clock.now_ms();
        let query = RangeQuery::new(limit).where_below("expires_at", now + 1);
        let items = self
            .guard("purge", self.store.query(&self.table, query))
            .await?;

        let mut purged = 0;
        for item in items {
            let Some(key) = item.get("dedup_key").and_then(Value::as_str) else {
                continue;
            };
            if self.guard(key, self.store.delete(&self.table, key)).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Purge expired records every `purge_interval` until shutdown. Each tick
    /// deletes batches until one comes back short.
    pub async fn run_purger(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            table = %self.table,
            interval_secs = self.purge_interval.as_secs(),
            batch_size = self.purge_batch_size,
            "Idempotency purger starting"
        );

        let mut ticker = time::interval(self.purge_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut total = 0;
                    loop {
                        match self.purge_expired(self.purge_batch_size).await {
                            Ok(purged) => {
                                total += purged;
                                if purged < self.purge_batch_size {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Idempotency purge failed");
                                break;
                            }
                        }
                    }
                    if total > 0 {
                        tracing::info!(purged = total, "Purged expired idempotency records");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Idempotency purger received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn commit_key(&self, key: &DedupKey, body: &Value, response: Value) -> Result<Value, IdempotencyError> {
        let now = self.clock.now();
        let record = IdempotencyRecord {
            dedup_key: key.as_str().to_string(),
            token: key.token().to_string(),
            request_fingerprint: canonical_json(body),
            response_snapshot: response,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let item = serde_json::to_value(&record).map_err(|source| IdempotencyError::Malformed {
            key: key.to_string(),
            source,
        })?;

        let precondition = Precondition::AbsentOrExpired {
            field: "expires_at".to_string(),
            now_ms: now.timestamp_millis(),
        };
        let outcome = self
            .guard(key.as_str(), self.store.insert_if(&self.table, key.as_str(), item, precondition))
            .await?;

        match outcome {
            InsertOutcome::Inserted => {
                tracing::debug!(dedup_key = %key, "Idempotency record stored");
                metrics::record_idempotency("new");
                Ok(record.response_snapshot)
            }
            InsertOutcome::AlreadyExists => {
                let winner = self
                    .lookup(key)
                    .await?
                    .ok_or_else(|| IdempotencyError::Vanished(key.to_string()))?;
                tracing::info!(dedup_key = %key, "Lost idempotency race, returning winner's response");
                metrics::record_idempotency("race_lost");
                Ok(winner.response_snapshot)
            }
        }
    }

    /// Unexpired record for `key`, if any.
    async fn lookup(&self, key: &DedupKey) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let item = self
            .guard(key.as_str(), self.store.get(&self.table, key.as_str()))
            .await?;
        let Some(item) = item else {
            return Ok(None);
        };

        let record: IdempotencyRecord =
            serde_json::from_value(item).map_err(|source| IdempotencyError::Malformed {
                key: key.to_string(),
                source,
            })?;

        if record.is_expired(self.clock.now()) {
            tracing::debug!(dedup_key = %key, "Ignoring expired idempotency record");
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn guard<T, F>(&self, key: &str, fut: F) -> Result<T, IdempotencyError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        bounded(self.store_timeout, fut, || {
            StoreError::Timeout(self.store_timeout.as_millis() as u64)
        })
        .await
        .map_err(|source| {
            tracing::error!(dedup_key = key, error = %source, "Idempotency store call failed");
            IdempotencyError::Store {
                key: key.to_string(),
                source,
            }
        })
    }
}
