//! Background re-drive of unpublished outbox records.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::OutboxConfig;
use crate::observability::metrics;
use crate::outbox::publisher::{OutboxError, OutboxPublisher};
use crate::outbox::record::OutboxRecord;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::bounded;
use crate::store::{fields, Condition, Item, RangeQuery, StoreError, StoreResult};

/// Counts from one sweep batch or one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub published: usize,
    pub failed: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.published += other.published;
        self.failed += other.failed;
    }
}

/// Periodically publishes records the inline path left behind and purges
/// expired ones.
///
/// Shares nothing with request handlers except the store.
pub struct Reconciler {
    publisher: Arc<OutboxPublisher>,
    grace: chrono::Duration,
    batch_size: usize,
    interval: Duration,
    max_batches_per_tick: usize,
    max_retry_delay: Duration,
}

impl Reconciler {
    pub fn new(publisher: Arc<OutboxPublisher>, config: &OutboxConfig) -> Self {
        Self {
            publisher,
            grace: chrono::Duration::seconds(config.grace_period_secs as i64),
            batch_size: config.batch_size,
            interval: config.sweep_interval(),
            max_batches_per_tick: config.max_batches_per_tick,
            max_retry_delay: config.max_retry_delay(),
        }
    }

    /// Re-publish one batch of due, unpublished records, oldest due first.
    ///
    /// A record is due once `next_attempt_at` is older than the grace period.
    /// Every failure pushes `next_attempt_at` out with exponential backoff, so
    /// records a target keeps refusing never hold back the rest of the backlog.
    pub async fn sweep(&self) -> Result<SweepReport, OutboxError> {
        let cutoff = self.publisher.clock.now_ms() - self.grace.num_milliseconds();
        let query = RangeQuery::new(self.batch_size)
            .where_eq("published", false)
            .where_below("next_attempt_at", cutoff);

        let items = self.query(query).await?;
        let mut report = SweepReport {
            scanned: items.len(),
            ..SweepReport::default()
        };

        for item in items {
            let record = match OutboxRecord::from_item(item.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed outbox record, deferring");
                    report.failed += 1;
                    if let Some(key) = item_key(&item) {
                        let attempts = item.get("attempts").and_then(|v| v.as_u64()).unwrap_or(0);
                        self.defer(&key, attempts as u32 + 1).await;
                    }
                    continue;
                }
            };

            if self.publisher.publish_record(&record, "sweep").await {
                report.published += 1;
            } else {
                report.failed += 1;
                self.defer(&record.key(), record.attempts + 1).await;
            }
        }

        Ok(report)
    }

    /// Record a failed re-drive and schedule the next one.
    async fn defer(&self, key: &str, attempts: u32) {
        let delay = calculate_backoff(attempts.saturating_sub(1), self.interval, self.max_retry_delay, 0.0);
        let next_attempt_at = self.publisher.clock.now_ms() + delay.as_millis() as i64;

        let update = bounded(
            self.publisher.store_timeout,
            self.publisher.store.update_if(
                &self.publisher.table,
                key,
                Condition::new("published", false),
                fields([
                    ("attempts", json!(attempts)),
                    ("next_attempt_at", json!(next_attempt_at)),
                ]),
            ),
            || self.store_timeout(),
        )
        .await;

        match update {
            Ok(_) => tracing::debug!(event_id = key, attempts, next_attempt_at, "Outbox record rescheduled"),
            Err(e) => tracing::warn!(event_id = key, error = %e, "Could not reschedule outbox record"),
        }
    }

    /// Sweep until a batch comes back short, nothing in it could be
    /// published, or `max_batches_per_tick` batches ran.
    pub async fn tick(&self) -> SweepReport {
        let mut total = SweepReport::default();

        for _ in 0..self.max_batches_per_tick {
            let report = match self.sweep().await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Outbox sweep failed");
                    break;
                }
            };
            total.absorb(report);

            if report.scanned < self.batch_size || report.published == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        total
    }

    /// Delete one batch of records past `expires_at`.
    pub async fn purge_expired(&self) -> Result<usize, OutboxError> {
        let now = self.publisher.clock.now_ms();
        // `expires_at <= now`
        let query = RangeQuery::new(self.batch_size).where_below("expires_at", now + 1);
        let items = self.query(query).await?;

        let mut purged = 0;
        for item in items {
            let key = match OutboxRecord::from_item(item.clone()) {
                Ok(record) => {
                    if !record.published {
                        tracing::warn!(
                            event_id = %record.event_id,
                            event_type = %record.event_type,
                            "Purging expired outbox record that was never published"
                        );
                    }
                    record.key()
                }
                Err(e) => match item_key(&item) {
                    Some(key) => {
                        tracing::warn!(event_id = %key, error = %e, "Purging malformed outbox record");
                        key
                    }
                    None => {
                        tracing::warn!(error = %e, "Expired outbox item has no event_id, skipping");
                        continue;
                    }
                },
            };

            let deleted = bounded(
                self.publisher.store_timeout,
                self.publisher.store.delete(&self.publisher.table, &key),
                || self.store_timeout(),
            )
            .await?;
            if deleted {
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged, "Purged expired outbox records");
            metrics::record_outbox_purged(purged as u64);
        }
        Ok(purged)
    }

    /// Run until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            table = %self.publisher.table,
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Outbox reconciler starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.scanned > 0 {
                        tracing::info!(
                            scanned = report.scanned,
                            published = report.published,
                            failed = report.failed,
                            "Outbox sweep completed"
                        );
                    }
                    if let Err(e) = self.purge_expired().await {
                        tracing::warn!(error = %e, "Outbox purge failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Outbox reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn query(&self, query: RangeQuery) -> StoreResult<Vec<Item>> {
        bounded(
            self.publisher.store_timeout,
            self.publisher.store.query(&self.publisher.table, query),
            || self.store_timeout(),
        )
        .await
    }

    fn store_timeout(&self) -> StoreError {
        StoreError::Timeout(self.publisher.store_timeout.as_millis() as u64)
    }
}

fn item_key(item: &Item) -> Option<String> {
    item.get("event_id").and_then(|v| v.as_str()).map(str::to_string)
}
