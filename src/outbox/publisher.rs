//! Record-then-publish for domain events.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{OutboxConfig, ServiceConfig, TimeoutConfig};
use crate::events::{EventEnvelope, EventError, EventRegistry};
use crate::observability::metrics;
use crate::outbox::record::OutboxRecord;
use crate::resilience::timeouts::bounded;
use crate::store::{fields, Condition, InsertOutcome, KeyValueStore, StoreError, UpdateOutcome};
use crate::topic::{PublishError, Topic, TopicMessage};

#[derive(Debug, Error)]
pub enum OutboxError {
    /// The record was not written; nothing was published.
    #[error("outbox record {event_id} could not be stored: {source}")]
    Durability {
        event_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("event rejected before recording: {0}")]
    InvalidEvent(#[from] EventError),

    #[error("outbox record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("outbox store error: {0}")]
    Store(#[from] StoreError),
}

/// A domain event to be recorded and published.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub event_version: u32,
    pub data: Value,
    pub target: String,
    pub trace_id: Option<String>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, data: Value, target: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_version: 1,
            data,
            target: target.into(),
            trace_id: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.event_version = version;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Result of [`OutboxPublisher::record_and_publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub event_id: Uuid,
    /// Whether the inline publish was confirmed. `false` means the event is
    /// durable and left for the reconciler.
    pub published: bool,
}

/// Durably records domain events before publishing them.
pub struct OutboxPublisher {
    pub(super) store: Arc<dyn KeyValueStore>,
    topic: Arc<dyn Topic>,
    pub(super) clock: Arc<dyn Clock>,
    registry: Option<Arc<EventRegistry>>,
    pub(super) table: String,
    retention: chrono::Duration,
    publish_timeout: Duration,
    pub(super) store_timeout: Duration,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        topic: Arc<dyn Topic>,
        clock: Arc<dyn Clock>,
        service: &ServiceConfig,
        outbox: &OutboxConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        let registry = outbox
            .validate_events
            .then(|| Arc::new(EventRegistry::insurance_defaults()));

        Self {
            store,
            topic,
            clock,
            registry,
            table: service.outbox_table(),
            retention: chrono::Duration::seconds(outbox.retention_secs as i64),
            publish_timeout: timeouts.publish(),
            store_timeout: timeouts.store(),
        }
    }

    /// Validate outgoing events against `registry` instead of the defaults.
    pub fn with_registry(mut self, registry: Arc<EventRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.registry = None;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn record_and_publish(
        &self,
        event_type: &str,
        data: Value,
        target: &str,
    ) -> Result<RecordOutcome, OutboxError> {
        self.record_and_publish_event(NewEvent::new(event_type, data, target))
            .await
    }

    /// Write the record, then attempt one publish.
    ///
    /// Only a failed write is an error. A failed publish is logged and the
    /// event is re-driven by the reconciler.
    pub async fn record_and_publish_event(&self, event: NewEvent) -> Result<RecordOutcome, OutboxError> {
        let event_id = Uuid::new_v4();
        let now = self.clock.now();

        let envelope = EventEnvelope::new(
            event_id,
            event.event_type.clone(),
            event.event_version,
            now,
            event.data,
        )?
        .with_trace_id(event.trace_id);

        if let Some(registry) = &self.registry {
            registry.validate(&envelope)?;
        }

        let record = OutboxRecord::pending(
            event_id,
            event.event_type,
            event.event_version,
            envelope.to_json()?,
            event.target,
            now,
            self.retention,
        );
        let key = record.key();

        let insert = bounded(
            self.store_timeout,
            self.store.insert_if_absent(&self.table, &key, record.to_item()?),
            || StoreError::Timeout(self.store_timeout.as_millis() as u64),
        )
        .await;

        let source = match insert {
            Ok(InsertOutcome::Inserted) => None,
            Ok(InsertOutcome::AlreadyExists) => Some(StoreError::Conflict {
                table: self.table.clone(),
                key: key.clone(),
            }),
            Err(e) => Some(e),
        };
        if let Some(source) = source {
            tracing::error!(%event_id, event_type = %record.event_type, error = %source, "Failed to record outbox event");
            return Err(OutboxError::Durability { event_id, source });
        }

        tracing::debug!(%event_id, event_type = %record.event_type, target = %record.target, "Outbox event recorded");
        metrics::record_outbox_recorded();

        let published = self.publish_record(&record, "inline").await;
        Ok(RecordOutcome { event_id, published })
    }

    /// Publish a stored record and mark it published.
    ///
    /// Returns whether the topic confirmed the publish.
    pub(super) async fn publish_record(&self, record: &OutboxRecord, path: &'static str) -> bool {
        let message = TopicMessage {
            body: record.payload.clone(),
            event_type: record.event_type.clone(),
            event_version: record.event_version,
        };

        let publish = bounded(
            self.publish_timeout,
            self.topic.publish(&record.target, &message),
            || PublishError::Timeout {
                target: record.target.clone(),
                millis: self.publish_timeout.as_millis() as u64,
            },
        )
        .await;

        match publish {
            Ok(message_id) => {
                tracing::debug!(event_id = %record.event_id, %message_id, path, "Event published");
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %record.event_id,
                    target = %record.target,
                    path,
                    error = %e,
                    "Publish deferred to reconciliation"
                );
                metrics::record_outbox_deferred();
                return false;
            }
        }

        self.mark_published(record, path).await;
        true
    }

    async fn mark_published(&self, record: &OutboxRecord, path: &'static str) {
        let key = record.key();
        let update = bounded(
            self.store_timeout,
            self.store.update_if(
                &self.table,
                &key,
                Condition::new("published", false),
                fields([
                    ("published", json!(true)),
                    ("published_at", json!(self.clock.now_ms())),
                ]),
            ),
            || StoreError::Timeout(self.store_timeout.as_millis() as u64),
        )
        .await;

        match update {
            Ok(UpdateOutcome::Updated) => {
                metrics::record_outbox_published(path);
            }
            Ok(UpdateOutcome::ConditionFailed) => {
                tracing::debug!(event_id = %record.event_id, path, "Event already marked published");
            }
            Ok(UpdateOutcome::NotFound) => {
                tracing::warn!(event_id = %record.event_id, path, "Published event no longer in outbox");
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %record.event_id,
                    path,
                    error = %e,
                    "Published but not marked; reconciler will publish again"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use crate::topic::InMemoryTopic;

    fn publisher(store: &InMemoryStore, topic: &InMemoryTopic) -> OutboxPublisher {
        OutboxPublisher::new(
            Arc::new(store.clone()),
            Arc::new(topic.clone()),
            Arc::new(ManualClock::default()),
            &ServiceConfig::default(),
            &OutboxConfig::default(),
            &TimeoutConfig::default(),
        )
    }

    async fn stored(store: &InMemoryStore, table: &str, event_id: Uuid) -> OutboxRecord {
        let item = store.get(table, &event_id.to_string()).await.unwrap().unwrap();
        OutboxRecord::from_item(item).unwrap()
    }

    #[tokio::test]
    async fn test_record_then_publish() {
        let store = InMemoryStore::new();
        let topic = InMemoryTopic::new();
        let outbox = publisher(&store, &topic);

        let outcome = outbox
            .record_and_publish("ClaimCreated", json!({"claim": {"claimId": "CLAIM-1"}}), "claims")
            .await
            .unwrap();
        assert!(outcome.published);

        let record = stored(&store, outbox.table(), outcome.event_id).await;
        assert!(record.published);
        assert!(record.published_at.is_some());

        let deliveries = topic.deliveries();
        assert_eq!(deliveries.len(), 1);
        let body: Value = serde_json::from_str(&deliveries[0].message.body).unwrap();
        assert_eq!(body["eventId"], outcome.event_id.to_string());
        assert_eq!(body["eventType"], "ClaimCreated");
        assert_eq!(body["claim"]["claimId"], "CLAIM-1");
    }

    #[tokio::test]
    async fn test_publish_failure_is_deferred_not_fatal() {
        let store = InMemoryStore::new();
        let topic = InMemoryTopic::new();
        topic.set_available(false);
        let outbox = publisher(&store, &topic);

        let outcome = outbox
            .record_and_publish("PolicyCreated", json!({"policy": {}}), "policies")
            .await
            .unwrap();
        assert!(!outcome.published);

        let record = stored(&store, outbox.table(), outcome.event_id).await;
        assert!(!record.published);
        assert!(record.published_at.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_prevents_publish() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let topic = InMemoryTopic::new();
        let outbox = publisher(&store, &topic);

        let err = outbox
            .record_and_publish("ClaimCreated", json!({"claim": {}}), "claims")
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::Durability { source: StoreError::Unavailable(_), .. }));
        assert_eq!(topic.attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_event_writes_nothing() {
        let store = InMemoryStore::new();
        let topic = InMemoryTopic::new();
        let outbox = publisher(&store, &topic);

        let err = outbox
            .record_and_publish("ClaimCreated", json!({"amount": 10}), "claims")
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::InvalidEvent(_)));
        assert_eq!(store.len(outbox.table()).await, 0);
        assert_eq!(topic.attempts(), 0);
    }

    #[tokio::test]
    async fn test_trace_id_carried_in_envelope() {
        let store = InMemoryStore::new();
        let topic = InMemoryTopic::new();
        let outbox = publisher(&store, &topic).without_validation();

        outbox
            .record_and_publish_event(
                NewEvent::new("QuoteIssued", json!({"quoteId": "Q-1"}), "quotes")
                    .with_version(2)
                    .with_trace_id("trace-abc"),
            )
            .await
            .unwrap();

        let delivery = &topic.deliveries()[0];
        assert_eq!(delivery.message.event_version, 2);
        let body: Value = serde_json::from_str(&delivery.message.body).unwrap();
        assert_eq!(body["traceId"], "trace-abc");
    }
}
