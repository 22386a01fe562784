//! Outbox durability across a crash between write and publish.

mod common;

use chrono::Duration;
use common::Harness;
use insure_reliability::config::{OutboxConfig, ReliabilityConfig};
use insure_reliability::events::EventRegistry;
use insure_reliability::outbox::{OutboxError, OutboxRecord, Reconciler, SweepReport};
use insure_reliability::store::KeyValueStore;
use serde_json::json;

fn claim_payload() -> serde_json::Value {
    json!({"claim": {"claim_id": "CLAIM-1A2B3C4D", "policy_id": "POL-7", "amount": 2500}})
}

#[tokio::test]
async fn test_crash_before_publish_is_recovered_once() {
    let h = Harness::new();

    // The inline publish never lands, as if the process died right after the write.
    h.topic.set_available(false);
    let outcome = h
        .publisher
        .record_and_publish("ClaimCreated", claim_payload(), "claims")
        .await
        .unwrap();
    assert!(!outcome.published);
    assert!(h.topic.deliveries().is_empty());

    h.topic.set_available(true);
    let reconciler = Reconciler::new(h.publisher.clone(), &h.config.outbox);

    // Still inside the grace period: left alone.
    assert_eq!(reconciler.sweep().await.unwrap().scanned, 0);

    h.clock.advance(Duration::seconds(h.config.outbox.grace_period_secs as i64 + 1));
    let report = reconciler.sweep().await.unwrap();
    assert_eq!(report, SweepReport { scanned: 1, published: 1, failed: 0 });

    let deliveries = h.topic.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].target, "claims");
    assert_eq!(deliveries[0].message.event_type, "ClaimCreated");

    let item = h
        .store
        .get(h.publisher.table(), &outcome.event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    let record = OutboxRecord::from_item(item).unwrap();
    assert!(record.published);
    assert!(record.published_at.is_some());

    // Nothing left for later sweeps.
    h.clock.advance(Duration::minutes(5));
    assert_eq!(reconciler.sweep().await.unwrap(), SweepReport::default());
    assert_eq!(h.topic.deliveries().len(), 1);
}

#[tokio::test]
async fn test_published_envelope_decodes_for_subscribers() {
    let h = Harness::new();

    let outcome = h
        .publisher
        .record_and_publish("ClaimCreated", claim_payload(), "claims")
        .await
        .unwrap();
    assert!(outcome.published);

    let bodies: Vec<String> = h
        .topic
        .deliveries()
        .into_iter()
        .map(|d| d.message.body)
        .collect();
    let wrapped = json!({"Message": bodies[0]}).to_string();

    let batch = EventRegistry::insurance_defaults().decode_batch(&[bodies[0].clone(), wrapped, "not json".into()]);
    assert_eq!(batch.accepted.len(), 2);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.accepted[0].event_id, outcome.event_id);
    assert_eq!(batch.accepted[0].data["claim"]["amount"], 2500);
}

#[tokio::test]
async fn test_store_outage_reports_durability_failure() {
    let h = Harness::new();
    h.store.set_available(false);

    let err = h
        .publisher
        .record_and_publish("ClaimCreated", claim_payload(), "claims")
        .await
        .unwrap_err();

    assert!(matches!(err, OutboxError::Durability { .. }));
    assert_eq!(h.topic.attempts(), 0);
}

#[tokio::test]
async fn test_backlog_drains_across_ticks() {
    let h = Harness::with_config(ReliabilityConfig {
        outbox: OutboxConfig {
            batch_size: 3,
            max_batches_per_tick: 2,
            ..OutboxConfig::default()
        },
        ..ReliabilityConfig::default()
    });

    h.topic.set_available(false);
    for _ in 0..8 {
        h.publisher
            .record_and_publish("ClaimCreated", claim_payload(), "claims")
            .await
            .unwrap();
    }
    h.topic.set_available(true);
    h.clock.advance(Duration::minutes(1));

    let reconciler = Reconciler::new(h.publisher.clone(), &h.config.outbox);
    assert_eq!(reconciler.tick().await.published, 6);
    assert_eq!(reconciler.tick().await.published, 2);
    assert_eq!(h.topic.deliveries().len(), 8);
}

#[tokio::test]
async fn test_retention_purge_after_publish() {
    let h = Harness::new();

    h.publisher
        .record_and_publish("PolicyCreated", json!({"policy": {"policy_id": "POL-7"}}), "policies")
        .await
        .unwrap();
    assert_eq!(h.store.len(h.publisher.table()).await, 1);

    let reconciler = Reconciler::new(h.publisher.clone(), &h.config.outbox);
    assert_eq!(reconciler.purge_expired().await.unwrap(), 0);

    h.clock.advance(Duration::seconds(h.config.outbox.retention_secs as i64 + 1));
    assert_eq!(reconciler.purge_expired().await.unwrap(), 1);
    assert_eq!(h.store.len(h.publisher.table()).await, 0);
}
