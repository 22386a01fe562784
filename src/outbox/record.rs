//! Persisted outbox record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Item;

/// One domain event awaiting or having completed publication.
///
/// Timestamps are stored as epoch milliseconds so the sweep can range-query
/// on `next_attempt_at` and `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub event_id: Uuid,
    pub event_type: String,
    #[serde(default = "default_version")]
    pub event_version: u32,
    /// Serialized event envelope, published verbatim.
    pub payload: String,
    pub target: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub published: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    /// Failed re-drives by the reconciler.
    #[serde(default)]
    pub attempts: u32,
    /// The reconciler picks the record up once this is older than the grace
    /// period. Starts at `created_at` and moves forward after each failure.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_attempt_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl OutboxRecord {
    /// A fresh, unpublished record.
    pub fn pending(
        event_id: Uuid,
        event_type: impl Into<String>,
        event_version: u32,
        payload: String,
        target: impl Into<String>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            event_version,
            payload,
            target: target.into(),
            created_at: now,
            published: false,
            published_at: None,
            expires_at: now + retention,
            attempts: 0,
            next_attempt_at: now,
        }
    }

    pub fn key(&self) -> String {
        self.event_id.to_string()
    }

    pub fn to_item(&self) -> Result<Item, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_item(item: Item) -> Result<Self, serde_json::Error> {
        serde_json::from_value(item)
    }
}
