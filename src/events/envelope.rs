//! Published event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::EventError;

/// Envelope keys that domain payload fields may not shadow.
pub const RESERVED_FIELDS: [&str; 5] = ["eventId", "eventType", "eventVersion", "occurredAt", "traceId"];

/// JSON body published to a topic.
///
/// Domain payload fields sit next to the envelope fields at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl EventEnvelope {
    /// Wrap a domain payload. The payload must be a JSON object whose keys
    /// do not collide with [`RESERVED_FIELDS`].
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        payload: Value,
    ) -> Result<Self, EventError> {
        let Value::Object(data) = payload else {
            return Err(EventError::PayloadNotObject);
        };
        if let Some(field) = RESERVED_FIELDS.iter().find(|f| data.contains_key(**f)) {
            return Err(EventError::ReservedField((*field).to_string()));
        }

        Ok(Self {
            event_id,
            event_type: event_type.into(),
            event_version,
            occurred_at,
            trace_id: None,
            data,
        })
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Unwrap a message delivered through a fan-out queue.
///
/// Subscribers may receive the raw envelope, a `{"Message": "<json>"}`
/// notification wrapper, or a `{"Records": [{"Sns": {"Message": ...}}]}`
/// batch. Anything unparseable yields `None`.
pub fn unwrap_notification(body: &str) -> Option<Value> {
    let outer: Value = serde_json::from_str(body).ok()?;

    if let Some(inner) = outer.get("Message").and_then(Value::as_str) {
        return serde_json::from_str(inner).ok();
    }
    if let Some(inner) = outer
        .get("Records")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("Sns"))
        .and_then(|s| s.get("Message"))
        .and_then(Value::as_str)
    {
        return serde_json::from_str(inner).ok();
    }
    Some(outer)
}
