//! Versioned event schemas and consumer-side batch decoding.

use std::collections::HashMap;

use serde_json::Value;

use super::envelope::{unwrap_notification, EventEnvelope};
use super::EventError;

/// Shape contract for one `(event_type, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    pub event_type: String,
    pub version: u32,
    /// Top-level payload fields that must be present.
    pub required: Vec<String>,
}

impl EventSchema {
    pub fn new(event_type: impl Into<String>, version: u32, required: &[&str]) -> Self {
        Self {
            event_type: event_type.into(),
            version,
            required: required.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Known event contracts, keyed by type then version.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    schemas: HashMap<String, HashMap<u32, EventSchema>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the policy and claim event contracts.
    pub fn insurance_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EventSchema::new("PolicyCreated", 1, &["policy"]));
        registry.register(EventSchema::new("PolicyUpdated", 1, &["policy"]));
        registry.register(EventSchema::new("ClaimCreated", 1, &["claim"]));
        registry.register(EventSchema::new("ClaimUpdated", 1, &["claim"]));
        registry
    }

    pub fn register(&mut self, schema: EventSchema) {
        self.schemas
            .entry(schema.event_type.clone())
            .or_default()
            .insert(schema.version, schema);
    }

    /// Latest registered version of `event_type`.
    pub fn latest_version(&self, event_type: &str) -> Option<u32> {
        self.schemas.get(event_type)?.keys().max().copied()
    }

    pub fn validate(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        let versions = self
            .schemas
            .get(&envelope.event_type)
            .ok_or_else(|| EventError::UnknownType(envelope.event_type.clone()))?;
        let schema = versions
            .get(&envelope.event_version)
            .ok_or_else(|| EventError::UnknownVersion {
                event_type: envelope.event_type.clone(),
                version: envelope.event_version,
            })?;

        match schema.required.iter().find(|f| !envelope.data.contains_key(*f)) {
            Some(missing) => Err(EventError::MissingField {
                event_type: envelope.event_type.clone(),
                field: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Decode a batch of raw message bodies.
    ///
    /// Unparseable bodies and events of unknown type or version are skipped
    /// and reported; they never fail the batch.
    pub fn decode_batch<S: AsRef<str>>(&self, bodies: &[S]) -> DecodedBatch {
        let mut batch = DecodedBatch::default();

        for (index, body) in bodies.iter().enumerate() {
            let decoded = unwrap_notification(body.as_ref())
                .ok_or(EventError::Unparseable)
                .and_then(|value: Value| {
                    serde_json::from_value::<EventEnvelope>(value).map_err(EventError::from)
                })
                .and_then(|envelope| self.validate(&envelope).map(|_| envelope));

            match decoded {
                Ok(envelope) => batch.accepted.push(envelope),
                Err(reason) => {
                    tracing::warn!(index, error = %reason, "Skipping undeliverable event");
                    batch.skipped.push(SkippedEvent { index, reason });
                }
            }
        }
        batch
    }
}

#[derive(Debug)]
pub struct SkippedEvent {
    pub index: usize,
    pub reason: EventError,
}

#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub accepted: Vec<EventEnvelope>,
    pub skipped: Vec<SkippedEvent>,
}
