//! Domain event contracts.
//!
//! # Data Flow
//! ```text
//! Producer:
//!     payload → envelope.rs (wrap with eventId/eventType/eventVersion/occurredAt)
//!     → registry.rs (validate against the versioned schema)
//!     → outbox
//!
//! Consumer:
//!     raw message → envelope.rs (unwrap notification wrapper)
//!     → registry.rs (decode, skip unknown type/version without failing the batch)
//! ```

use thiserror::Error;

pub mod envelope;
pub mod registry;

pub use envelope::EventEnvelope;
pub use registry::{DecodedBatch, EventRegistry, EventSchema, SkippedEvent};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event payload must be a JSON object")]
    PayloadNotObject,
    #[error("payload field `{0}` collides with an envelope field")]
    ReservedField(String),
    #[error("unknown event type {0}")]
    UnknownType(String),
    #[error("unsupported version {version} of {event_type}")]
    UnknownVersion { event_type: String, version: u32 },
    #[error("{event_type} is missing required field `{field}`")]
    MissingField { event_type: String, field: String },
    #[error("message body is not valid JSON")]
    Unparseable,
    #[error(transparent)]
    Malformed(#[from] serde_json::Error),
}
