//! Publish-only message topic seam.
//!
//! # Design Decisions
//! - Delivery to subscribers is at-least-once; publishers never assume a
//!   message was delivered exactly once
//! - Message attributes carry `eventType`/`eventVersion` so subscribers can
//!   filter without parsing the body

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryTopic;

/// Errors returned by a [`Topic`] backend.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic {target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },
    #[error("publish to {target} timed out after {millis}ms")]
    Timeout { target: String, millis: u64 },
    #[error("topic {0} rejected the message")]
    Rejected(String),
}

/// A message ready to be handed to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    pub body: String,
    pub event_type: String,
    pub event_version: u32,
}

/// External publish-only topic.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Publish one message to `target`, returning the broker message id.
    async fn publish(&self, target: &str, message: &TopicMessage) -> Result<String, PublishError>;
}
