//! In-memory [`Topic`] that records every delivery.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use super::{PublishError, Topic, TopicMessage};

/// A delivered message as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub target: String,
    pub message: TopicMessage,
}

/// Topic double for local runs and tests.
///
/// Supports a full outage switch, failing the next N publishes, and
/// permanently rejecting chosen targets.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTopic {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    down: Arc<AtomicBool>,
    fail_next: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
    rejected: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryTopic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Refuse every publish to `target` from now on.
    pub fn reject_target(&self, target: &str) {
        self.rejected
            .lock()
            .expect("topic mutex poisoned")
            .insert(target.to_string());
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().expect("topic mutex poisoned").clone()
    }

    /// Publish calls seen, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Topic for InMemoryTopic {
    async fn publish(&self, target: &str, message: &TopicMessage) -> Result<String, PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.down.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable {
                target: target.to_string(),
                reason: "topic switched off".into(),
            });
        }

        if self.rejected.lock().expect("topic mutex poisoned").contains(target) {
            return Err(PublishError::Rejected(target.to_string()));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PublishError::Unavailable {
                target: target.to_string(),
                reason: "injected failure".into(),
            });
        }

        let message_id = Uuid::new_v4().to_string();
        self.deliveries
            .lock()
            .expect("topic mutex poisoned")
            .push(Delivery {
                message_id: message_id.clone(),
                target: target.to_string(),
                message: message.clone(),
            });
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> TopicMessage {
        TopicMessage {
            body: "{}".into(),
            event_type: "ClaimCreated".into(),
            event_version: 1,
        }
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let topic = InMemoryTopic::new();
        topic.fail_next(2);

        assert!(topic.publish("claims", &message()).await.is_err());
        assert!(topic.publish("claims", &message()).await.is_err());
        assert!(topic.publish("claims", &message()).await.is_ok());

        assert_eq!(topic.attempts(), 3);
        assert_eq!(topic.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_outage_switch() {
        let topic = InMemoryTopic::new();
        topic.set_available(false);
        assert!(matches!(
            topic.publish("claims", &message()).await,
            Err(PublishError::Unavailable { .. })
        ));
        topic.set_available(true);
        assert!(topic.publish("claims", &message()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_target_only() {
        let topic = InMemoryTopic::new();
        topic.reject_target("legacy-claims");

        assert!(matches!(
            topic.publish("legacy-claims", &message()).await,
            Err(PublishError::Rejected(_))
        ));
        assert!(topic.publish("claims", &message()).await.is_ok());
        assert_eq!(topic.deliveries().len(), 1);
    }
}
