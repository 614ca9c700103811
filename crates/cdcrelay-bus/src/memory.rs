//! In-memory fan-out bus.
//!
//! Records every publish and can render the queue batch a subscriber would
//! receive. Useful for tests and local runs; nothing is persisted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use cdcrelay_core::batch::{QueueBatch, QueueMessage};
use cdcrelay_core::bus::FanoutBus;
use cdcrelay_core::envelope::{encode_notification, FanoutEnvelope};
use cdcrelay_core::error::TransportError;

/// A message accepted by the bus.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub message_id: String,
    pub topic: String,
    pub envelope: FanoutEnvelope,
}

#[derive(Default)]
pub struct MemoryBus {
    published: Mutex<Vec<PublishedMessage>>,
    failing_subjects: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish whose subject equals `subject`.
    pub fn fail_subject(&self, subject: impl Into<String>) {
        self.failing_subjects.lock().unwrap().insert(subject.into());
    }

    /// Simulate a bus outage (every publish fails with a transport error).
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// The batch a queue subscribed to `topic` would receive, one message per
    /// publish in publish order.
    pub fn queue_batch(&self, topic: &str) -> Result<QueueBatch, TransportError> {
        let published = self.published.lock().unwrap();
        let records = published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| {
                let body = encode_notification(&m.topic, &m.message_id, &m.envelope)
                    .map_err(|e| encode_failure(&m.message_id, e))?;
                Ok(QueueMessage::new(uuid::Uuid::new_v4().to_string(), body))
            })
            .collect::<Result<Vec<_>, TransportError>>()?;
        Ok(QueueBatch { records })
    }
}

fn encode_failure(message_id: &str, e: impl std::fmt::Display) -> TransportError {
    TransportError::Other(format!("failed to encode notification for {message_id}: {e}"))
}

#[async_trait]
impl FanoutBus for MemoryBus {
    async fn publish(&self, topic: &str, envelope: &FanoutEnvelope) -> Result<String, TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Http("memory bus unavailable".into()));
        }
        if self.failing_subjects.lock().unwrap().contains(&envelope.subject) {
            return Err(TransportError::Rejected {
                endpoint: self.endpoint().to_string(),
                reason: format!("subject '{}' rejected", envelope.subject),
            });
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        self.published.lock().unwrap().push(PublishedMessage {
            message_id: message_id.clone(),
            topic: topic.to_string(),
            envelope: envelope.clone(),
        });
        Ok(message_id)
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdcrelay_core::envelope::{decode_outer, MessageAttribute, OPERATION_ATTRIBUTE};
    use std::collections::BTreeMap;

    fn env(subject: &str) -> FanoutEnvelope {
        let mut attributes = BTreeMap::new();
        attributes.insert(OPERATION_ATTRIBUTE.to_string(), MessageAttribute::string("INSERT"));
        FanoutEnvelope {
            subject: subject.into(),
            body: "{\"eventID\":\"e1\"}".into(),
            attributes,
        }
    }

    #[tokio::test]
    async fn publish_records_message() {
        let bus = MemoryBus::new();
        let id = bus.publish("topic-a", &env("INSERT-e1")).await.unwrap();
        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_id, id);
    }

    #[tokio::test]
    async fn failing_subject_is_rejected() {
        let bus = MemoryBus::new();
        bus.fail_subject("INSERT-e2");
        assert!(bus.publish("t", &env("INSERT-e1")).await.is_ok());
        let err = bus.publish("t", &env("INSERT-e2")).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn outage_is_retryable() {
        let bus = MemoryBus::new();
        bus.set_unavailable(true);
        let err = bus.publish("t", &env("INSERT-e1")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn encode_failure_is_not_a_deserialization_error() {
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = encode_failure("msg-1", cause);
        assert!(matches!(err, TransportError::Other(_)));
        assert!(err.to_string().starts_with("failed to encode notification for msg-1"));
    }

    #[tokio::test]
    async fn queue_batch_filters_by_topic() {
        let bus = MemoryBus::new();
        bus.publish("a", &env("INSERT-e1")).await.unwrap();
        bus.publish("b", &env("INSERT-e2")).await.unwrap();

        let batch = bus.queue_batch("a").unwrap();
        assert_eq!(batch.records.len(), 1);
        let outer = decode_outer(&batch.records[0].body).unwrap();
        assert_eq!(outer, env("INSERT-e1"));
    }
}
