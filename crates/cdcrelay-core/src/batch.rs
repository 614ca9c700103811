//! Invocation payloads: change-stream batches and queue batches.

use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};
use serde_json::Value;

/// A batch delivered by the change stream. Records are kept as unparsed text
/// so the relay forwards each one byte for byte.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<Box<RawValue>>,
}

impl StreamBatch {
    /// Build a batch from parsed events.
    pub fn from_events(events: impl IntoIterator<Item = Value>) -> Result<Self, serde_json::Error> {
        let records = events
            .into_iter()
            .map(|event| to_raw_value(&event))
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }
}

/// One message delivered by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_handle: Option<String>,
    /// The bus notification, still serialized.
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    #[serde(rename = "eventSourceARN", default, skip_serializing_if = "Option::is_none")]
    pub event_source_arn: Option<String>,
}

impl QueueMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: None,
            body: body.into(),
            event_source: Some("aws:sqs".into()),
            event_source_arn: None,
        }
    }
}

/// A batch delivered by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueMessage>,
}
