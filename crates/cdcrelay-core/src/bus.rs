//! The `FanoutBus` trait: the seam between the relay and the pub/sub layer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{FanoutEnvelope, MessageAttribute};
use crate::error::TransportError;

/// A publish/subscribe bus that broadcasts each message to its subscribers.
///
/// # Thread Safety
/// Implementations are shared across record tasks as `Arc<dyn FanoutBus>`
/// and must not mutate shared client state per call.
#[async_trait]
pub trait FanoutBus: Send + Sync + 'static {
    /// Publish one envelope to `topic`, returning the bus-assigned message id.
    async fn publish(&self, topic: &str, envelope: &FanoutEnvelope) -> Result<String, TransportError>;

    /// The bus identifier (endpoint URL or name), for logs.
    fn endpoint(&self) -> &str;
}

/// Wire form of a publish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishRequest {
    pub topic_arn: String,
    pub subject: String,
    pub message: String,
    pub message_attributes: BTreeMap<String, MessageAttribute>,
    pub message_structure: String,
}

impl PublishRequest {
    pub fn new(topic: &str, envelope: &FanoutEnvelope) -> Self {
        Self {
            topic_arn: topic.to_string(),
            subject: envelope.subject.clone(),
            message: envelope.body.clone(),
            message_attributes: envelope.attributes.clone(),
            message_structure: "string".into(),
        }
    }
}

/// Wire form of a successful publish response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishResponse {
    pub message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::OPERATION_ATTRIBUTE;

    #[test]
    fn publish_request_shape() {
        let mut attributes = BTreeMap::new();
        attributes.insert(OPERATION_ATTRIBUTE.to_string(), MessageAttribute::string("MODIFY"));
        let env = FanoutEnvelope {
            subject: "MODIFY-e3".into(),
            body: "{}".into(),
            attributes,
        };
        let json = serde_json::to_value(PublishRequest::new("arn:aws:sns:eu-west-1:1:t", &env)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "TopicArn": "arn:aws:sns:eu-west-1:1:t",
                "Subject": "MODIFY-e3",
                "Message": "{}",
                "MessageAttributes": {"Operation": {"DataType": "String", "StringValue": "MODIFY"}},
                "MessageStructure": "string"
            })
        );
    }
}
