//! Envelope codec: change event → fan-out envelope → bus notification, and back.
//!
//! ```text
//! queue body ──decode_outer──▶ FanoutEnvelope ──decode_change_record──▶ ChangeRecord
//!   (notification JSON)          (.body = change event JSON)
//! ```
//!
//! Each step fails independently so a bad message is attributed to the layer
//! that broke.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Layer};
use crate::record::{ChangeRecord, OperationKind, StreamRecord};

/// Attribute carrying the operation kind on every published envelope.
pub const OPERATION_ATTRIBUTE: &str = "Operation";

/// A typed message attribute in publish form (`{"DataType", "StringValue"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    #[serde(rename = "DataType")]
    pub data_type: String,
    #[serde(rename = "StringValue")]
    pub string_value: String,
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".into(),
            string_value: value.into(),
        }
    }
}

/// The message published to the fan-out bus for one change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    /// `{operation}-{eventId}`, stable across redeliveries.
    pub subject: String,
    /// The serialized change event, opaque to the bus.
    pub body: String,
    pub attributes: BTreeMap<String, MessageAttribute>,
}

impl FanoutEnvelope {
    /// Operation kind carried by the routing attribute.
    pub fn operation(&self) -> OperationKind {
        OperationKind::from_event_name(
            self.attributes
                .get(OPERATION_ATTRIBUTE)
                .map(|a| a.string_value.as_str()),
        )
    }
}

// ─── Bus notification (outer layer) ───────────────────────────────────────────

/// A message attribute in notification form (`{"Type", "Value"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAttribute {
    #[serde(rename = "Type")]
    pub data_type: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// The notification the bus delivers into each subscribed queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(rename = "Type", default = "notification_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(alias = "message")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message_attributes: BTreeMap<String, NotificationAttribute>,
}

fn notification_type() -> String {
    "Notification".into()
}

// ─── Codec ────────────────────────────────────────────────────────────────────

/// Build the fan-out envelope for a stream record.
///
/// The body is the event text as received; only the subject and the
/// `Operation` attribute are derived.
pub fn encode_fanout(record: &StreamRecord) -> Result<FanoutEnvelope, DecodeError> {
    let event_id = record
        .event_id
        .as_deref()
        .ok_or_else(|| DecodeError::missing("eventID"))?;
    let operation = record.operation();

    let mut attributes = BTreeMap::new();
    attributes.insert(
        OPERATION_ATTRIBUTE.to_string(),
        MessageAttribute::string(operation.as_str()),
    );

    Ok(FanoutEnvelope {
        subject: format!("{operation}-{event_id}"),
        body: record.source.clone(),
        attributes,
    })
}

/// Render the notification a bus would deliver for `envelope`.
pub fn encode_notification(
    topic: &str,
    message_id: &str,
    envelope: &FanoutEnvelope,
) -> Result<String, serde_json::Error> {
    let notification = Notification {
        kind: notification_type(),
        message_id: Some(message_id.to_string()),
        topic_arn: Some(topic.to_string()),
        subject: Some(envelope.subject.clone()),
        message: envelope.body.clone(),
        timestamp: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        message_attributes: envelope
            .attributes
            .iter()
            .map(|(name, attr)| {
                (
                    name.clone(),
                    NotificationAttribute {
                        data_type: attr.data_type.clone(),
                        value: attr.string_value.clone(),
                    },
                )
            })
            .collect(),
    };
    serde_json::to_string(&notification)
}

/// Decode the outer layer: a queue message body holding a bus notification.
pub fn decode_outer(raw: &str) -> Result<FanoutEnvelope, DecodeError> {
    let notification: Notification =
        serde_json::from_str(raw).map_err(|source| DecodeError::Malformed {
            layer: Layer::Outer,
            source,
        })?;

    Ok(FanoutEnvelope {
        subject: notification.subject.unwrap_or_default(),
        body: notification.message,
        attributes: notification
            .message_attributes
            .into_iter()
            .map(|(name, attr)| {
                (
                    name,
                    MessageAttribute {
                        data_type: attr.data_type,
                        string_value: attr.value,
                    },
                )
            })
            .collect(),
    })
}

/// Decode the inner layer: the change event carried in an envelope body.
pub fn decode_change_record(body: &str) -> Result<ChangeRecord, DecodeError> {
    StreamRecord::from_json(body)?.into_change_record()
}

/// Both decode steps in order.
pub fn unwrap_queue_body(raw: &str) -> Result<ChangeRecord, DecodeError> {
    let envelope = decode_outer(raw)?;
    decode_change_record(&envelope.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn scenario_event() -> Value {
        json!({
            "eventID": "e1",
            "eventName": "INSERT",
            "dynamodb": {"NewImage": {"PK": "user#42", "name": "Ann"}}
        })
    }

    #[test]
    fn encode_scenario_insert() {
        let record = StreamRecord::from_raw(scenario_event()).unwrap();
        let env = encode_fanout(&record).unwrap();

        assert_eq!(env.subject, "INSERT-e1");
        assert_eq!(env.attributes[OPERATION_ATTRIBUTE], MessageAttribute::string("INSERT"));
        assert_eq!(serde_json::from_str::<Value>(&env.body).unwrap(), scenario_event());
    }

    #[test]
    fn body_is_the_received_text() {
        let text = r#"{"eventName":"INSERT","eventID":"e1","dynamodb":{"NewImage":{"PK":"k","b":1,"a":2}}}"#;
        let env = encode_fanout(&StreamRecord::from_json(text).unwrap()).unwrap();
        assert_eq!(env.body, text);
    }

    #[test]
    fn missing_event_name_is_unknown() {
        let record = StreamRecord::from_raw(json!({"eventID": "e7"})).unwrap();
        let env = encode_fanout(&record).unwrap();
        assert_eq!(env.subject, "UNKNOWN-e7");
        assert_eq!(env.operation(), OperationKind::Unknown);
    }

    #[test]
    fn encode_requires_event_id() {
        let record = StreamRecord::from_raw(json!({"eventName": "INSERT"})).unwrap();
        assert!(matches!(encode_fanout(&record), Err(DecodeError::MissingField { .. })));
    }

    #[test]
    fn round_trip_preserves_id_and_operation() {
        for (name, kind) in [
            ("INSERT", OperationKind::Insert),
            ("MODIFY", OperationKind::Modify),
            ("REMOVE", OperationKind::Remove),
        ] {
            let raw = json!({
                "eventID": format!("id-{name}"),
                "eventName": name,
                "dynamodb": {"NewImage": {"PK": {"S": "k"}}}
            });
            let env = encode_fanout(&StreamRecord::from_raw(raw).unwrap()).unwrap();
            let queue_body = encode_notification("arn:topic", "m-1", &env).unwrap();

            let outer = decode_outer(&queue_body).unwrap();
            assert_eq!(outer, env);
            let record = decode_change_record(&outer.body).unwrap();
            assert_eq!(record.event_id, format!("id-{name}"));
            assert_eq!(record.operation, kind);
        }
    }

    #[test]
    fn outer_layer_must_be_json() {
        let err = decode_outer("not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { layer: Layer::Outer, .. }));
    }

    #[test]
    fn outer_layer_needs_message() {
        let err = decode_outer(r#"{"Type": "Notification", "Subject": "x"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { layer: Layer::Outer, .. }));
    }

    #[test]
    fn lowercase_message_field_is_accepted() {
        let env = decode_outer(r#"{"message": "{}"}"#).unwrap();
        assert_eq!(env.body, "{}");
        assert!(env.subject.is_empty());
    }

    #[test]
    fn inner_layer_must_be_json() {
        let body = json!({"Message": "{broken"}).to_string();
        let err = unwrap_queue_body(&body).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { layer: Layer::Inner, .. }));
    }

    #[test]
    fn inner_layer_needs_primary_key() {
        let inner = json!({"eventID": "e1", "eventName": "INSERT", "dynamodb": {"NewImage": {"name": "Ann"}}});
        let body = json!({"Message": inner.to_string()}).to_string();
        let err = unwrap_queue_body(&body).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { ref field } if field == "PK"));
    }
}
