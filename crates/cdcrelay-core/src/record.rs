//! Change-stream record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attribute::normalize_image;
use crate::error::{DecodeError, Layer};

/// Name of the primary-key field every image must carry.
pub const PRIMARY_KEY: &str = "PK";

// ─── OperationKind ────────────────────────────────────────────────────────────

/// Kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Insert,
    Modify,
    Remove,
    /// The source omitted the event name, or sent one we do not know.
    Unknown,
}

impl OperationKind {
    /// Parse an event name. Absent or unrecognized names map to `Unknown`.
    pub fn from_event_name(name: Option<&str>) -> Self {
        match name {
            Some("INSERT") => Self::Insert,
            Some("MODIFY") => Self::Modify,
            Some("REMOVE") => Self::Remove,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Image ────────────────────────────────────────────────────────────────────

/// The new image of a changed item: a required string primary key plus any
/// number of additional fields of arbitrary type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Image {
    /// Validate a (typed or plain) image mapping.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(map) = value else {
            return Err(DecodeError::InvalidImage {
                reason: "image is not a mapping".into(),
            });
        };
        let map = normalize_image(map)?;
        if !map.contains_key(PRIMARY_KEY) {
            return Err(DecodeError::missing(PRIMARY_KEY));
        }
        serde_json::from_value(Value::Object(map)).map_err(|e| DecodeError::InvalidImage {
            reason: e.to_string(),
        })
    }

    /// Look up a non-key field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

// ─── StreamRecord ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StreamRecordView {
    #[serde(rename = "eventID")]
    event_id: Option<String>,
    #[serde(rename = "eventName")]
    event_name: Option<String>,
    dynamodb: Option<StreamDataView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamDataView {
    new_image: Option<Value>,
    sequence_number: Option<String>,
}

/// A change-stream record exactly as the source delivered it.
///
/// Only the routing fields are extracted; `raw` keeps the full event so the
/// relay can forward it without loss.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub event_id: Option<String>,
    pub event_name: Option<String>,
    pub sequence_number: Option<String>,
    pub new_image: Option<Value>,
    pub raw: Value,
    /// The event text exactly as received. Forwarded as the envelope body.
    pub source: String,
}

impl StreamRecord {
    /// Extract the routing fields from a serialized stream event, keeping
    /// the text untouched.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_str(text).map_err(inner_malformed)?;
        Self::build(raw, text.to_string())
    }

    /// Extract the routing fields from an already parsed stream event.
    pub fn from_raw(raw: Value) -> Result<Self, DecodeError> {
        let source = serde_json::to_string(&raw).map_err(inner_malformed)?;
        Self::build(raw, source)
    }

    fn build(raw: Value, source: String) -> Result<Self, DecodeError> {
        let view: StreamRecordView = serde_json::from_value(raw.clone()).map_err(inner_malformed)?;
        let (new_image, sequence_number) = match view.dynamodb {
            Some(data) => (data.new_image, data.sequence_number),
            None => (None, None),
        };
        Ok(Self {
            event_id: view.event_id,
            event_name: view.event_name,
            sequence_number,
            new_image,
            raw,
            source,
        })
    }

    pub fn operation(&self) -> OperationKind {
        OperationKind::from_event_name(self.event_name.as_deref())
    }

    /// Identifier reported back to the stream on failure: the sequence
    /// number (the stream's checkpoint key), else the event id.
    pub fn identifier(&self) -> Option<&str> {
        self.sequence_number.as_deref().or(self.event_id.as_deref())
    }

    /// Validate into a [`ChangeRecord`]. Requires an event id and a new image
    /// carrying the primary key.
    pub fn into_change_record(self) -> Result<ChangeRecord, DecodeError> {
        let operation = self.operation();
        let event_id = self.event_id.ok_or_else(|| DecodeError::missing("eventID"))?;
        let image = self
            .new_image
            .ok_or_else(|| DecodeError::missing("dynamodb.NewImage"))
            .and_then(Image::from_value)?;
        Ok(ChangeRecord {
            event_id,
            operation,
            sequence_number: self.sequence_number,
            image,
            raw: self.raw,
        })
    }
}

fn inner_malformed(source: serde_json::Error) -> DecodeError {
    DecodeError::Malformed {
        layer: Layer::Inner,
        source,
    }
}

// ─── ChangeRecord ─────────────────────────────────────────────────────────────

/// A validated change record, as handed to consumer handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub event_id: String,
    pub operation: OperationKind,
    pub sequence_number: Option<String>,
    pub image: Image,
    /// The original stream event, untouched.
    pub raw: Value,
}

impl ChangeRecord {
    pub fn pk(&self) -> &str {
        &self.image.pk
    }
}
