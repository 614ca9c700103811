//! Unmarshalling of the change store's typed attribute-value images.
//!
//! Stream images arrive as `{"PK": {"S": "user#42"}, "age": {"N": "42"}}`.
//! Downstream code works with plain JSON (`{"PK": "user#42", "age": 42}`).

use serde_json::{Map, Number, Value};

use crate::error::DecodeError;

const TAGS: [&str; 10] = ["S", "N", "B", "BOOL", "NULL", "M", "L", "SS", "NS", "BS"];

fn is_tagged(value: &Value) -> bool {
    match value {
        Value::Object(obj) if obj.len() == 1 => obj.keys().next().is_some_and(|k| TAGS.contains(&k.as_str())),
        _ => false,
    }
}

/// Returns `true` when every value of `image` is a single-key attribute-value object.
///
/// An empty image is considered plain.
pub fn is_typed_image(image: &Map<String, Value>) -> bool {
    !image.is_empty() && image.values().all(is_tagged)
}

/// Convert a typed image into plain JSON. Plain images are returned unchanged.
pub fn normalize_image(image: Map<String, Value>) -> Result<Map<String, Value>, DecodeError> {
    if !is_typed_image(&image) {
        return Ok(image);
    }
    image
        .into_iter()
        .map(|(field, value)| {
            let plain = unmarshal(&field, value)?;
            Ok((field, plain))
        })
        .collect()
}

fn invalid(field: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidAttribute {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Unmarshal a single `{"<TAG>": <value>}` attribute.
fn unmarshal(field: &str, value: Value) -> Result<Value, DecodeError> {
    let Value::Object(obj) = value else {
        return Err(invalid(field, "expected a tagged attribute object"));
    };
    let Some((tag, inner)) = obj.into_iter().next() else {
        return Err(invalid(field, "empty attribute object"));
    };

    match (tag.as_str(), inner) {
        ("S" | "B", Value::String(s)) => Ok(Value::String(s)),
        ("N", Value::String(n)) => parse_number(field, &n).map(Value::Number),
        ("BOOL", Value::Bool(b)) => Ok(Value::Bool(b)),
        ("NULL", _) => Ok(Value::Null),
        ("M", Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let plain = unmarshal(&k, v)?;
                Ok((k, plain))
            })
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        ("L", Value::Array(items)) => items
            .into_iter()
            .map(|v| unmarshal(field, v))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ("SS" | "BS", Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(Value::String(s)),
                _ => Err(invalid(field, format!("{tag} members must be strings"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ("NS", Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(n) => parse_number(field, &n).map(Value::Number),
                _ => Err(invalid(field, "NS members must be numeric strings")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (tag, other) => Err(invalid(field, format!("unexpected {tag} payload: {other}"))),
    }
}

fn parse_number(field: &str, raw: &str) -> Result<Number, DecodeError> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Number::from(i));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Ok(Number::from(u));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| invalid(field, format!("'{raw}' is not a number")))
}
