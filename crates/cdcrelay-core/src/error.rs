//! Error types for the relay and consumer pipelines.

use thiserror::Error;

/// Which nested layer of a queue message failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// The bus notification wrapping the change event.
    Outer,
    /// The change event carried in the notification's `Message` field.
    Inner,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outer => write!(f, "outer"),
            Self::Inner => write!(f, "inner"),
        }
    }
}

/// Errors raised while encoding or decoding a single envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed {layer} layer: {source}")]
    Malformed {
        layer: Layer,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("Invalid attribute value for '{field}': {reason}")]
    InvalidAttribute { field: String, reason: String },
}

impl DecodeError {
    /// Shorthand for a missing-field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }
}

/// Errors from the fan-out bus or from a sink call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The bus accepted the request but rejected the message.
    #[error("Rejected by {endpoint}: {reason}")]
    Rejected { endpoint: String, reason: String },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the error is transient and worth retrying in-process.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }
}

/// Why a single record of a batch failed.
///
/// Every variant is recovered into the batch tracker; none of them abort a batch.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("handler failed: {reason}")]
    Handler { reason: String },

    #[error("record task panicked: {message}")]
    Panicked { message: String },

    #[error("deadline exceeded before the record completed")]
    DeadlineExceeded,
}

impl RecordError {
    /// Build a handler error from anything displayable.
    pub fn handler(reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            reason: reason.to_string(),
        }
    }
}

/// Fatal configuration errors, raised before any batch is handled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {name}")]
    MissingVar { name: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: String, reason: String },
}
