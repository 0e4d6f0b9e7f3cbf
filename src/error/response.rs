use serde::{Deserialize, Serialize};

use super::kinds::StreamError;

/// Message used when a JSON stream fails before any byte was sent.
pub const JSON_STREAM_FAILURE_MESSAGE: &str = "Error en el streaming de datos";

/// Plain-text body used when a CSV stream fails before any byte was sent.
pub const CSV_STREAM_FAILURE_BODY: &str = "Error en el streaming de datos CSV";

/// Structured error body sent in place of a stream.
///
/// Only valid while the sink is still untouched; once frames have gone
/// out the stream must be aborted instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
}

impl ErrorResponse {
    /// Create an error response with a custom message.
    pub fn new(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: error.into(),
        }
    }

    /// Error response for a failed streaming session.
    pub fn from_stream_error(error: &StreamError) -> Self {
        Self::new(JSON_STREAM_FAILURE_MESSAGE, error.to_string())
    }

    /// Convert to compact JSON string (single line).
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
