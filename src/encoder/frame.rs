//! Frame builders for the JSON and CSV wire formats
//!
//! A frame builder turns the boundaries of a stream and each individual record
//! into text. Concatenating `open`, every record in order, and `close` yields
//! one complete document.

use std::borrow::Cow;

use serde::Serialize;
use serde_json::Value;

use crate::config::StreamFormat;
use crate::error::StreamError;

/// Default envelope message for JSON streams.
pub const DEFAULT_MESSAGE: &str = "Datos obtenidos exitosamente";

/// Format-specific conversion of records and boundary tokens to text.
pub trait FrameBuilder<T>: Send {
    /// Text that precedes the first record.
    fn open(&mut self) -> String;

    /// Append the text for one record
    ///
    /// # Arguments
    /// * `index` - Zero-based position of the record in the stream
    /// * `record` - Record to encode
    /// * `out` - Buffer the text is appended to; untouched on error
    fn encode_record(&mut self, index: u64, record: &T, out: &mut String)
    -> Result<(), StreamError>;

    /// Text that completes the document.
    fn close(&mut self) -> String;

    /// Wire format produced by this builder.
    fn format(&self) -> StreamFormat;
}

/* ========================= JSON ========================= */

/// Builds `{"success":true,"message":<msg>,"data":[...]}`
#[derive(Debug, Clone)]
pub struct JsonFrameBuilder {
    message: String,
}

impl JsonFrameBuilder {
    /// Create a JSON frame builder with a custom envelope message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for JsonFrameBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE)
    }
}

impl<T: Serialize> FrameBuilder<T> for JsonFrameBuilder {
    fn open(&mut self) -> String {
        // Value's Display escapes the message as a JSON string
        let message = Value::String(self.message.clone());
        format!("{{\"success\":true,\"message\":{message},\"data\":[")
    }

    fn encode_record(
        &mut self,
        index: u64,
        record: &T,
        out: &mut String,
    ) -> Result<(), StreamError> {
        let json =
            serde_json::to_string(record).map_err(|e| StreamError::Serialization(e.to_string()))?;
        if index > 0 {
            out.push(',');
        }
        out.push_str(&json);
        Ok(())
    }

    fn close(&mut self) -> String {
        "]}".to_string()
    }

    fn format(&self) -> StreamFormat {
        StreamFormat::Json
    }
}

/* ========================= CSV ========================= */

/// Builds a header line followed by one line per record
///
/// Columns are supplied by the caller and fix both the header and the order
/// of fields in every row.
#[derive(Debug, Clone)]
pub struct CsvFrameBuilder {
    columns: Vec<String>,
}

impl CsvFrameBuilder {
    /// Create a CSV frame builder
    ///
    /// # Arguments
    /// * `columns` - Ordered column names, looked up as keys of each record
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Column names in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Escape a CSV value if necessary
    ///
    /// Values containing a comma, quote, or line break are wrapped in quotes
    /// and embedded quotes are doubled.
    pub fn escape_field(value: &str) -> Cow<'_, str> {
        if value.contains([',', '"', '\n', '\r']) {
            Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
        } else {
            Cow::Borrowed(value)
        }
    }

    /// Plain-text rendering of one field; missing and null become empty.
    fn field_text(value: Option<&Value>) -> Cow<'_, str> {
        match value {
            None | Some(Value::Null) => Cow::Borrowed(""),
            Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
            Some(Value::Bool(b)) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Some(Value::Number(n)) => Cow::Owned(n.to_string()),
            // Nested structures are written as compact JSON
            Some(other) => Cow::Owned(other.to_string()),
        }
    }
}

impl<T: Serialize> FrameBuilder<T> for CsvFrameBuilder {
    fn open(&mut self) -> String {
        let mut header = self
            .columns
            .iter()
            .map(|c| Self::escape_field(c))
            .collect::<Vec<_>>()
            .join(",");
        header.push('\n');
        header
    }

    fn encode_record(
        &mut self,
        _index: u64,
        record: &T,
        out: &mut String,
    ) -> Result<(), StreamError> {
        let value =
            serde_json::to_value(record).map_err(|e| StreamError::Serialization(e.to_string()))?;
        let fields = match &value {
            Value::Object(map) => map,
            other => {
                return Err(StreamError::Serialization(format!(
                    "CSV rows must be objects, got {}",
                    json_type_name(other)
                )));
            }
        };

        let row = self
            .columns
            .iter()
            .map(|column| {
                let text = Self::field_text(fields.get(column));
                Self::escape_field(&text).into_owned()
            })
            .collect::<Vec<_>>()
            .join(",");

        out.push_str(&row);
        out.push('\n');
        Ok(())
    }

    fn close(&mut self) -> String {
        String::new()
    }

    fn format(&self) -> StreamFormat {
        StreamFormat::Csv
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
