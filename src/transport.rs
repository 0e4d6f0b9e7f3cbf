//! Response metadata for mounting an encoded stream on a transport
//!
//! The encoder only produces text. Whoever serves that text over HTTP (or
//! writes it to a file) needs a content type, a handful of headers and a body
//! to send instead when the stream failed before anything went out.

use chrono::{Local, NaiveDate};

use crate::error::{CSV_STREAM_FAILURE_BODY, ErrorResponse, Result, StreamError};

pub use crate::config::StreamFormat;

/// Content type of an encoded stream
pub fn content_type(format: StreamFormat) -> &'static str {
    match format {
        StreamFormat::Json => "application/json",
        StreamFormat::Csv => "text/csv",
    }
}

/// `Content-Disposition` value offering `filename` as a download
///
/// Quotes and backslashes in the name are escaped.
pub fn content_disposition(filename: &str) -> String {
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{escaped}\"")
}

/// Headers for a streamed response
///
/// # Arguments
/// * `format` - Wire format of the body
/// * `filename` - Attachment name; only used for CSV
///
/// # Returns
/// * `Vec<(&'static str, String)>` - Header name and value pairs
pub fn response_headers(format: StreamFormat, filename: &str) -> Vec<(&'static str, String)> {
    let mut headers = vec![("Content-Type", content_type(format).to_string())];

    match format {
        StreamFormat::Json => {
            headers.push(("Transfer-Encoding", "chunked".to_string()));
            headers.push(("Cache-Control", "no-cache".to_string()));
        }
        StreamFormat::Csv => {
            headers.push(("Content-Disposition", content_disposition(filename)));
            headers.push(("Transfer-Encoding", "chunked".to_string()));
        }
    }

    headers
}

/// Attachment name of the form `<prefix>_<YYYY-MM-DD>.<ext>`
///
/// # Arguments
/// * `prefix` - Report name, e.g. `libro_mayor`
/// * `format` - Determines the extension
/// * `date` - Date stamped into the name
pub fn attachment_filename(prefix: &str, format: StreamFormat, date: NaiveDate) -> String {
    format!("{}_{}.{}", prefix, date.format("%Y-%m-%d"), format.extension())
}

/// [`attachment_filename`] stamped with today's local date
pub fn dated_attachment_filename(prefix: &str, format: StreamFormat) -> String {
    attachment_filename(prefix, format, Local::now().date_naive())
}

/// Body to send instead of a stream that failed before any byte was pushed
///
/// JSON gets a structured `{"success":false,...}` object; CSV gets a plain
/// text line. Once output has started the stream must be aborted instead.
///
/// # Returns
/// * `Result<String>` - The body text
pub fn fallback_body(format: StreamFormat, error: &StreamError) -> Result<String> {
    match format {
        StreamFormat::Json => Ok(ErrorResponse::from_stream_error(error).to_json()?),
        StreamFormat::Csv => Ok(CSV_STREAM_FAILURE_BODY.to_string()),
    }
}
