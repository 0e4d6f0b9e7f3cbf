//! Error handling for encoding sessions and the surrounding tooling.
//!
//! This module provides:
//! - The three failure kinds of an encode session (source, serialization, sink)
//! - Application-level errors for configuration and I/O
//! - A structured JSON error body for failures that happen before any output
//!
//! # Example
//!
//! ```rust
//! use reportstream::error::{ErrorResponse, StreamError};
//!
//! let err = StreamError::Source("stored procedure timed out".to_string());
//! let body = ErrorResponse::from_stream_error(&err).to_json().unwrap();
//! assert!(body.contains("\"success\":false"));
//! ```

pub mod kinds;
pub mod response;

// Re-export commonly used types
pub use kinds::{ConfigError, ReportError, Result, SinkError, StreamError};
pub use response::{CSV_STREAM_FAILURE_BODY, ErrorResponse, JSON_STREAM_FAILURE_MESSAGE};
