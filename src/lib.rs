//! reportstream library
//!
//! Streams large, ordered result sets to a consumer as a JSON envelope or a
//! CSV document, chunk by chunk, honoring the consumer's backpressure and
//! stopping as soon as the consumer goes away.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `encoder`: Sources, sinks, frame builders and the encode session
//! - `error`: Error types and handling
//! - `transport`: Response metadata and fallback error bodies
//!
//! # Example
//!
//! ```no_run
//! use reportstream::encoder::{self, CsvFrameBuilder, EncodeOptions, RecordSource, WriterSink};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rows = vec![json!({"cuenta": "1011", "saldo": 250})];
//!     let handle = encoder::start(
//!         RecordSource::from_vec(rows),
//!         Box::new(WriterSink::new(tokio::io::stdout(), 16 * 1024)),
//!         Box::new(CsvFrameBuilder::new(["cuenta", "saldo"])),
//!         EncodeOptions::new(),
//!     );
//!
//!     let report = handle.wait().await?;
//!     println!("{} records", report.records_emitted);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod transport;

// Re-export commonly used types
pub use config::{Config, StreamFormat};
pub use encoder::{
    EncodeHandle, EncodeOptions, EncodeReport, EncodeSession, FrameBuilder, FrameSink,
    RecordSource, start,
};
pub use error::{ReportError, Result, StreamError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
