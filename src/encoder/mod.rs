//! Streaming result encoder
//!
//! Turns an ordered result set into a JSON envelope or CSV text, handing the
//! output to a sink in chunks without materializing the whole document.
//!
//! - `source`: finite and lazy record sources
//! - `frame`: JSON and CSV framing
//! - `sink`: backpressure-aware output sinks
//! - `progress`: progress snapshots and single-shot error reporting
//! - `session`: the state machine that drives one source into one sink
//!
//! # Example
//!
//! ```
//! use reportstream::encoder::{ChannelSink, EncodeOptions, EncodeSession, JsonFrameBuilder, RecordSource};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (sink, rx) = ChannelSink::channel(8);
//! let session = EncodeSession::new(
//!     RecordSource::from_vec(vec![json!({"id": 1}), json!({"id": 2})]),
//!     Box::new(sink),
//!     Box::new(JsonFrameBuilder::new("ok")),
//!     EncodeOptions::new().with_chunk_size(1),
//! );
//!
//! let (report, (text, error)) = tokio::join!(session.run(), rx.collect_text());
//! assert!(report.is_completed());
//! assert!(error.is_none());
//! assert_eq!(text, r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2}]}"#);
//! # }
//! ```

pub mod frame;
pub mod progress;
pub mod session;
pub mod sink;
pub mod source;

#[cfg(test)]
mod tests;

pub use frame::{CsvFrameBuilder, DEFAULT_MESSAGE, FrameBuilder, JsonFrameBuilder};
pub use progress::{Progress, ProgressTracker};
pub use session::{
    DEFAULT_CHUNK_SIZE, EncodeHandle, EncodeOptions, EncodeReport, EncodeSession, Outcome,
    SessionState, start,
};
pub use sink::{ChannelSink, DEFAULT_HIGH_WATER_MARK, FrameReceiver, FrameSink, WriterSink};
pub use source::{FiniteSequence, JsonLinesSource, LazySequence, RecordSource, StreamSource};

use serde::Serialize;

use crate::config::{Config, StreamFormat};

/// Frame builder for the configured output format
///
/// # Arguments
/// * `config` - Loaded configuration; `stream.message` and `csv.columns` apply
pub fn builder_for<T: Serialize + 'static>(config: &Config) -> Box<dyn FrameBuilder<T>> {
    match config.stream.format {
        StreamFormat::Json => Box::new(JsonFrameBuilder::new(config.stream.message.clone())),
        StreamFormat::Csv => Box::new(CsvFrameBuilder::new(config.csv.columns.clone())),
    }
}
