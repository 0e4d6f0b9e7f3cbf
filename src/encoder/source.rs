//! Record sources for encode sessions
//!
//! A source is either a finite, random-access collection whose length is known
//! up front, or a lazily produced sequence of unknown length that is pulled one
//! record at a time and may fail part way through.

use std::fmt::Display;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

use crate::error::StreamError;

/// Finite ordered collection of known length.
pub trait FiniteSequence<T>: Send {
    /// Total number of records.
    fn len(&self) -> usize;

    /// Whether the collection holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in `start..start + count`, clamped to the end of the collection.
    ///
    /// Returns an empty slice once `start` reaches the end.
    fn slice(&self, start: usize, count: usize) -> Result<&[T], StreamError>;
}

impl<T: Send> FiniteSequence<T> for Vec<T> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn slice(&self, start: usize, count: usize) -> Result<&[T], StreamError> {
        if start >= self.len() {
            return Ok(&[]);
        }
        let end = start.saturating_add(count).min(self.len());
        Ok(&self[start..end])
    }
}

/// Forward-only, single-consumer sequence of unknown length.
#[async_trait]
pub trait LazySequence<T>: Send {
    /// Produce the next record
    ///
    /// # Returns
    /// * `Ok(Some(record))` - the next record in production order
    /// * `Ok(None)` - the sequence is exhausted
    /// * `Err(StreamError::Source)` - the producer failed
    async fn next_record(&mut self) -> Result<Option<T>, StreamError>;

    /// Release the producer early. Called once the session stops pulling.
    async fn close(&mut self) {}
}

/// The polymorphic source an encode session pulls from.
pub enum RecordSource<T> {
    /// Known length, pulled in chunks.
    Finite(Box<dyn FiniteSequence<T>>),
    /// Unknown length, pulled one record per tick.
    Lazy(Box<dyn LazySequence<T>>),
}

impl<T: Send + 'static> RecordSource<T> {
    /// Wrap a finite collection.
    pub fn finite(sequence: impl FiniteSequence<T> + 'static) -> Self {
        RecordSource::Finite(Box::new(sequence))
    }

    /// Wrap an in-memory result set.
    pub fn from_vec(records: Vec<T>) -> Self {
        RecordSource::Finite(Box::new(records))
    }

    /// Wrap a lazily produced sequence.
    pub fn lazy(sequence: impl LazySequence<T> + 'static) -> Self {
        RecordSource::Lazy(Box::new(sequence))
    }

    /// Wrap any fallible stream as a lazy sequence.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        RecordSource::Lazy(Box::new(StreamSource::new(stream)))
    }
}

impl<T> RecordSource<T> {
    /// Total number of records, `None` when unknown.
    pub fn total(&self) -> Option<u64> {
        match self {
            RecordSource::Finite(seq) => Some(seq.len() as u64),
            RecordSource::Lazy(_) => None,
        }
    }

    /// Whether this source is pulled one record at a time.
    pub fn is_lazy(&self) -> bool {
        matches!(self, RecordSource::Lazy(_))
    }
}

/// Lazy sequence over a `futures::Stream` of results
///
/// Producer errors are mapped to [`StreamError::Source`]. After the first
/// error or the end of the stream the adapter stays exhausted.
pub struct StreamSource<S> {
    stream: Option<S>,
    fetched: u64,
}

impl<S> StreamSource<S> {
    /// Create a new stream-backed source
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            fetched: 0,
        }
    }
}

#[async_trait]
impl<S, T, E> LazySequence<T> for StreamSource<S>
where
    S: Stream<Item = Result<T, E>> + Send + Unpin,
    T: Send,
    E: Display + Send,
{
    async fn next_record(&mut self) -> Result<Option<T>, StreamError> {
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Ok(None),
        };

        match stream.next().await {
            Some(Ok(record)) => {
                self.fetched += 1;
                Ok(Some(record))
            }
            Some(Err(e)) => {
                // Forward-only: a failed producer is not polled again
                self.stream = None;
                Err(StreamError::Source(e.to_string()))
            }
            None => {
                debug!("Stream source exhausted after {} records", self.fetched);
                self.stream = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed stream source after {} records", self.fetched);
        }
    }
}

/// Lazy sequence of JSON values, one per line
///
/// Blank lines are skipped. A line that is not valid JSON fails the sequence.
pub struct JsonLinesSource<R> {
    lines: Option<Lines<R>>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    /// Create a new JSON Lines source
    ///
    /// # Arguments
    /// * `reader` - Buffered reader positioned at the first line
    pub fn new(reader: R) -> Self {
        Self {
            lines: Some(reader.lines()),
            line_no: 0,
        }
    }
}

#[async_trait]
impl<R> LazySequence<Value> for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_record(&mut self) -> Result<Option<Value>, StreamError> {
        let lines = match self.lines.as_mut() {
            Some(l) => l,
            None => return Ok(None),
        };

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("JSON Lines source exhausted at line {}", self.line_no);
                    self.lines = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.lines = None;
                    return Err(StreamError::Source(format!(
                        "read failed after line {}: {}",
                        self.line_no, e
                    )));
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            return match serde_json::from_str(&line) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    self.lines = None;
                    Err(StreamError::Source(format!("line {}: {}", self.line_no, e)))
                }
            };
        }
    }

    async fn close(&mut self) {
        self.lines = None;
    }
}
