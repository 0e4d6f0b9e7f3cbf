//! Backpressure-aware sinks for encoded frames
//!
//! A sink accepts text synchronously and tells the producer whether it may keep
//! going. When it says no, the producer waits on [`FrameSink::drained`] before
//! pushing again, so at most one unit of text is ever queued beyond the sink's
//! own limit.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::{SinkError, StreamError};

/// Default number of bytes a [`WriterSink`] buffers before asserting backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Consumer of serialized output
#[async_trait]
pub trait FrameSink: Send {
    /// Hand a unit of text to the consumer
    ///
    /// The text is always accepted.
    ///
    /// # Returns
    /// * `Ok(true)` - the producer may push again immediately
    /// * `Ok(false)` - backpressure; wait for [`FrameSink::drained`] first
    /// * `Err(SinkError)` - the consumer is gone or failed
    fn push(&mut self, text: String) -> Result<bool, SinkError>;

    /// Resolve once a backpressured sink can accept more text.
    async fn drained(&mut self) -> Result<(), SinkError>;

    /// Hand over whatever is held back without waiting for the high-water mark.
    ///
    /// Called before the producer blocks on a slow source.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Resolve once the consumer has gone away.
    ///
    /// Sinks that cannot observe this without writing never resolve.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }

    /// Whether the consumer has gone away or the sink has failed.
    fn is_closed(&self) -> bool;

    /// Bytes that actually left the sink for the consumer.
    ///
    /// Text accepted by `push` but discarded by `destroy` is not counted.
    fn bytes_delivered(&self) -> u64;

    /// Signal that no more text will be pushed.
    async fn end(&mut self) -> Result<(), SinkError>;

    /// Abnormal termination. Anything not yet delivered is discarded.
    async fn destroy(&mut self, error: &StreamError);
}

/* ========================= Channel sink ========================= */

/// How a channel-backed stream ended.
#[derive(Debug, Clone)]
enum Termination {
    Ended,
    Aborted(String),
}

/// Sink backed by a bounded in-process channel
///
/// Each push becomes one frame on the channel. The paired [`FrameReceiver`]
/// yields frames in order and then reports whether the stream ended cleanly
/// or was destroyed.
pub struct ChannelSink {
    sender: Option<mpsc::Sender<String>>,
    /// Text accepted while the channel was full
    pending: Option<String>,
    bytes_sent: u64,
    termination: Arc<OnceLock<Termination>>,
}

/// Receiving half of a [`ChannelSink`]
pub struct FrameReceiver {
    receiver: mpsc::Receiver<String>,
    termination: Arc<OnceLock<Termination>>,
    done: bool,
}

impl ChannelSink {
    /// Create a connected sink/receiver pair
    ///
    /// # Arguments
    /// * `capacity` - Frames the channel holds before asserting backpressure
    pub fn channel(capacity: usize) -> (ChannelSink, FrameReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let termination = Arc::new(OnceLock::new());

        let sink = ChannelSink {
            sender: Some(sender),
            pending: None,
            bytes_sent: 0,
            termination: Arc::clone(&termination),
        };
        let rx = FrameReceiver {
            receiver,
            termination,
            done: false,
        };
        (sink, rx)
    }

    async fn flush_pending(&mut self) -> Result<(), SinkError> {
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;
        if let Some(text) = self.pending.take() {
            let len = text.len() as u64;
            sender.send(text).await.map_err(|_| SinkError::Closed)?;
            self.bytes_sent += len;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    fn push(&mut self, text: String) -> Result<bool, SinkError> {
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;

        if let Some(pending) = self.pending.as_mut() {
            // Producer ignored backpressure; keep order by appending
            pending.push_str(&text);
            return Ok(false);
        }

        let len = text.len() as u64;
        match sender.try_send(text) {
            Ok(()) => {
                self.bytes_sent += len;
                Ok(sender.capacity() > 0)
            }
            Err(TrySendError::Full(text)) => {
                self.pending = Some(text);
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    async fn drained(&mut self) -> Result<(), SinkError> {
        self.flush_pending().await?;
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;
        // Wait for a free slot without using it
        let permit = sender.reserve().await.map_err(|_| SinkError::Closed)?;
        drop(permit);
        Ok(())
    }

    async fn closed(&mut self) {
        if let Some(sender) = self.sender.as_ref() {
            sender.closed().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(|s| s.is_closed())
    }

    fn bytes_delivered(&self) -> u64 {
        self.bytes_sent
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        self.flush_pending().await?;
        let _ = self.termination.set(Termination::Ended);
        self.sender = None;
        Ok(())
    }

    async fn destroy(&mut self, error: &StreamError) {
        self.pending = None;
        let _ = self.termination.set(Termination::Aborted(error.to_string()));
        self.sender = None;
    }
}

impl FrameReceiver {
    /// Receive the next frame
    ///
    /// # Returns
    /// * `Some(Ok(text))` - next frame in push order
    /// * `Some(Err(SinkError::Aborted))` - the producer destroyed the stream
    /// * `None` - the stream ended cleanly (or the abort was already reported)
    pub async fn recv(&mut self) -> Option<Result<String, SinkError>> {
        self.next().await
    }

    /// Number of frames queued and not yet received.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Stop accepting frames, as a consumer that disconnects would.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Drain every frame and concatenate them
    ///
    /// # Returns
    /// * `(String, Option<SinkError>)` - text received, and the abort error if any
    pub async fn collect_text(mut self) -> (String, Option<SinkError>) {
        let mut text = String::new();
        while let Some(frame) = self.recv().await {
            match frame {
                Ok(chunk) => text.push_str(&chunk),
                Err(e) => return (text, Some(e)),
            }
        }
        (text, None)
    }

    fn terminal_item(&self) -> Option<Result<String, SinkError>> {
        match self.termination.get() {
            Some(Termination::Ended) => None,
            Some(Termination::Aborted(msg)) => Some(Err(SinkError::Aborted(msg.clone()))),
            None => Some(Err(SinkError::Aborted(
                "sink dropped before end of stream".to_string(),
            ))),
        }
    }
}

impl Stream for FrameReceiver {
    type Item = Result<String, SinkError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(text)) => Poll::Ready(Some(Ok(text))),
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(self.terminal_item())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/* ========================= Writer sink ========================= */

/// Sink over any async writer (stdout, a file, a socket)
///
/// Pushed text accumulates in memory until it reaches the high-water mark;
/// then the sink asserts backpressure and [`FrameSink::drained`] writes and
/// flushes the buffer. [`FrameSink::flush`] writes it out early, so a slow
/// source does not hold finished records back.
pub struct WriterSink<W> {
    writer: Option<W>,
    buffer: String,
    high_water_mark: usize,
    bytes_written: u64,
    failed: bool,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    /// Create a new writer sink
    ///
    /// # Arguments
    /// * `writer` - Destination
    /// * `high_water_mark` - Buffered bytes at which backpressure is asserted
    pub fn new(writer: W, high_water_mark: usize) -> Self {
        Self {
            writer: Some(writer),
            buffer: String::with_capacity(high_water_mark.min(1024 * 1024)),
            high_water_mark: high_water_mark.max(1),
            bytes_written: 0,
            failed: false,
        }
    }

    /// Bytes written through to the underlying writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Recover the writer once the sink is no longer used.
    pub fn into_inner(self) -> Option<W> {
        self.writer
    }

    async fn write_buffer(&mut self) -> Result<(), SinkError> {
        if self.failed {
            return Err(SinkError::Closed);
        }
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;

        if !self.buffer.is_empty() {
            let result = match writer.write_all(self.buffer.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                self.failed = true;
                return Err(SinkError::Write(e.to_string()));
            }
            self.bytes_written += self.buffer.len() as u64;
            debug!("Flushed {} bytes (total: {})", self.buffer.len(), self.bytes_written);
            self.buffer.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for WriterSink<W> {
    fn push(&mut self, text: String) -> Result<bool, SinkError> {
        if self.failed || self.writer.is_none() {
            return Err(SinkError::Closed);
        }
        self.buffer.push_str(&text);
        Ok(self.buffer.len() < self.high_water_mark)
    }

    async fn drained(&mut self) -> Result<(), SinkError> {
        self.write_buffer().await
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.write_buffer().await
    }

    fn is_closed(&self) -> bool {
        self.failed || self.writer.is_none()
    }

    fn bytes_delivered(&self) -> u64 {
        self.bytes_written
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        self.write_buffer().await?;
        if let Some(mut writer) = self.writer.take() {
            writer
                .shutdown()
                .await
                .map_err(|e| SinkError::Write(e.to_string()))?;
        }
        Ok(())
    }

    async fn destroy(&mut self, error: &StreamError) {
        let discarded = self.buffer.len();
        self.buffer.clear();
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        warn!(
            "Writer sink destroyed after {} bytes ({} discarded): {}",
            self.bytes_written, discarded, error
        );
    }
}
