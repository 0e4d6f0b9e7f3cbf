//! Encode sessions
//!
//! A session binds one source, one sink and one frame builder and drives them
//! through `Init -> Emitting -> Complete | Failed -> Closed`. Every tick pulls a
//! chunk (finite source) or a single record (lazy source), converts it, pushes
//! the text and then yields to the scheduler before the next tick.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{ReportError, Result, SinkError, StreamError};

use super::frame::FrameBuilder;
use super::progress::{
    CompleteCallback, ErrorCallback, ErrorReporter, Progress, ProgressCallback, ProgressTracker,
};
use super::sink::FrameSink;
use super::source::{FiniteSequence, RecordSource};

/// Records pulled per tick from a finite source unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

type Step = std::result::Result<(), StreamError>;

/// Lifecycle of an encode session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Emitting,
    Complete,
    Failed,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Emitting)
                | (Emitting, Complete)
                | (Emitting, Failed)
                | (Complete, Closed)
                | (Failed, Closed)
        )
    }

    /// Whether the session has stopped emitting.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Complete | SessionState::Failed | SessionState::Closed
        )
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// Options for an encode session
pub struct EncodeOptions {
    /// Records per tick for finite sources
    pub chunk_size: usize,
    /// Pause between ticks; zero yields to the scheduler instead
    pub inter_chunk_delay: Duration,
    /// Draw a progress bar on stderr
    pub progress_bar: bool,
    on_progress: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
    on_complete: Option<CompleteCallback>,
    cancel_token: Option<CancellationToken>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inter_chunk_delay: Duration::ZERO,
            progress_bar: false,
            on_progress: None,
            on_error: None,
            on_complete: None,
            cancel_token: None,
        }
    }
}

impl EncodeOptions {
    /// Options with default chunk size and no delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Options taken from the `[stream]` configuration section
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::default()
            .with_chunk_size(config.chunk_size)
            .with_inter_chunk_delay(config.inter_chunk_delay())
    }

    /// Set the number of records per tick (at least one)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the pause between ticks
    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    /// Enable or disable the terminal progress bar
    pub fn with_progress_bar(mut self, enabled: bool) -> Self {
        self.progress_bar = enabled;
        self
    }

    /// Called with a snapshot after every tick
    pub fn on_progress(mut self, callback: impl FnMut(Progress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Called once, when the session fails
    pub fn on_error(mut self, callback: impl FnOnce(&StreamError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Called once, when the session completes
    pub fn on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Set cancellation token for this session
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Result of an encode session
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub session_id: Uuid,
    /// Always `Closed` once the report exists
    pub state: SessionState,
    pub outcome: Outcome,
    /// Records whose text reached the sink
    pub records_emitted: u64,
    /// Bytes handed to the sink
    pub bytes_pushed: u64,
    /// Bytes the sink passed on to the consumer; less than `bytes_pushed`
    /// when a failure discarded buffered text
    pub bytes_delivered: u64,
    /// Times the session waited for the sink to drain
    pub drain_waits: u64,
    pub elapsed_ms: u64,
    /// The error that failed the session
    pub error: Option<StreamError>,
}

impl EncodeReport {
    /// Whether the session completed.
    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    /// Whether any byte reached the consumer.
    ///
    /// When nothing did, a failed session can still be answered with a
    /// single error body instead of a truncated stream.
    pub fn output_started(&self) -> bool {
        self.bytes_delivered > 0
    }
}

/// What one tick produced.
struct Tick {
    emitted: usize,
    exhausted: bool,
    error: Option<StreamError>,
}

impl Tick {
    fn emitted(emitted: usize, error: Option<StreamError>) -> Self {
        Self {
            emitted,
            exhausted: false,
            error,
        }
    }

    fn exhausted() -> Self {
        Self {
            emitted: 0,
            exhausted: true,
            error: None,
        }
    }
}

/// One source streamed into one sink
///
/// The session owns the sink, so no second session can write to it.
pub struct EncodeSession<T> {
    id: Uuid,
    state: SessionState,
    source: RecordSource<T>,
    sink: Box<dyn FrameSink>,
    builder: Box<dyn FrameBuilder<T>>,
    chunk_size: usize,
    delay: Duration,
    tracker: ProgressTracker,
    errors: ErrorReporter,
    on_complete: Option<CompleteCallback>,
    cancel: CancellationToken,
    /// Opening token not yet pushed
    staged: String,
    /// Next index to pull from a finite source
    offset: usize,
    records_emitted: u64,
    bytes_pushed: u64,
    drain_waits: u64,
    ticks: u64,
}

impl<T: Send + 'static> EncodeSession<T> {
    /// Create a new session in the `Init` state
    ///
    /// # Arguments
    /// * `source` - Records to encode, in order
    /// * `sink` - Consumer of the encoded text
    /// * `builder` - Wire format
    /// * `options` - Scheduling, callbacks and cancellation
    pub fn new(
        source: RecordSource<T>,
        sink: Box<dyn FrameSink>,
        builder: Box<dyn FrameBuilder<T>>,
        options: EncodeOptions,
    ) -> Self {
        let tracker = ProgressTracker::new(source.total(), options.progress_bar)
            .with_callback(options.on_progress);

        Self {
            id: Uuid::new_v4(),
            state: SessionState::Init,
            source,
            sink,
            builder,
            chunk_size: options.chunk_size.max(1),
            delay: options.inter_chunk_delay,
            tracker,
            errors: ErrorReporter::new(options.on_error),
            on_complete: options.on_complete,
            cancel: options.cancel_token.unwrap_or_default(),
            staged: String::new(),
            offset: 0,
            records_emitted: 0,
            bytes_pushed: 0,
            drain_waits: 0,
            ticks: 0,
        }
    }

    /// Session identifier, also recorded on the session's log span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token that cancels this session when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session on the tokio runtime
    pub fn spawn(self) -> EncodeHandle {
        let session_id = self.id;
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run());
        EncodeHandle {
            session_id,
            cancel,
            join,
        }
    }

    /// Drive the session to `Closed` on the current task
    ///
    /// # Returns
    /// * `EncodeReport` - Statistics and the outcome; failures are reported
    ///   here and through the error callback, never as a panic
    pub async fn run(self) -> EncodeReport {
        let span = info_span!("encode", session = %self.id, format = ?self.builder.format());
        self.drive().instrument(span).await
    }

    async fn drive(mut self) -> EncodeReport {
        let start_time = Instant::now();
        info!(
            total = ?self.source.total(),
            chunk_size = self.chunk_size,
            "Starting encode session"
        );

        self.init();
        let error = match self.emit().await {
            Ok(()) => {
                self.complete().await;
                None
            }
            Err(e) => {
                self.fail(&e).await;
                Some(e)
            }
        };
        self.tracker.finish();
        self.transition(SessionState::Closed);

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        let outcome = if error.is_none() {
            Outcome::Completed
        } else {
            Outcome::Failed
        };

        info!(
            "Encode session closed: {:?}, {} records, {} bytes, {} ms",
            outcome, self.records_emitted, self.bytes_pushed, elapsed_ms
        );

        EncodeReport {
            session_id: self.id,
            state: self.state,
            outcome,
            records_emitted: self.records_emitted,
            bytes_pushed: self.bytes_pushed,
            bytes_delivered: self.sink.bytes_delivered(),
            drain_waits: self.drain_waits,
            elapsed_ms,
            error,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Stage the opening token; it goes out with the first tick's text.
    fn init(&mut self) {
        self.staged = self.builder.open();
        self.transition(SessionState::Emitting);
    }

    async fn emit(&mut self) -> Step {
        loop {
            self.check_consumer()?;
            if self.source.is_lazy() {
                // The next record may take a while; hand over what is done
                self.flush_sink().await?;
            }

            let mut text = std::mem::take(&mut self.staged);
            let tick = match &mut self.source {
                RecordSource::Finite(seq) => encode_chunk(
                    &**seq,
                    self.builder.as_mut(),
                    self.offset,
                    self.chunk_size,
                    self.records_emitted,
                    &mut text,
                ),
                RecordSource::Lazy(seq) => {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
                        _ = self.sink.closed() => Err(StreamError::Sink(SinkError::Closed)),
                        result = seq.next_record() => result,
                    };
                    match next {
                        Ok(Some(record)) => {
                            match self
                                .builder
                                .encode_record(self.records_emitted, &record, &mut text)
                            {
                                Ok(()) => Tick::emitted(1, None),
                                Err(e) => Tick::emitted(0, Some(e)),
                            }
                        }
                        Ok(None) => Tick::exhausted(),
                        Err(e) => Tick::emitted(0, Some(e)),
                    }
                }
            };
            self.ticks += 1;

            if tick.emitted > 0 {
                self.offset += tick.emitted;
                self.push(text).await?;
                self.records_emitted += tick.emitted as u64;
                let progress = self.tracker.advance(tick.emitted as u64);
                debug!(
                    "Emitted {} records (total: {}, {:?}%)",
                    tick.emitted, progress.processed, progress.percentage
                );
                if self.ticks % 100 == 0 {
                    info!("Progress: {} records emitted ({} ticks)", progress.processed, self.ticks);
                }
                text = String::new();
            }

            if let Some(error) = tick.error {
                return Err(error);
            }

            if tick.exhausted {
                debug!("Source exhausted after {} records", self.records_emitted);
                text.push_str(&self.builder.close());
                self.push(text).await?;
                // Wait until the sink accepts more before counting the session complete
                self.wait_for_drain().await?;
                self.tracker.complete();
                return Ok(());
            }

            self.pause().await?;
        }
    }

    /// Hand text to the sink, waiting for drain when it pushes back.
    async fn push(&mut self, text: String) -> Step {
        if text.is_empty() {
            return Ok(());
        }
        let len = text.len() as u64;
        let ready = self.sink.push(text)?;
        self.bytes_pushed += len;

        if !ready {
            self.drain_waits += 1;
            debug!("Sink asserted backpressure after {} bytes", self.bytes_pushed);
            self.wait_for_drain().await?;
        }
        Ok(())
    }

    async fn wait_for_drain(&mut self) -> Step {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.sink.drained() => result.map_err(StreamError::from),
        }
    }

    async fn flush_sink(&mut self) -> Step {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.sink.flush() => result.map_err(StreamError::from),
        }
    }

    /// Yield to the scheduler, or sleep for the configured delay.
    async fn pause(&mut self) -> Step {
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }

    /// Stop pulling once nobody is listening.
    fn check_consumer(&self) -> Step {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        if self.sink.is_closed() {
            return Err(StreamError::Sink(SinkError::Closed));
        }
        Ok(())
    }

    async fn complete(&mut self) {
        self.transition(SessionState::Complete);
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
        if let Err(e) = self.sink.end().await {
            warn!("Sink did not close cleanly: {}", e);
        }
        self.close_source().await;
    }

    async fn fail(&mut self, error: &StreamError) {
        self.transition(SessionState::Failed);
        if error.is_consumer_gone() {
            info!(
                records = self.records_emitted,
                "Consumer went away, stopping: {}", error
            );
        } else {
            warn!(
                kind = error.kind(),
                records = self.records_emitted,
                bytes = self.bytes_pushed,
                "Encode session failed: {}",
                error
            );
        }

        self.errors.report(error);
        self.close_source().await;
        self.sink.destroy(error).await;
    }

    async fn close_source(&mut self) {
        if let RecordSource::Lazy(seq) = &mut self.source {
            seq.close().await;
        }
    }
}

/// Encode the next chunk of a finite source into `out`
///
/// On a serialization failure the records before the failing one stay in
/// `out` and are counted as emitted.
fn encode_chunk<T>(
    seq: &dyn FiniteSequence<T>,
    builder: &mut dyn FrameBuilder<T>,
    offset: usize,
    chunk_size: usize,
    first_index: u64,
    out: &mut String,
) -> Tick {
    let records = match seq.slice(offset, chunk_size) {
        Ok(records) => records,
        Err(e) => return Tick::emitted(0, Some(e)),
    };
    if records.is_empty() {
        return Tick::exhausted();
    }

    for (i, record) in records.iter().enumerate() {
        if let Err(e) = builder.encode_record(first_index + i as u64, record, out) {
            return Tick::emitted(i, Some(e));
        }
    }
    Tick::emitted(records.len(), None)
}

/// Start an encode session on the tokio runtime
///
/// # Arguments
/// * `source` - Records to encode, in order
/// * `sink` - Consumer of the encoded text; owned by the session from now on
/// * `builder` - Wire format
/// * `options` - Scheduling, callbacks and cancellation
///
/// # Returns
/// * `EncodeHandle` - Handle to cancel or await the session
pub fn start<T: Send + 'static>(
    source: RecordSource<T>,
    sink: Box<dyn FrameSink>,
    builder: Box<dyn FrameBuilder<T>>,
    options: EncodeOptions,
) -> EncodeHandle {
    EncodeSession::new(source, sink, builder, options).spawn()
}

/// Handle to a running encode session
pub struct EncodeHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<EncodeReport>,
}

impl EncodeHandle {
    /// Identifier of the session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Stop the session; it fails with [`StreamError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels the session, for wiring into signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the session has reached `Closed`.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the session to close
    ///
    /// # Returns
    /// * `Result<EncodeReport>` - The report, or an error if the task panicked
    pub async fn wait(self) -> Result<EncodeReport> {
        let session_id = self.session_id;
        self.join.await.map_err(|e| {
            ReportError::Generic(format!("Encode session {session_id} did not finish: {e}"))
        })
    }
}
