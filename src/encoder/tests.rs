//! End-to-end encode session tests over in-memory sources and sinks

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::ser::{Error as _, Serializer};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio_test::{assert_ok, assert_pending};

use super::*;
use crate::error::{SinkError, StreamError};

fn records(n: u64) -> Vec<Value> {
    (1..=n).map(|id| json!({"id": id})).collect()
}

fn json_builder() -> Box<dyn FrameBuilder<Value>> {
    Box::new(JsonFrameBuilder::new("ok"))
}

/// Run a session against a channel sink and collect everything it produced.
async fn encode<T: Send + 'static>(
    source: RecordSource<T>,
    builder: Box<dyn FrameBuilder<T>>,
    options: EncodeOptions,
) -> (EncodeReport, String, Option<SinkError>) {
    let (sink, rx) = ChannelSink::channel(4);
    let session = EncodeSession::new(source, Box::new(sink), builder, options);
    let (report, (text, error)) = tokio::join!(session.run(), rx.collect_text());
    (report, text, error)
}

fn data_of(text: &str) -> Vec<Value> {
    let parsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed["success"], true);
    parsed["data"].as_array().unwrap().clone()
}

/// Finite sequence whose slice fails once it reaches `fail_at`.
struct FailingSequence {
    records: Vec<Value>,
    fail_at: usize,
}

impl FiniteSequence<Value> for FailingSequence {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn slice(&self, start: usize, count: usize) -> Result<&[Value], StreamError> {
        let end = start.saturating_add(count).min(self.records.len());
        if (start..end).contains(&self.fail_at) {
            return Err(StreamError::Source(format!("row {} unavailable", self.fail_at)));
        }
        Ok(&self.records[start.min(end)..end])
    }
}

/// Lazy sequence yielding its records, then either ending or failing.
struct ScriptedSequence {
    remaining: Vec<Value>,
    fail_with: Option<String>,
    pulls: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSequence {
    fn new(records: Vec<Value>, fail_with: Option<&str>) -> Self {
        let mut remaining = records;
        remaining.reverse();
        Self {
            remaining,
            fail_with: fail_with.map(String::from),
            pulls: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl LazySequence<Value> for ScriptedSequence {
    async fn next_record(&mut self) -> Result<Option<Value>, StreamError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        match self.remaining.pop() {
            Some(record) => Ok(Some(record)),
            None => match self.fail_with.take() {
                Some(msg) => Err(StreamError::Source(msg)),
                None => Ok(None),
            },
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SinkEvent {
    Push(String),
    Drain,
    End,
    Destroy(String),
}

/// Sink that records every call and applies backpressure on every push.
struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    fail_on_push: Option<usize>,
    pushes: usize,
    delivered: u64,
    closed: bool,
}

impl RecordingSink {
    fn new(fail_on_push: Option<usize>) -> (Self, Arc<Mutex<Vec<SinkEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            events: Arc::clone(&events),
            fail_on_push,
            pushes: 0,
            delivered: 0,
            closed: false,
        };
        (sink, events)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    fn push(&mut self, text: String) -> Result<bool, SinkError> {
        self.pushes += 1;
        if self.fail_on_push == Some(self.pushes) {
            self.closed = true;
            return Err(SinkError::Write("disk full".to_string()));
        }
        self.delivered += text.len() as u64;
        self.events.lock().unwrap().push(SinkEvent::Push(text));
        Ok(false)
    }

    async fn drained(&mut self) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(SinkEvent::Drain);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn bytes_delivered(&self) -> u64 {
        self.delivered
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        self.events.lock().unwrap().push(SinkEvent::End);
        Ok(())
    }

    async fn destroy(&mut self, error: &StreamError) {
        self.closed = true;
        self.events.lock().unwrap().push(SinkEvent::Destroy(error.to_string()));
    }
}

/// Record that serializes as `{"id":n}` or refuses to serialize.
enum Row {
    Good(u64),
    Bad,
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Row::Good(id) => json!({"id": id}).serialize(serializer),
            Row::Bad => Err(S::Error::custom("unsupported value")),
        }
    }
}

#[tokio::test]
async fn test_scenario_a_chunk_size_does_not_change_output() {
    let expected = r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2},{"id":3}]}"#;

    for chunk_size in 1..=4 {
        let (report, text, error) = encode(
            RecordSource::from_vec(records(3)),
            json_builder(),
            EncodeOptions::new().with_chunk_size(chunk_size),
        )
        .await;

        assert_eq!(text, expected, "chunk_size = {chunk_size}");
        assert!(error.is_none());
        assert!(report.is_completed());
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(report.records_emitted, 3);
        assert_eq!(report.bytes_pushed, expected.len() as u64);
    }
}

#[tokio::test]
async fn test_chunks_become_frames() {
    let (sink, mut rx) = ChannelSink::channel(8);
    let session = EncodeSession::new(
        RecordSource::from_vec(records(3)),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new().with_chunk_size(2),
    );
    let report = session.run().await;
    assert!(report.is_completed());

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(assert_ok!(frame));
    }
    assert_eq!(
        frames,
        vec![
            r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2}"#.to_string(),
            r#",{"id":3}"#.to_string(),
            "]}".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_scenario_b_csv() {
    let rows = vec![
        json!({"id": 1, "name": "a,b"}),
        json!({"id": 2, "name": "c\"d"}),
    ];
    let (report, text, error) = encode(
        RecordSource::from_vec(rows),
        Box::new(CsvFrameBuilder::new(["id", "name"])),
        EncodeOptions::new(),
    )
    .await;

    assert!(report.is_completed());
    assert!(error.is_none());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["id,name", "1,\"a,b\"", "2,\"c\"\"d\""]);
}

#[tokio::test]
async fn test_scenario_c_lazy_source_rejects() {
    let completed = Arc::new(AtomicBool::new(false));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let sequence = ScriptedSequence::new(records(2), Some("cursor timed out"));
    let closed = Arc::clone(&sequence.closed);

    let options = {
        let completed = Arc::clone(&completed);
        let errors = Arc::clone(&errors);
        EncodeOptions::new()
            .on_complete(move || completed.store(true, Ordering::SeqCst))
            .on_error(move |e: &StreamError| errors.lock().unwrap().push(e.clone()))
    };

    let (report, text, error) = encode(RecordSource::lazy(sequence), json_builder(), options).await;

    assert_eq!(
        text,
        r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2}"#
    );
    assert_eq!(
        error,
        Some(SinkError::Aborted("Source failed: cursor timed out".to_string()))
    );
    assert_eq!(
        *errors.lock().unwrap(),
        vec![StreamError::Source("cursor timed out".to_string())]
    );
    assert!(!completed.load(Ordering::SeqCst));
    assert!(closed.load(Ordering::SeqCst));

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.state, SessionState::Closed);
    assert_eq!(report.records_emitted, 2);
    assert!(report.output_started());
}

#[tokio::test]
async fn test_order_and_completeness_for_any_chunk_size() {
    for n in [0u64, 1, 7, 25] {
        for chunk_size in [1usize, 2, 3, 10, 100] {
            let (report, text, _) = encode(
                RecordSource::from_vec(records(n)),
                json_builder(),
                EncodeOptions::new().with_chunk_size(chunk_size),
            )
            .await;

            assert!(report.is_completed());
            assert_eq!(data_of(&text), records(n), "n = {n}, chunk_size = {chunk_size}");
        }
    }
}

#[tokio::test]
async fn test_empty_json_is_exact() {
    let (report, text, error) = encode(
        RecordSource::from_vec(Vec::<Value>::new()),
        Box::new(JsonFrameBuilder::default()),
        EncodeOptions::new(),
    )
    .await;

    assert!(report.is_completed());
    assert!(error.is_none());
    assert_eq!(
        text,
        r#"{"success":true,"message":"Datos obtenidos exitosamente","data":[]}"#
    );
}

#[tokio::test]
async fn test_empty_csv_is_header_only() {
    let (report, text, _) = encode(
        RecordSource::from_vec(Vec::<Value>::new()),
        Box::new(CsvFrameBuilder::new(["cuenta", "saldo"])),
        EncodeOptions::new(),
    )
    .await;

    assert!(report.is_completed());
    assert_eq!(text, "cuenta,saldo\n");
}

#[tokio::test]
async fn test_csv_has_one_line_per_record() {
    let rows: Vec<Value> = (0..12)
        .map(|i| json!({"cuenta": format!("10{i}"), "saldo": i * 10}))
        .collect();
    let (_, text, _) = encode(
        RecordSource::from_vec(rows),
        Box::new(CsvFrameBuilder::new(["cuenta", "saldo"])),
        EncodeOptions::new().with_chunk_size(5),
    )
    .await;

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 13);
    assert_eq!(lines[0], "cuenta,saldo");
    assert_eq!(lines[12], "1011,110");
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = EncodeOptions::new()
        .with_chunk_size(3)
        .on_progress(move |p: Progress| sink.lock().unwrap().push(p));

    encode(RecordSource::from_vec(records(10)), json_builder(), options).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(
        seen.windows(2)
            .all(|w| w[0].percentage <= w[1].percentage && w[0].processed <= w[1].processed)
    );
    assert_eq!(seen[0], Progress::known(3, 10));
    assert_eq!(*seen.last().unwrap(), Progress::known(10, 10));
    assert_eq!(seen.last().unwrap().percentage, Some(100));
}

#[tokio::test]
async fn test_empty_source_progress_ends_at_100() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = EncodeOptions::new().on_progress(move |p: Progress| sink.lock().unwrap().push(p));

    encode(RecordSource::from_vec(Vec::<Value>::new()), json_builder(), options).await;

    assert_eq!(*seen.lock().unwrap(), vec![Progress::known(0, 0)]);
}

#[tokio::test]
async fn test_lazy_progress_is_unknown() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = EncodeOptions::new().on_progress(move |p: Progress| sink.lock().unwrap().push(p));

    let source = RecordSource::from_stream(stream::iter(records(3).into_iter().map(Ok::<_, String>)));
    let (report, text, _) = encode(source, json_builder(), options).await;

    assert!(report.is_completed());
    assert_eq!(data_of(&text), records(3));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|p| p.total.is_none() && p.percentage.is_none()));
    assert_eq!(seen[2].processed, 3);
}

#[tokio::test]
async fn test_source_failure_aborts_after_last_good_chunk() {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);
    let options = EncodeOptions::new()
        .with_chunk_size(2)
        .on_error(move |_: &StreamError| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    // Record 3 (index 2) cannot be produced
    let source = RecordSource::finite(FailingSequence {
        records: records(5),
        fail_at: 2,
    });
    let (report, text, error) = encode(source, json_builder(), options).await;

    assert_eq!(text, r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2}"#);
    assert!(matches!(error, Some(SinkError::Aborted(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.records_emitted, 2);
    assert_eq!(
        report.error,
        Some(StreamError::Source("row 2 unavailable".to_string()))
    );
}

#[tokio::test]
async fn test_failure_before_first_record_pushes_nothing() {
    let source = RecordSource::finite(FailingSequence {
        records: records(3),
        fail_at: 0,
    });
    let (report, text, error) = encode(source, json_builder(), EncodeOptions::new()).await;

    assert!(text.is_empty());
    assert!(matches!(error, Some(SinkError::Aborted(_))));
    assert!(!report.output_started());
    assert_eq!(report.bytes_pushed, 0);
}

#[tokio::test]
async fn test_serialization_failure_mid_chunk() {
    let rows = vec![Row::Good(1), Row::Good(2), Row::Bad, Row::Good(4)];
    let builder: Box<dyn FrameBuilder<Row>> = Box::new(JsonFrameBuilder::new("ok"));
    let (report, text, error) = encode(RecordSource::from_vec(rows), builder, EncodeOptions::new()).await;

    assert_eq!(text, r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2}"#);
    assert!(matches!(error, Some(SinkError::Aborted(_))));
    assert_eq!(report.records_emitted, 2);
    assert!(matches!(report.error, Some(StreamError::Serialization(_))));
}

#[tokio::test]
async fn test_waits_for_drain_after_every_refused_push() {
    let (sink, events) = RecordingSink::new(None);
    let session = EncodeSession::new(
        RecordSource::from_vec(records(4)),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new().with_chunk_size(1),
    );
    let report = session.run().await;

    assert!(report.is_completed());
    assert_eq!(report.drain_waits, 5);

    let events = events.lock().unwrap();
    for (i, event) in events.iter().enumerate() {
        if matches!(event, SinkEvent::Push(_)) {
            assert_eq!(events[i + 1], SinkEvent::Drain, "push {i} was not followed by a drain wait");
        }
    }
    assert_eq!(events.last(), Some(&SinkEvent::End));

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Push(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(data_of(&text), records(4));
}

#[tokio::test]
async fn test_on_complete_fires_once_before_end() {
    let calls = Arc::new(AtomicU64::new(0));
    let events_at_call = Arc::new(Mutex::new(None));
    let (sink, events) = RecordingSink::new(None);

    let options = {
        let calls = Arc::clone(&calls);
        let events_at_call = Arc::clone(&events_at_call);
        let events = Arc::clone(&events);
        EncodeOptions::new().on_complete(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            *events_at_call.lock().unwrap() = Some(events.lock().unwrap().len());
        })
    };
    let session = EncodeSession::new(
        RecordSource::from_vec(records(3)),
        Box::new(sink),
        json_builder(),
        options,
    );
    let report = session.run().await;

    assert!(report.is_completed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let events = events.lock().unwrap();
    let seen = events_at_call.lock().unwrap().expect("on_complete not called");
    // End is the only event recorded after the callback
    assert_eq!(seen, events.len() - 1);
    assert_eq!(events.last(), Some(&SinkEvent::End));
}

#[tokio::test]
async fn test_on_complete_fires_for_empty_source() {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);
    let options = EncodeOptions::new().on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (report, _, _) = encode(RecordSource::from_vec(Vec::<Value>::new()), json_builder(), options).await;

    assert!(report.is_completed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sink_write_failure_destroys_sink() {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);
    let (sink, events) = RecordingSink::new(Some(2));

    let session = EncodeSession::new(
        RecordSource::from_vec(records(10)),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new()
            .with_chunk_size(1)
            .on_error(move |_: &StreamError| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let report = session.run().await;

    assert_eq!(
        report.error,
        Some(StreamError::Sink(SinkError::Write("disk full".to_string())))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let events = events.lock().unwrap();
    let pushes = events.iter().filter(|e| matches!(e, SinkEvent::Push(_))).count();
    assert_eq!(pushes, 1);
    assert_eq!(
        events.last(),
        Some(&SinkEvent::Destroy("Sink write failed: disk full".to_string()))
    );
}

#[tokio::test]
async fn test_backpressure_bounds_queued_frames() {
    let seen = Arc::new(AtomicU64::new(0));
    let processed = Arc::clone(&seen);
    let (sink, rx) = ChannelSink::channel(2);

    let handle = start(
        RecordSource::from_vec(records(50)),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new()
            .with_chunk_size(1)
            .on_progress(move |p: Progress| processed.store(p.processed, Ordering::SeqCst)),
    );

    // Nobody reads yet; the session parks on the full channel
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    assert!(rx.queued() <= 2);
    assert!(seen.load(Ordering::SeqCst) <= 2);

    let (text, error) = rx.collect_text().await;
    let report = assert_ok!(handle.wait().await);

    assert!(error.is_none());
    assert!(report.is_completed());
    assert!(report.drain_waits > 0);
    assert_eq!(data_of(&text), records(50));
}

#[tokio::test]
async fn test_consumer_close_stops_pulling() {
    let pulls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&pulls);
    let endless = stream::iter(0u64..).map(move |id| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(json!({"id": id}))
    });

    let (sink, mut rx) = ChannelSink::channel(4);
    let handle = start(
        RecordSource::from_stream(endless),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new(),
    );

    for _ in 0..3 {
        assert_ok!(rx.recv().await.unwrap());
    }
    rx.close();

    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("session kept running after the consumer left")
        .unwrap();

    assert_eq!(report.error, Some(StreamError::Sink(SinkError::Closed)));
    assert_eq!(report.outcome, Outcome::Failed);
    assert!(pulls.load(Ordering::SeqCst) < 20);
}

#[tokio::test]
async fn test_receiver_drop_interrupts_pending_pull() {
    let (sink, rx) = ChannelSink::channel(4);
    let handle = start(
        RecordSource::from_stream(stream::pending::<Result<Value, String>>()),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new(),
    );

    drop(rx);
    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("pending pull was not interrupted")
        .unwrap();

    assert_eq!(report.error, Some(StreamError::Sink(SinkError::Closed)));
    assert_eq!(report.bytes_pushed, 0);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_record() {
    let (sink, mut rx) = ChannelSink::channel(4);
    let handle = start(
        RecordSource::from_stream(stream::pending::<Result<Value, String>>()),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new(),
    );
    tokio::task::yield_now().await;

    // Opening token is staged, not pushed, until a record exists
    {
        let mut recv = tokio_test::task::spawn(rx.recv());
        assert_pending!(recv.poll());
    }

    handle.cancel();
    let report = assert_ok!(handle.wait().await);
    assert_eq!(report.error, Some(StreamError::Cancelled));
    assert!(!report.output_started());

    let (text, error) = rx.collect_text().await;
    assert!(text.is_empty());
    assert_eq!(error, Some(SinkError::Aborted("Encoding cancelled".to_string())));
}

#[tokio::test]
async fn test_cancel_during_inter_chunk_delay() {
    let token = tokio_util::sync::CancellationToken::new();
    let (sink, mut rx) = ChannelSink::channel(4);
    let handle = start(
        RecordSource::from_vec(records(3)),
        Box::new(sink),
        json_builder(),
        EncodeOptions::new()
            .with_chunk_size(1)
            .with_inter_chunk_delay(Duration::from_secs(3600))
            .with_cancellation(token.clone()),
    );

    let first = assert_ok!(rx.recv().await.unwrap());
    assert!(first.ends_with(r#"{"id":1}"#));
    token.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("delay ignored cancellation")
        .unwrap();
    assert_eq!(report.error, Some(StreamError::Cancelled));
    assert_eq!(report.records_emitted, 1);
}

#[tokio::test]
async fn test_inter_chunk_delay_preserves_order() {
    let (report, text, _) = encode(
        RecordSource::from_vec(records(3)),
        json_builder(),
        EncodeOptions::new()
            .with_chunk_size(1)
            .with_inter_chunk_delay(Duration::from_millis(2)),
    )
    .await;

    assert!(report.is_completed());
    assert!(report.elapsed_ms >= 4);
    assert_eq!(data_of(&text), records(3));
}

#[tokio::test]
async fn test_lazy_source_is_closed_on_completion() {
    let sequence = ScriptedSequence::new(records(2), None);
    let closed = Arc::clone(&sequence.closed);
    let pulls = Arc::clone(&sequence.pulls);

    let (report, text, _) = encode(RecordSource::lazy(sequence), json_builder(), EncodeOptions::new()).await;

    assert!(report.is_completed());
    assert_eq!(data_of(&text), records(2));
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_json_lines_source_end_to_end() {
    let input = b"{\"id\":1}\n\n{\"id\":2}\nnot json\n{\"id\":4}\n";
    let source = RecordSource::lazy(JsonLinesSource::new(tokio::io::BufReader::new(&input[..])));

    let (report, text, error) = encode(source, json_builder(), EncodeOptions::new()).await;

    assert_eq!(text, r#"{"success":true,"message":"ok","data":[{"id":1},{"id":2}"#);
    assert!(error.is_some());
    assert!(matches!(report.error, Some(StreamError::Source(ref msg)) if msg.starts_with("line 4")));
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let (sink_a, rx_a) = ChannelSink::channel(1);
    let (sink_b, rx_b) = ChannelSink::channel(1);

    let a = start(
        RecordSource::from_vec(records(20)),
        Box::new(sink_a),
        json_builder(),
        EncodeOptions::new().with_chunk_size(3),
    );
    let b = start(
        RecordSource::from_vec(vec![json!({"cuenta": "1011", "saldo": 5})]),
        Box::new(sink_b),
        Box::new(CsvFrameBuilder::new(["cuenta", "saldo"])),
        EncodeOptions::new(),
    );
    assert_ne!(a.session_id(), b.session_id());

    let ((text_a, _), (text_b, _)) = tokio::join!(rx_a.collect_text(), rx_b.collect_text());
    let report_a = assert_ok!(a.wait().await);
    let report_b = assert_ok!(b.wait().await);

    assert_eq!(data_of(&text_a), records(20));
    assert_eq!(text_b, "cuenta,saldo\n1011,5\n");
    assert_eq!(report_a.records_emitted, 20);
    assert_eq!(report_b.records_emitted, 1);
}

#[tokio::test]
async fn test_writer_sink_end_to_end() {
    let (writer, mut reader) = tokio::io::duplex(64);
    let session = EncodeSession::new(
        RecordSource::from_vec(records(30)),
        Box::new(WriterSink::new(writer, 16)),
        json_builder(),
        EncodeOptions::new().with_chunk_size(4),
    );

    let mut text = String::new();
    let (report, read) = tokio::join!(session.run(), reader.read_to_string(&mut text));

    assert_ok!(read);
    assert!(report.is_completed());
    assert!(report.drain_waits > 0);
    assert_eq!(data_of(&text), records(30));
}

#[tokio::test]
async fn test_discarded_buffer_does_not_count_as_output() {
    let (writer, mut reader) = tokio::io::duplex(1024);
    let rows = vec![json!({"id": 1}), json!([1, 2])];
    let session = EncodeSession::new(
        RecordSource::from_vec(rows),
        Box::new(WriterSink::new(writer, DEFAULT_HIGH_WATER_MARK)),
        Box::new(CsvFrameBuilder::new(["id"])),
        EncodeOptions::new(),
    );

    let mut text = String::new();
    let (report, read) = tokio::join!(session.run(), reader.read_to_string(&mut text));

    assert_ok!(read);
    assert_eq!(report.outcome, Outcome::Failed);
    assert!(matches!(report.error, Some(StreamError::Serialization(_))));
    assert_eq!(report.bytes_pushed, "id\n1\n".len() as u64);
    assert_eq!(report.bytes_delivered, 0);
    assert!(!report.output_started());
    assert!(text.is_empty());
}

#[tokio::test]
async fn test_writer_sink_flushes_while_lazy_source_waits() {
    let (writer, mut reader) = tokio::io::duplex(1024);
    let slow = stream::iter(vec![Ok::<_, String>(json!({"id": 1}))]).chain(stream::pending());

    let handle = start(
        RecordSource::from_stream(slow),
        Box::new(WriterSink::new(writer, DEFAULT_HIGH_WATER_MARK)),
        json_builder(),
        EncodeOptions::new(),
    );

    let expected = r#"{"success":true,"message":"ok","data":[{"id":1}"#;
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while received.len() < expected.len() {
        let n = tokio::time::timeout(Duration::from_secs(5), reader.read(&mut buf))
            .await
            .expect("first record held back while the source waits")
            .unwrap();
        assert!(n > 0, "writer closed early");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(String::from_utf8(received).unwrap(), expected);

    handle.cancel();
    let report = assert_ok!(handle.wait().await);
    assert_eq!(report.error, Some(StreamError::Cancelled));
    assert_eq!(report.records_emitted, 1);
    assert!(report.output_started());
}
