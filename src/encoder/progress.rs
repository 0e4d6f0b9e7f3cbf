//! Progress tracking and error reporting for encode sessions
//!
//! Counters live in the tracker owned by one session, so concurrent sessions
//! over different sinks never share state.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::error::StreamError;

/// Callback receiving a progress snapshot after every tick.
pub type ProgressCallback = Box<dyn FnMut(Progress) + Send>;

/// Callback receiving the error that failed a session.
pub type ErrorCallback = Box<dyn FnOnce(&StreamError) + Send>;

/// Callback invoked when a session completes.
pub type CompleteCallback = Box<dyn FnOnce() + Send>;

/// Snapshot of how far a session has got
///
/// `total` and `percentage` are `None` (serialized as `null`) when the source
/// length is unknown. That is distinct from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub total: Option<u64>,
    pub percentage: Option<u8>,
}

impl Progress {
    /// Progress against a known total.
    pub fn known(processed: u64, total: u64) -> Self {
        Self {
            processed,
            total: Some(total),
            percentage: Some(percentage(processed, total)),
        }
    }

    /// Progress of a source of unknown length.
    pub fn unknown(processed: u64) -> Self {
        Self {
            processed,
            total: None,
            percentage: None,
        }
    }

    /// Whether the total is known.
    pub fn is_known(&self) -> bool {
        self.total.is_some()
    }
}

/// `round(100 * processed / total)`, halves rounded up, in integers.
///
/// An empty total counts as done.
fn percentage(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let processed = u128::from(processed.min(total));
    let total = u128::from(total);
    ((200 * processed + total) / (2 * total)) as u8
}

/// Progress tracker for one encode session
///
/// Tracks processed records, forwards snapshots to the caller's callback and
/// optionally drives a terminal progress bar.
pub struct ProgressTracker {
    /// Records emitted so far
    processed: u64,
    /// Source length when known
    total: Option<u64>,
    /// Number of snapshots delivered
    events: u64,
    /// Start time of the session
    start_time: Instant,
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `total` - Total number of records if known (None for unknown)
    /// * `enable_bar` - Whether to display a progress bar on stderr
    pub fn new(total: Option<u64>, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) =
                    ProgressStyle::default_spinner().template("{spinner:.green} {pos} records {msg}")
                {
                    bar.set_style(style);
                }
                bar
            }
        });

        Self {
            processed: 0,
            total,
            events: 0,
            start_time: Instant::now(),
            bar,
            callback: None,
        }
    }

    /// Attach the caller's progress callback.
    pub fn with_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Progress {
        match self.total {
            Some(total) => Progress::known(self.processed, total),
            None => Progress::unknown(self.processed),
        }
    }

    /// Record that `count` more records went out and report it
    ///
    /// # Returns
    /// * `Progress` - The snapshot that was delivered
    pub fn advance(&mut self, count: u64) -> Progress {
        self.processed += count;
        let progress = self.snapshot();

        if let Some(ref bar) = self.bar {
            bar.set_position(self.processed);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = self.processed as f64 / elapsed;
                bar.set_message(format!("({:.0} records/sec)", speed));
            }
        }

        self.deliver(progress);
        progress
    }

    /// Report the final state of a finite source that never reported one
    ///
    /// An empty source has no ticks; it still ends at 100%.
    pub fn complete(&mut self) {
        if self.total.is_some() && self.events == 0 {
            self.deliver(self.snapshot());
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }

    fn deliver(&mut self, progress: Progress) {
        self.events += 1;
        if let Some(callback) = self.callback.as_mut() {
            callback(progress);
        }
    }
}

/// Funnels a session's failure to the caller exactly once
#[derive(Default)]
pub struct ErrorReporter {
    callback: Option<ErrorCallback>,
    reported: bool,
}

impl ErrorReporter {
    /// Create a reporter around the caller's error callback.
    pub fn new(callback: Option<ErrorCallback>) -> Self {
        Self {
            callback,
            reported: false,
        }
    }

    /// Report a failure
    ///
    /// # Returns
    /// * `bool` - `true` the first time, `false` for any later call
    pub fn report(&mut self, error: &StreamError) -> bool {
        if self.reported {
            return false;
        }
        self.reported = true;
        if let Some(callback) = self.callback.take() {
            callback(error);
        }
        true
    }
}
