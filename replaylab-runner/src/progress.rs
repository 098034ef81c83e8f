//! Progress side channel.
//!
//! Progress never blocks the simulation: sinks are rate-limited and the
//! channel sink drops events when its receiver falls behind.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Which phase of a run an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Timeline,
    Collecting,
    Simulating,
    Finalizing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub processed: u64,
    pub total: u64,
    pub elapsed_ms: u64,
    pub completed: bool,
}

impl ProgressEvent {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            if self.completed {
                1.0
            } else {
                0.0
            }
        } else {
            (self.processed as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Receiver of progress events. Implementations must return quickly.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Forwards at most one event per `interval`; completion events always pass.
pub struct ThrottledProgress<S> {
    inner: S,
    interval_ms: u64,
    origin: Instant,
    /// Millis since `origin` of the last forwarded event, plus one (0 = never).
    last_ms: AtomicU64,
}

impl<S: ProgressSink> ThrottledProgress<S> {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval_ms: interval.as_millis() as u64,
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ProgressSink> ProgressSink for ThrottledProgress<S> {
    fn emit(&self, event: &ProgressEvent) {
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        if !event.completed {
            let last = self.last_ms.load(Ordering::Relaxed);
            if last != 0 && now.saturating_sub(last) < self.interval_ms {
                return;
            }
            if self
                .last_ms
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
        } else {
            self.last_ms.store(now, Ordering::Relaxed);
        }
        self.inner.emit(event);
    }
}

/// Bounded channel sink; full or disconnected channels drop the event.
pub struct ChannelProgress {
    tx: Sender<ProgressEvent>,
    dropped: AtomicU64,
}

impl ChannelProgress {
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: &ProgressEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Per-run reporter: stamps elapsed time and forwards to a sink.
pub(crate) struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
    started: Instant,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, started: Instant) -> Self {
        Self { sink, started }
    }

    pub(crate) fn report(&self, stage: Stage, processed: u64, total: u64) {
        self.send(stage, processed, total, false);
    }

    pub(crate) fn complete(&self, stage: Stage, processed: u64, total: u64) {
        self.send(stage, processed, total, true);
    }

    fn send(&self, stage: Stage, processed: u64, total: u64, completed: bool) {
        self.sink.emit(&ProgressEvent {
            stage,
            processed,
            total,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            completed,
        });
    }
}
