//! Progress reporting for long-running operations.
//!
//! Core operations (download, heal, patch) report a completion fraction
//! through the [`ProgressSink`] trait; they never talk to the event bus
//! directly. [`EventProgress`] is the standard sink: it clamps the fraction
//! monotone, derives throughput and ETA from wall-clock time, and emits a
//! `progress` event at most once per second so the stream stays readable.

use crate::constants::PROGRESS_EMIT_INTERVAL;
use crate::events::{self, Event};
use std::time::Instant;
use tracing::debug;

/// Receiver of progress updates from a core operation.
pub trait ProgressSink: Send {
    /// Called with a completion fraction in `[0, 1]`. Implementations must
    /// tolerate repeated and slightly out-of-order values; the emitted
    /// stream is required to be monotone, raw reports are not.
    fn on_progress(&mut self, fraction: f64);

    /// Called with a human-readable status label. Optional.
    fn on_label(&mut self, _label: &str) {}
}

/// A sink that drops everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&mut self, _fraction: f64) {}
}

/// The standard sink: monotone clamping, bps/ETA, throttled `progress`
/// events on the bus.
pub struct EventProgress {
    total_bytes: u64,
    started: Instant,
    last_emit: Option<Instant>,
    best: f64,
}

impl EventProgress {
    /// Creates a tracker for an operation moving `total_bytes` in total.
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            started: Instant::now(),
            last_emit: None,
            best: 0.0,
        }
    }

    /// Emits a final `progress` event at the current (clamped) fraction,
    /// bypassing the throttle. Call on successful completion.
    pub fn finish(&mut self) {
        self.best = 1.0;
        self.emit_now();
    }

    fn emit_now(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let done_bytes = self.best * self.total_bytes as f64;
        let bps = if elapsed > 0.0 { done_bytes / elapsed } else { 0.0 };
        let remaining = (self.total_bytes as f64 - done_bytes).max(0.0);
        let eta = if bps > 0.0 { remaining / bps } else { 0.0 };

        debug!(
            "{:5.1}% done - {:.0} B/s, ETA {:.0}s",
            self.best * 100.0,
            bps,
            eta
        );
        events::emit(&Event::Progress { progress: self.best, bps, eta });
        self.last_emit = Some(Instant::now());
    }
}

impl ProgressSink for EventProgress {
    fn on_progress(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= self.best {
            return;
        }
        self.best = fraction;

        let due = match self.last_emit {
            None => true,
            Some(at) => at.elapsed() >= PROGRESS_EMIT_INTERVAL,
        };
        if due {
            self.emit_now();
        }
    }

    fn on_label(&mut self, label: &str) {
        events::emit(&Event::Log { level: "info".to_string(), message: label.to_string() });
    }
}

/// A sink that maps a sub-operation's `[0, 1]` into a window of an outer
/// sink, for chains of steps sharing one monotone stream.
pub struct ScaledSink<'a> {
    inner: &'a mut dyn ProgressSink,
    offset: f64,
    share: f64,
}

impl<'a> ScaledSink<'a> {
    /// Wraps `inner`, mapping 0..1 onto `offset..offset + share`.
    pub fn new(inner: &'a mut dyn ProgressSink, offset: f64, share: f64) -> Self {
        Self { inner, offset, share }
    }
}

impl ProgressSink for ScaledSink<'_> {
    fn on_progress(&mut self, fraction: f64) {
        self.inner.on_progress(self.offset + fraction.clamp(0.0, 1.0) * self.share);
    }

    fn on_label(&mut self, label: &str) {
        self.inner.on_label(label);
    }
}
