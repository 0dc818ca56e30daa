//! Per-stream statistics: sequence-wrap tracking, inter-arrival EMA, and
//! the too-late-sequence hand-off from the RT thread back to the
//! network thread.
//!
//! All three are written only by the network thread (loss/late
//! counters, the EMA) or drained by it (the too-late FIFO); the control
//! thread only ever takes an immutable snapshot copy for reporting.

use crate::queue::SpscQueue;
use crate::wrapping::{MonotonicTracker, SequenceEvent, WrappingU16};

/// `ema ← α·x + (1−α)·ema`, bypassing samples too far from the current
/// estimate. Used to flag coarse timing anomalies, not for playout
/// timing — see spec §4.8.2.
#[derive(Debug, Clone, Copy)]
pub struct IntervalEma {
    alpha: f64,
    kappa: f64,
    ema_ms: Option<f64>,
    max_deviation_ms: f64,
}

impl IntervalEma {
    pub const DEFAULT_ALPHA: f64 = 0.001;
    pub const DEFAULT_KAPPA: f64 = 1.5;

    pub fn new() -> Self {
        Self {
            alpha: Self::DEFAULT_ALPHA,
            kappa: Self::DEFAULT_KAPPA,
            ema_ms: None,
            max_deviation_ms: 0.0,
        }
    }

    /// Feeds one inter-arrival sample, in milliseconds. Samples outside
    /// `[ema/kappa, kappa*ema]` update `max_deviation` but are excluded
    /// from the EMA itself.
    pub fn observe(&mut self, sample_ms: f64) {
        let Some(ema) = self.ema_ms else {
            self.ema_ms = Some(sample_ms);
            return;
        };

        let lower = ema / self.kappa;
        let upper = ema * self.kappa;
        if sample_ms < lower || sample_ms > upper {
            let deviation = (sample_ms - ema).abs();
            if deviation > self.max_deviation_ms {
                self.max_deviation_ms = deviation;
            }
            return;
        }

        self.ema_ms = Some(self.alpha * sample_ms + (1.0 - self.alpha) * ema);
    }

    pub fn ema_ms(&self) -> Option<f64> {
        self.ema_ms
    }

    pub fn max_deviation_ms(&self) -> f64 {
        self.max_deviation_ms
    }
}

impl Default for IntervalEma {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequence-wrap tracker plus the four event counters spec §4.8.1
/// names. Wraps [`MonotonicTracker`]; a burst larger than `2^15` (the
/// signed-diff ambiguity boundary named in spec §9) is treated as a
/// stream restart and resets the tracker rather than being counted as
/// loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceStats {
    tracker: MonotonicTracker<WrappingU16>,
    pub received: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicate: u64,
}

impl SequenceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seq: u16) -> SequenceEvent {
        self.received += 1;
        let seq = WrappingU16::new(seq);

        if let Some(last) = self.tracker.last() {
            // `diff` is the signed shortest-path delta, bounded to
            // `(-2^15, 2^15]` by construction — it can never itself exceed
            // the spec's named "2^15" ambiguity boundary, so the restart
            // threshold has to sit strictly below that bound to mean
            // anything. A one-packet reorder (|delta| = 1) is routine; a
            // delta approaching the ambiguity boundary is, by definition,
            // no more likely to be a legitimate reorder than a fresh
            // stream reusing small sequence numbers, so `2^14` (half the
            // representable range) is where this resolves the spec's
            // named Open Question.
            const RESTART_THRESHOLD: u32 = 1 << 14;
            #[allow(clippy::unnecessary_cast)]
            let distance = seq.diff(last).unsigned_abs() as u32;
            if distance >= RESTART_THRESHOLD {
                self.tracker.reset(seq);
                return SequenceEvent::InOrder;
            }
        }

        let (event, delta) = self.tracker.update(seq);
        match event {
            SequenceEvent::InOrder => {}
            SequenceEvent::Loss => self.lost += (delta - 1).max(0) as u64,
            SequenceEvent::Reordered => self.reordered += 1,
            SequenceEvent::Duplicate => self.duplicate += 1,
        }
        event
    }

    pub fn last_seq(&self) -> Option<u16> {
        self.tracker.last().map(WrappingU16::get)
    }
}

/// Carries a sequence number the RT thread discovered had arrived past
/// its playout point, from the RT thread back to the network thread so
/// the `late` counter lives in statistics rather than on the hot path.
pub struct TooLateTracker {
    fifo: SpscQueue<u16>,
    pub late: std::sync::atomic::AtomicU64,
}

impl TooLateTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            fifo: SpscQueue::new(capacity),
            late: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Called from the RT thread. Never blocks; drops the report if the
    /// FIFO happens to be full (it will be drained again on the next
    /// network-thread tick).
    pub fn report_late(&self, seq: u16) {
        let _ = self.fifo.push(seq);
    }

    /// Called from the network thread: drains every pending report and
    /// folds it into the `late` counter.
    pub fn drain(&self) -> u64 {
        let mut drained = 0u64;
        while self.fifo.pop().is_some() {
            drained += 1;
        }
        if drained > 0 {
            self.late
                .fetch_add(drained, std::sync::atomic::Ordering::Relaxed);
        }
        drained
    }
}

/// Immutable snapshot of a stream's statistics, for the control thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsSnapshot {
    pub received: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicate: u64,
    pub late: u64,
    pub interval_ema_ms: Option<f64>,
    pub interval_max_deviation_ms: f64,
}
