//! The receive-side data model (§3): `Session`, `Filter`, `Rank`,
//! `Stream`, and the mutable per-stream state a reader keeps —
//! `StreamContext` plus its `StreamState` machine (§4.9).

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::queue::SpscQueue;
use crate::stats::{IntervalEma, SequenceStats, StatisticsSnapshot, TooLateTracker};
use crate::wrapping::WrappingU32;

/// Redundancy class of a stream. Lower ranks are preferred for
/// diagnostics; all ranks merge into the same reconstruction ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rank(pub u8);

impl Rank {
    pub const PRIMARY: Rank = Rank(1);
    pub const SECONDARY: Rank = Rank(2);
}

/// `(address, rtp_port, rtcp_port)`. Two sessions sharing `(address,
/// rtp_port)` are duplicates for socket-binding purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Session {
    pub address: Ipv4Addr,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl Session {
    pub fn new(address: Ipv4Addr, rtp_port: u16, rtcp_port: u16) -> Self {
        Self { address, rtp_port, rtcp_port }
    }

    /// Key two sessions are compared by when deciding whether they need
    /// separate sockets.
    pub fn bind_key(&self) -> (Ipv4Addr, u16) {
        (self.address, self.rtp_port)
    }

    pub fn is_multicast(&self) -> bool {
        self.address.is_multicast()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    Include,
    Exclude,
}

/// `{dst, src, mode}`. A packet matches when its destination equals
/// `dst` and, if `src` is set, the packet's source either matches it
/// (`Include`) or does not (`Exclude`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Filter {
    pub dst: Ipv4Addr,
    pub src: Option<Ipv4Addr>,
    pub mode: FilterMode,
}

impl Filter {
    pub fn new(dst: Ipv4Addr) -> Self {
        Self { dst, src: None, mode: FilterMode::Include }
    }

    pub fn matches(&self, src_addr: Ipv4Addr, dst_addr: Ipv4Addr) -> bool {
        if dst_addr != self.dst {
            return false;
        }
        match (self.src, self.mode) {
            (None, _) => true,
            (Some(expected), FilterMode::Include) => src_addr == expected,
            (Some(expected), FilterMode::Exclude) => src_addr != expected,
        }
    }
}

/// `{session, filter, rank, packet_time_frames}` — one leg of a (possibly
/// redundant) RTP stream a reader subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stream {
    pub session: Session,
    pub filter: Filter,
    pub rank: Rank,
    pub packet_time_frames: u16,
}

/// Per-stream state machine (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    WaitingForData,
    Ok,
    OkNoConsumer,
    Inactive,
}

impl StreamState {
    fn encode(self) -> u8 {
        match self {
            StreamState::Idle => 0,
            StreamState::WaitingForData => 1,
            StreamState::Ok => 2,
            StreamState::OkNoConsumer => 3,
            StreamState::Inactive => 4,
        }
    }

    fn decode(v: u8) -> Self {
        match v {
            0 => StreamState::Idle,
            1 => StreamState::WaitingForData,
            2 => StreamState::Ok,
            3 => StreamState::OkNoConsumer,
            _ => StreamState::Inactive,
        }
    }
}

/// A decoded RTP packet handed from the network thread to the RT
/// thread. `data` is a [`Bytes`] clone (a refcount bump, not an
/// allocation) of the reactor's receive buffer slice, so the hand-off
/// itself never allocates.
#[derive(Debug, Clone)]
pub struct IntermediatePacket {
    pub timestamp: WrappingU32,
    pub seq: u16,
    pub packet_time_frames: u16,
    pub data: Bytes,
}

/// No packet for this long marks a stream `Inactive` (spec §4.9 table).
pub const INACTIVITY_TIMEOUT_NS: u64 = 2_000_000_000;

/// Mutable per-stream state owned by the reader: FIFO, too-late
/// tracker, statistics, last-seen sequence, and the state machine.
/// Written by the network thread; drained by the RT thread; snapshot
/// by the control thread.
pub struct StreamContext {
    pub stream: Stream,
    state: AtomicU8,
    last_packet_ns: AtomicU64,
    consumer_active: AtomicBool,
    fifo: SpscQueue<IntermediatePacket>,
    too_late: TooLateTracker,
    stats: Mutex<SequenceStats>,
    ema: Mutex<IntervalEma>,
    last_arrival_ns: AtomicU64,
    last_ready_ts: Mutex<Option<WrappingU32>>,
    error_packets: AtomicU64,
}

/// Caps how many synthetic `on_data_ready` fires a single packet can
/// trigger, in case a stream restart produces a huge apparent gap.
const MAX_READY_BACKFILL: u32 = 64;

impl StreamContext {
    pub fn new(stream: Stream, fifo_capacity: usize) -> Self {
        Self {
            stream,
            state: AtomicU8::new(StreamState::Idle.encode()),
            last_packet_ns: AtomicU64::new(0),
            consumer_active: AtomicBool::new(true),
            fifo: SpscQueue::new(fifo_capacity),
            too_late: TooLateTracker::new(fifo_capacity),
            stats: Mutex::new(SequenceStats::new()),
            ema: Mutex::new(IntervalEma::new()),
            last_arrival_ns: AtomicU64::new(0),
            last_ready_ts: Mutex::new(None),
            error_packets: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> StreamState {
        StreamState::decode(self.state.load(Ordering::Acquire))
    }

    /// Sets the state unconditionally. Returns `true` if it actually
    /// changed, so the caller can decide whether to fire
    /// `on_state_changed`.
    fn set_state(&self, new: StreamState) -> bool {
        let prev = self.state.swap(new.encode(), Ordering::AcqRel);
        prev != new.encode()
    }

    pub fn enable(&self) -> bool {
        if self.state() == StreamState::Idle {
            self.set_state(StreamState::WaitingForData)
        } else {
            false
        }
    }

    pub fn disable(&self) -> bool {
        self.set_state(StreamState::Idle)
    }

    /// Network-thread entry point: enqueue a freshly parsed packet.
    /// Transitions `waiting_for_data`/`ok_no_consumer` -> `ok` on
    /// success, or `ok` -> `ok_no_consumer` when the FIFO is full
    /// (consumer too slow — the packet is irrecoverably dropped).
    ///
    /// Returns `(accepted, state_changed_to)`.
    pub fn enqueue(&self, packet: IntermediatePacket, now_ns: u64) -> (bool, Option<StreamState>) {
        self.last_packet_ns.store(now_ns, Ordering::Relaxed);
        match self.fifo.push(packet) {
            Ok(()) => {
                self.consumer_active.store(true, Ordering::Relaxed);
                let state = StreamState::Ok;
                let changed = self.set_state(state);
                (true, changed.then_some(state))
            }
            Err(_dropped) => {
                self.consumer_active.store(false, Ordering::Relaxed);
                let state = StreamState::OkNoConsumer;
                let changed = self.set_state(state);
                (false, changed.then_some(state))
            }
        }
    }

    /// RT-thread entry point: pop the next queued packet, if any.
    pub fn pop(&self) -> Option<IntermediatePacket> {
        self.fifo.pop()
    }

    pub fn queue_len(&self) -> usize {
        self.fifo.len()
    }

    /// RT-thread entry point: report a packet that arrived after its
    /// playout point had already passed.
    pub fn report_late(&self, seq: u16) {
        self.too_late.report_late(seq);
    }

    /// Network-thread maintenance: fold sequence-number bookkeeping for
    /// one packet into statistics, draining any pending too-late
    /// reports from the RT thread at the same time.
    pub fn record_packet(&self, seq: u16) -> crate::wrapping::SequenceEvent {
        self.too_late.drain();
        self.stats.lock().observe(seq)
    }

    pub fn record_parse_error(&self) {
        self.error_packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Feeds the inter-arrival EMA (spec §4.8.2) with the gap since the
    /// previous packet. No sample is produced for the very first
    /// packet observed.
    pub fn observe_arrival(&self, now_ns: u64) {
        let prev = self.last_arrival_ns.swap(now_ns, Ordering::Relaxed);
        if prev != 0 {
            let sample_ms = now_ns.saturating_sub(prev) as f64 / 1_000_000.0;
            self.ema.lock().observe(sample_ms);
        }
    }

    /// Computes the playout-ready timestamps (`ts - delay_frames`) that
    /// `on_data_ready` should fire for, given this packet's timestamp:
    /// one for every packet-time step between the previously computed
    /// ready timestamp and this one (covering gaps from loss), plus
    /// this packet's own ready timestamp. Bounded by
    /// [`MAX_READY_BACKFILL`] so a stream restart can't produce an
    /// unbounded backfill.
    pub fn advance_ready_timestamps(&self, ts: WrappingU32, delay_frames: u32, packet_time_frames: u16) -> Vec<u32> {
        let ready = ts.wrapping_add(0u32.wrapping_sub(delay_frames));
        let mut last = self.last_ready_ts.lock();
        let mut fired = Vec::new();

        if let Some(prev) = *last {
            if packet_time_frames > 0 {
                let mut cursor = prev.wrapping_add(packet_time_frames as u32);
                let mut steps = 0;
                while cursor.diff(ready) < 0 && steps < MAX_READY_BACKFILL {
                    fired.push(cursor.get());
                    cursor = cursor.wrapping_add(packet_time_frames as u32);
                    steps += 1;
                }
            }
        }
        fired.push(ready.get());
        *last = Some(ready);
        fired
    }

    /// Called from the 1 Hz control-thread maintenance tick. Drives the
    /// `inactive`/`waiting_for_data` edge of the state machine.
    ///
    /// Returns the new state if it changed.
    pub fn tick_maintenance(&self, now_ns: u64) -> Option<StreamState> {
        let state = self.state();
        if matches!(state, StreamState::Idle) {
            return None;
        }
        let last = self.last_packet_ns.load(Ordering::Relaxed);
        if last != 0 && now_ns.saturating_sub(last) >= INACTIVITY_TIMEOUT_NS && state != StreamState::Inactive {
            return self.set_state(StreamState::Inactive).then_some(StreamState::Inactive);
        }
        None
    }

    /// Called on the first packet observed after an `inactive` period
    /// or at startup.
    pub fn mark_active_on_new_packet(&self) -> Option<StreamState> {
        if self.state() == StreamState::Inactive {
            return self.set_state(StreamState::WaitingForData).then_some(StreamState::WaitingForData);
        }
        None
    }

    pub fn stats_snapshot(&self) -> StatisticsSnapshot {
        self.too_late.drain();
        let stats = self.stats.lock();
        let ema = self.ema.lock();
        StatisticsSnapshot {
            received: stats.received,
            lost: stats.lost,
            reordered: stats.reordered,
            duplicate: stats.duplicate,
            late: self.too_late.late.load(Ordering::Relaxed),
            interval_ema_ms: ema.ema_ms(),
            interval_max_deviation_ms: ema.max_deviation_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        Stream {
            session: Session::new(Ipv4Addr::new(239, 1, 2, 3), 5004, 5005),
            filter: Filter::new(Ipv4Addr::new(239, 1, 2, 3)),
            rank: Rank::PRIMARY,
            packet_time_frames: 48,
        }
    }

    fn packet(ts: u32, seq: u16) -> IntermediatePacket {
        IntermediatePacket {
            timestamp: WrappingU32::new(ts),
            seq,
            packet_time_frames: 48,
            data: Bytes::from_static(&[0u8; 4]),
        }
    }

    #[test]
    fn filter_include_matches_configured_source_only() {
        let f = Filter {
            dst: Ipv4Addr::new(239, 1, 2, 3),
            src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            mode: FilterMode::Include,
        };
        assert!(f.matches(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(239, 1, 2, 3)));
        assert!(!f.matches(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(239, 1, 2, 3)));
    }

    #[test]
    fn filter_exclude_matches_everything_but_configured_source() {
        let f = Filter {
            dst: Ipv4Addr::new(239, 1, 2, 3),
            src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            mode: FilterMode::Exclude,
        };
        assert!(!f.matches(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(239, 1, 2, 3)));
        assert!(f.matches(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(239, 1, 2, 3)));
    }

    #[test]
    fn enqueue_transitions_idle_to_ok_via_enable() {
        let ctx = StreamContext::new(stream(), 4);
        assert_eq!(ctx.state(), StreamState::Idle);
        ctx.enable();
        assert_eq!(ctx.state(), StreamState::WaitingForData);

        let (accepted, changed) = ctx.enqueue(packet(0, 0), 1);
        assert!(accepted);
        assert_eq!(changed, Some(StreamState::Ok));
        assert_eq!(ctx.state(), StreamState::Ok);
    }

    #[test]
    fn overflow_transitions_to_ok_no_consumer() {
        let ctx = StreamContext::new(stream(), 1);
        ctx.enable();
        ctx.enqueue(packet(0, 0), 1);
        let (accepted, changed) = ctx.enqueue(packet(48, 1), 2);
        assert!(!accepted);
        assert_eq!(changed, Some(StreamState::OkNoConsumer));
    }

    #[test]
    fn maintenance_tick_marks_inactive_after_timeout() {
        let ctx = StreamContext::new(stream(), 4);
        ctx.enable();
        ctx.enqueue(packet(0, 0), 1_000);
        let changed = ctx.tick_maintenance(1_000 + INACTIVITY_TIMEOUT_NS + 1);
        assert_eq!(changed, Some(StreamState::Inactive));
    }

    #[test]
    fn new_packet_after_inactive_moves_to_waiting_for_data() {
        let ctx = StreamContext::new(stream(), 4);
        ctx.enable();
        ctx.enqueue(packet(0, 0), 1_000);
        ctx.tick_maintenance(1_000 + INACTIVITY_TIMEOUT_NS + 1);
        assert_eq!(ctx.state(), StreamState::Inactive);
        assert_eq!(ctx.mark_active_on_new_packet(), Some(StreamState::WaitingForData));
    }

    #[test]
    fn record_packet_updates_statistics() {
        let ctx = StreamContext::new(stream(), 4);
        ctx.record_packet(100);
        ctx.record_packet(101);
        ctx.record_packet(103);
        let snap = ctx.stats_snapshot();
        assert_eq!(snap.received, 3);
        assert_eq!(snap.lost, 1);
    }
}
