//! `AudioReceiver` orchestration (spec §4.9): subscribes to one or more
//! [`Stream`]s, routes incoming RTP packets into per-stream FIFOs, and
//! serves the RT audio thread's fixed-size frame reads out of a shared
//! reconstruction ring.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use view::RtpView;

use crate::error::ReceiverError;
use crate::format::AudioFormat;
use crate::multiplexer::{DatagramSink, Multiplexer};
use crate::ring::ReconstructionRing;
use crate::stream::{IntermediatePacket, Stream, StreamContext, StreamState};
use crate::triple_buffer::TripleBuffer;
use crate::wrapping::{SequenceEvent, WrappingU32};

/// Argument to [`AudioReceiver::set_parameters`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameters {
    pub format: AudioFormat,
    pub streams: Vec<Stream>,
    pub delay_frames: u32,
    /// Ring capacity is `max(packet_time_frames) * buffer_ms / 1000`.
    pub buffer_ms: u32,
}

/// Immutable snapshot published to the RT thread (spec §3 "SharedContext").
///
/// `rt_state` is only ever touched by the single RT reader thread; the
/// `UnsafeCell` is sound under that single-reader discipline, the same
/// way the reconstruction ring and staging buffer are documented to be
/// RT-thread-only in spec §5.
pub struct SharedContext {
    pub format: AudioFormat,
    pub delay_frames: AtomicU32,
    pub stream_contexts: Vec<Arc<StreamContext>>,
    rt_state: std::cell::UnsafeCell<RtState>,
    staging_capacity_bytes: usize,
}

// SAFETY: `rt_state` is accessed only from `read_data_realtime`, which
// by contract (spec §5) runs on a single dedicated RT thread. Multiple
// `Arc<SharedContext>` clones (one per `RealtimeGuard`, one retired)
// may exist, but only the RT thread ever dereferences the cell.
unsafe impl Sync for SharedContext {}

struct RtState {
    ring: ReconstructionRing,
    next_read_ts: Option<WrappingU32>,
    staging: Vec<u8>,
}

impl SharedContext {
    fn new(format: AudioFormat, delay_frames: u32, capacity_frames: u32, stream_contexts: Vec<Arc<StreamContext>>, max_read_frames: usize) -> Self {
        let bytes_per_frame = format.bytes_per_frame();
        Self {
            format,
            delay_frames: AtomicU32::new(delay_frames),
            stream_contexts,
            rt_state: std::cell::UnsafeCell::new(RtState {
                ring: ReconstructionRing::new(capacity_frames, bytes_per_frame, 0),
                next_read_ts: None,
                staging: vec![0u8; max_read_frames * bytes_per_frame],
            }),
            staging_capacity_bytes: max_read_frames * bytes_per_frame,
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn rt_state(&self) -> &mut RtState {
        // SAFETY: see the `Sync` impl above — single RT-thread caller only.
        unsafe { &mut *self.rt_state.get() }
    }
}

type OnDataReceived = Box<dyn Fn(u32) + Send + Sync>;
type OnDataReady = Box<dyn Fn(u32) + Send + Sync>;
type OnStateChanged = Box<dyn Fn(Stream, StreamState) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_data_received: Option<OnDataReceived>,
    on_data_ready: Option<OnDataReady>,
    on_state_changed: Option<OnStateChanged>,
}

struct Inner {
    id: u64,
    multiplexer: Option<Arc<Multiplexer>>,
    shared: TripleBuffer<SharedContext>,
    streams: Mutex<Vec<Stream>>,
    interfaces: Mutex<Vec<Ipv4Addr>>,
    enabled: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

/// A single audio receiver: owns one reconstruction ring and one or
/// more [`StreamContext`]s, one per subscribed [`Stream`].
#[derive(Clone)]
pub struct AudioReceiver {
    inner: Arc<Inner>,
}

const DEFAULT_FIFO_CAPACITY: usize = 256;
const DEFAULT_MAX_READ_FRAMES: usize = 4096;

impl AudioReceiver {
    pub fn new(id: u64, multiplexer: Option<Arc<Multiplexer>>) -> Self {
        let empty = SharedContext::new(
            AudioFormat {
                encoding: crate::format::Encoding::PcmS24,
                byte_order: crate::format::ByteOrder::Big,
                ordering: crate::format::SampleOrdering::Interleaved,
                sample_rate: 48_000,
                num_channels: 2,
            },
            0,
            1,
            Vec::new(),
            DEFAULT_MAX_READ_FRAMES,
        );
        Self {
            inner: Arc::new(Inner {
                id,
                multiplexer,
                shared: TripleBuffer::new(empty),
                streams: Mutex::new(Vec::new()),
                interfaces: Mutex::new(Vec::new()),
                enabled: AtomicBool::new(false),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        }
    }

    pub fn on_data_received(&self, f: impl Fn(u32) + Send + Sync + 'static) {
        self.inner.callbacks.lock().on_data_received = Some(Box::new(f));
    }

    pub fn on_data_ready(&self, f: impl Fn(u32) + Send + Sync + 'static) {
        self.inner.callbacks.lock().on_data_ready = Some(Box::new(f));
    }

    pub fn on_state_changed(&self, f: impl Fn(Stream, StreamState) + Send + Sync + 'static) {
        self.inner.callbacks.lock().on_state_changed = Some(Box::new(f));
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::AcqRel);
        if was == enabled {
            return;
        }
        let streams = self.inner.streams.lock().clone();
        let interfaces = self.inner.interfaces.lock().clone();
        let guard = self.inner.shared.lock_realtime();
        if enabled {
            for ctx in &guard.stream_contexts {
                ctx.enable();
            }
            self.register_sockets(&streams, &interfaces, &guard.stream_contexts);
        } else {
            self.unregister_sockets(&streams, &interfaces);
            for ctx in &guard.stream_contexts {
                ctx.disable();
            }
        }
    }

    pub fn set_delay_frames(&self, delay_frames: u32) {
        self.inner.shared.lock_realtime().delay_frames.store(delay_frames, Ordering::Relaxed);
    }

    /// Applies a new parameter set: builds a fresh [`SharedContext`],
    /// publishes it atomically, schedules the previous one for
    /// reclamation, and reconciles socket/multicast membership.
    /// Returns `Err(ParametersUnchanged)` if nothing differs from the
    /// currently active parameters.
    pub fn set_parameters(&self, params: Parameters) -> Result<(), ReceiverError> {
        {
            let current = self.inner.shared.lock_realtime();
            let current_streams = self.inner.streams.lock();
            if current.format == params.format
                && current.delay_frames.load(Ordering::Relaxed) == params.delay_frames
                && *current_streams == params.streams
            {
                return Err(ReceiverError::ParametersUnchanged);
            }
        }

        let max_packet_time = params.streams.iter().map(|s| s.packet_time_frames as u32).max().unwrap_or(1);
        // Ring capacity holds `buffer_ms` of audio at the format's sample
        // rate, never smaller than one packet's worth of frames.
        let capacity_frames = ((params.format.sample_rate as u64 * params.buffer_ms as u64 / 1000) as u32).max(max_packet_time);

        let new_contexts: Vec<Arc<StreamContext>> = params
            .streams
            .iter()
            .map(|s| Arc::new(StreamContext::new(*s, DEFAULT_FIFO_CAPACITY)))
            .collect();

        let new_shared = SharedContext::new(
            params.format,
            params.delay_frames,
            capacity_frames,
            new_contexts.clone(),
            DEFAULT_MAX_READ_FRAMES,
        );

        let old_streams = std::mem::replace(&mut *self.inner.streams.lock(), params.streams.clone());
        let interfaces = self.inner.interfaces.lock().clone();

        if self.inner.enabled.load(Ordering::Acquire) {
            for ctx in &new_contexts {
                ctx.enable();
            }
            self.unregister_sockets(&old_streams, &interfaces);
            self.register_sockets(&params.streams, &interfaces, &new_contexts);
        }

        let retired = self.inner.shared.update(new_shared);
        self.inner.shared.schedule_reclaim(retired);
        Ok(())
    }

    /// Reconciles interface membership: leaves groups no longer routed,
    /// then joins groups newly routed, per spec §4.7 Lifecycle.
    pub fn set_interfaces(&self, new_interfaces: Vec<Ipv4Addr>) {
        let mut interfaces = self.inner.interfaces.lock();
        let old = interfaces.clone();
        if old == new_interfaces {
            return;
        }

        if self.inner.enabled.load(Ordering::Acquire) {
            let streams = self.inner.streams.lock().clone();
            let guard = self.inner.shared.lock_realtime();
            let removed: Vec<_> = old.iter().filter(|i| !new_interfaces.contains(i)).copied().collect();
            let added: Vec<_> = new_interfaces.iter().filter(|i| !old.contains(i)).copied().collect();
            self.unregister_sockets(&streams, &removed);
            self.register_sockets(&streams, &added, &guard.stream_contexts);
        }
        *interfaces = new_interfaces;
    }

    fn register_sockets(&self, streams: &[Stream], interfaces: &[Ipv4Addr], contexts: &[Arc<StreamContext>]) {
        let Some(mux) = &self.inner.multiplexer else { return };
        for (stream, ctx) in streams.iter().zip(contexts.iter()) {
            for iface in interfaces {
                let sink: Arc<dyn DatagramSink> = Arc::new(StreamSink {
                    receiver: self.inner.clone(),
                    ctx: ctx.clone(),
                });
                if let Err(e) = mux.register(self.inner.id, *iface, stream.session, stream.filter, sink) {
                    log::error!("ravennakit: failed to register stream socket: {e}");
                }
            }
        }
    }

    fn unregister_sockets(&self, streams: &[Stream], interfaces: &[Ipv4Addr]) {
        let Some(mux) = &self.inner.multiplexer else { return };
        for stream in streams {
            for iface in interfaces {
                if let Err(e) = mux.unregister(self.inner.id, *iface, stream.session) {
                    log::error!("ravennakit: failed to unregister stream socket: {e}");
                }
            }
        }
    }

    /// Low-frequency (1 Hz) control-thread maintenance: reclaims
    /// retired [`SharedContext`]s and transitions stale streams to
    /// `Inactive`.
    pub fn maintenance_tick(&self, now_ns: u64) {
        self.inner.shared.reclaim();
        let guard = self.inner.shared.lock_realtime();
        for ctx in &guard.stream_contexts {
            if let Some(new_state) = ctx.tick_maintenance(now_ns) {
                self.fire_state_changed(ctx.stream, new_state);
            }
        }
    }

    fn fire_state_changed(&self, stream: Stream, state: StreamState) {
        if let Some(cb) = &self.inner.callbacks.lock().on_state_changed {
            cb(stream, state);
        }
    }

    /// RT audio thread entry point. Drains every stream's FIFO into the
    /// shared ring, then copies `len_bytes` out starting at the current
    /// (or caller-supplied) read timestamp.
    ///
    /// Returns the timestamp actually read, or `None` if no
    /// configuration has been published yet or the request exceeds the
    /// staging buffer.
    pub fn read_data_realtime(&self, out: &mut [u8], len_bytes: usize, at_ts: Option<u32>) -> Option<u32> {
        let guard = self.inner.shared.lock_realtime();
        if len_bytes > guard.staging_capacity_bytes {
            return None;
        }

        let bytes_per_frame = guard.format.bytes_per_frame();
        let delay_frames = guard.delay_frames.load(Ordering::Relaxed);
        let state = guard.rt_state();

        for ctx in &guard.stream_contexts {
            while let Some(packet) = ctx.pop() {
                if state.next_read_ts.is_none() {
                    state.ring.set_next_ts(packet.timestamp);
                    state.next_read_ts = Some(packet.timestamp.wrapping_add(0u32.wrapping_sub(delay_frames)));
                }
                let next_read_ts = state.next_read_ts.expect("just set");

                let n_frames = (packet.data.len() / bytes_per_frame) as u32;
                let packet_end = packet.timestamp.wrapping_add(n_frames);
                let fully_late = packet_end.diff(next_read_ts) <= 0;
                if fully_late {
                    ctx.report_late(packet.seq);
                    continue;
                }
                if packet.timestamp.diff(next_read_ts) < 0 {
                    ctx.report_late(packet.seq);
                }

                state.ring.clear_until(packet.timestamp);
                state.ring.write(packet.timestamp, &packet.data);
            }
        }

        if let Some(ts) = at_ts {
            state.next_read_ts = Some(WrappingU32::new(ts));
        }

        let next_read_ts = state.next_read_ts?;
        state.ring.read(next_read_ts, &mut state.staging[..len_bytes], len_bytes, true);
        out[..len_bytes].copy_from_slice(&state.staging[..len_bytes]);

        let frames = (len_bytes / bytes_per_frame) as u32;
        state.next_read_ts = Some(next_read_ts.wrapping_add(frames));

        Some(next_read_ts.get())
    }
}

/// Bridges the multiplexer's datagram dispatch into one stream's RTP
/// parsing and FIFO push (spec §4.9 "RT packet path (network thread)").
struct StreamSink {
    receiver: Arc<Inner>,
    ctx: Arc<StreamContext>,
}

impl DatagramSink for StreamSink {
    fn accept(&self, _src: Ipv4Addr, _dst: Ipv4Addr, t_ns: u64, data: &[u8]) {
        let rtp = RtpView::new(data);
        if !rtp.validate().is_ok() {
            self.ctx.record_parse_error();
            return;
        }

        let payload = rtp.payload_data();
        if payload.is_empty() || payload.len() > u16::MAX as usize {
            self.ctx.record_parse_error();
            return;
        }

        if let Some(new_state) = self.ctx.mark_active_on_new_packet() {
            if let Some(cb) = &self.receiver.callbacks.lock().on_state_changed {
                cb(self.ctx.stream, new_state);
            }
        }

        let seq = rtp.sequence_number();
        let ts = rtp.timestamp();

        self.ctx.observe_arrival(t_ns);
        let event = self.ctx.record_packet(seq);

        // Duplicates and reordered packets don't advance the sequence —
        // only a newly-observed one (in order, or after a gap) fires
        // the data-received/data-ready callbacks.
        if !matches!(event, SequenceEvent::Duplicate | SequenceEvent::Reordered) {
            let delay_frames = self.receiver.shared.lock_realtime().delay_frames.load(Ordering::Relaxed);
            let ready_timestamps = self.ctx.advance_ready_timestamps(WrappingU32::new(ts), delay_frames, self.ctx.stream.packet_time_frames);

            let callbacks = self.receiver.callbacks.lock();
            if let Some(cb) = &callbacks.on_data_received {
                cb(ts);
            }
            if let Some(cb) = &callbacks.on_data_ready {
                for ready_ts in &ready_timestamps {
                    cb(*ready_ts);
                }
            }
            drop(callbacks);
        }

        let packet = IntermediatePacket {
            timestamp: WrappingU32::new(ts),
            seq,
            packet_time_frames: self.ctx.stream.packet_time_frames,
            data: Bytes::copy_from_slice(payload.as_slice()),
        };

        let (_, changed) = self.ctx.enqueue(packet, t_ns);
        if let Some(new_state) = changed {
            if let Some(cb) = &self.receiver.callbacks.lock().on_state_changed {
                cb(self.ctx.stream, new_state);
            }
        }
    }
}
