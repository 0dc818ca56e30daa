//! RavennaKit: a toolkit for receiving professional uncompressed audio
//! over IP (RAVENNA / AES67).
//!
//! This crate re-exports the zero-copy packet views from [`view`] and
//! the real-time receive pipeline from [`ravennakit_core`], and is the
//! public face for `AudioFormat`, `PacketTime`, and the NTP timestamp
//! type.
//!
//! Out of scope (host application's responsibility): PTP clock sync,
//! SDP/RTSP/NMOS discovery, audio resampling, and logger initialization
//! — this crate only calls into the `log` facade, never configures one.

pub use ravennakit_core::{
    convert, error, fifo, format, multiplexer, platform, queue, receiver, ring, stats, stream,
    triple_buffer, wrapping, AudioFormat, AudioReceiver, ByteOrder, ConvertError, DatagramSink,
    Encoding, Filter, FilterMode, IntermediatePacket, MonotonicTracker, Multiplexer, PacketTime,
    Parameters, Rank, RealtimeGuard, ReceiverError, ReconstructionRing, Retired, SampleOrdering,
    SequenceEvent, SequenceStats, Session, SharedContext, SocketError, SocketKey,
    StatisticsSnapshot, Stream, StreamContext, StreamState, TooLateTracker, TripleBuffer,
    WrappingU16, WrappingU32, INACTIVITY_TIMEOUT_NS,
};
pub use view::{NtpTimestamp, PacketType, RtcpReportBlockView, RtcpView, RtpView, VerificationResult, VectorStream, View};
