//! Real-time RTP receive pipeline: wrap-safe sequence/timestamp
//! arithmetic, a timestamp-indexed reconstruction ring, lock-free FIFOs,
//! a triple-buffered configuration cell, the multicast socket
//! multiplexer, and the `AudioReceiver` that ties them together.
//!
//! Everything under `rt_state`/FIFO/ring access follows one rule: a
//! single real-time thread owns the read side, the network thread owns
//! the write side, and the control thread only ever swaps whole
//! snapshots. No lock is ever taken on the audio callback's hot path.

pub mod convert;
pub mod error;
pub mod fifo;
pub mod format;
pub mod multiplexer;
pub mod platform;
pub mod queue;
pub mod receiver;
pub mod ring;
pub mod stats;
pub mod stream;
pub mod triple_buffer;
pub mod wrapping;

pub use convert::{from_planar_f32, to_planar_f32, ConvertError};
pub use error::{ReceiverError, SocketError};
pub use format::{AudioFormat, ByteOrder, Encoding, PacketTime, SampleOrdering};
pub use multiplexer::{DatagramSink, Multiplexer, SocketKey};
pub use receiver::{AudioReceiver, Parameters, SharedContext};
pub use ring::ReconstructionRing;
pub use stats::{IntervalEma, SequenceStats, StatisticsSnapshot, TooLateTracker};
pub use stream::{
    Filter, FilterMode, IntermediatePacket, Rank, Session, Stream, StreamContext, StreamState,
    INACTIVITY_TIMEOUT_NS,
};
pub use triple_buffer::{RealtimeGuard, Retired, TripleBuffer};
pub use wrapping::{MonotonicTracker, SequenceEvent, WrappingU16, WrappingU32};
