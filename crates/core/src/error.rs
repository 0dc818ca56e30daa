//! Closed, non-allocating error enums for the control-path APIs.
//!
//! Real-time paths never surface these: a dropped packet or a full FIFO
//! sets a counter and a stream state, it does not return an error.

/// Kernel socket errors, collapsed to the distinctions the reactor
/// actually acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// The read was cancelled by the caller (shutdown). Silent.
    Aborted,
    /// The peer is gone / the socket is closed. Silent.
    Eof,
    /// Anything else: logged, and the socket is closed.
    Other,
}

impl SocketError {
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted => SocketError::Aborted,
            ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => SocketError::Eof,
            _ => SocketError::Other,
        }
    }

    pub fn is_silent(self) -> bool {
        matches!(self, SocketError::Aborted | SocketError::Eof)
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for SocketError {}

/// Errors returned by the `AudioReceiver` control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverError {
    InvalidInterface,
    NoSlotAvailable,
    ParametersUnchanged,
    BufferTooSmall,
}

impl std::fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ReceiverError::InvalidInterface => "interface address does not resolve to a local adapter",
            ReceiverError::NoSlotAvailable => "no free reader or socket slot",
            ReceiverError::ParametersUnchanged => "set_parameters called with no field changed",
            ReceiverError::BufferTooSmall => "staging buffer too small for the requested read",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ReceiverError {}
