//! Zero-copy RTP/RTCP packet views.
//!
//! Every type in this crate is a thin, non-owning accessor over a byte
//! slice: construction never copies, and every field accessor returns a
//! defined default (zero, `false`, or an empty view) for any input
//! length rather than reading out of bounds. `validate()` classifies the
//! buffer; it is not a precondition for calling the accessors, only for
//! trusting what they return.
//!
//! [RFC 3550]: https://datatracker.ietf.org/doc/html/rfc3550

pub mod byte_order;
pub mod error;
pub mod ntp;
pub mod rtcp;
pub mod rtp;
pub mod view;

pub use error::VerificationResult;
pub use ntp::NtpTimestamp;
pub use rtcp::{PacketType, RtcpReportBlockView, RtcpView};
pub use rtp::RtpView;
pub use view::{VectorStream, View};
