//! `AudioFormat` and packet-time arithmetic (spec §3, §6).
//!
//! Lives in `crates/core` (not the root crate) because the
//! reconstruction ring and RT read path need `bytes_per_frame` to size
//! buffers; the root crate re-exports these names as its public face.

/// Sample encoding. All are big-endian on the wire for AES67
/// interoperability; `byte_order` on [`AudioFormat`] records what the
/// *host-side* staging buffer uses, which may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Encoding {
    PcmS16,
    PcmS24,
    PcmS32,
    PcmF32,
}

impl Encoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Encoding::PcmS16 => 2,
            Encoding::PcmS24 => 3,
            Encoding::PcmS32 | Encoding::PcmF32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleOrdering {
    Interleaved,
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
    pub ordering: SampleOrdering,
    pub sample_rate: u32,
    pub num_channels: u16,
}

impl AudioFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.encoding.bytes_per_sample() * self.num_channels as usize
    }
}

/// One of the AES67 §7.2 packet times, as a rational number of
/// milliseconds (`numerator / denominator`). `125 µs` is `1/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PacketTime {
    pub numerator: u32,
    pub denominator: u32,
}

impl PacketTime {
    pub const US_125: PacketTime = PacketTime { numerator: 1, denominator: 8 };
    pub const US_250: PacketTime = PacketTime { numerator: 1, denominator: 4 };
    pub const US_333: PacketTime = PacketTime { numerator: 1, denominator: 3 };
    pub const MS_1: PacketTime = PacketTime { numerator: 1, denominator: 1 };
    pub const MS_4: PacketTime = PacketTime { numerator: 4, denominator: 1 };

    pub const ALL: [PacketTime; 5] = [
        Self::US_125,
        Self::US_250,
        Self::US_333,
        Self::MS_1,
        Self::MS_4,
    ];

    pub fn as_ms(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// For non-48kHz-family sample rates the signaled packet time
    /// scales by `ceil(sample_rate / 48000)` so the resulting frame
    /// count stays integral.
    pub fn scale_factor(sample_rate: u32) -> u32 {
        sample_rate.div_ceil(48_000).max(1)
    }

    /// `round(pt_ms * sample_rate / 1000)`, scaled per
    /// [`Self::scale_factor`] for non-48kHz-family rates.
    pub fn framecount(self, sample_rate: u32) -> u32 {
        let scale = Self::scale_factor(sample_rate);
        let exact = self.as_ms() * sample_rate as f64 * scale as f64 / 1000.0;
        exact.round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_frame_matches_encoding_and_channels() {
        let fmt = AudioFormat {
            encoding: Encoding::PcmS24,
            byte_order: ByteOrder::Big,
            ordering: SampleOrdering::Interleaved,
            sample_rate: 48_000,
            num_channels: 2,
        };
        assert_eq!(fmt.bytes_per_frame(), 6);
    }

    #[test]
    fn framecount_1ms_at_48khz_is_48_frames() {
        assert_eq!(PacketTime::MS_1.framecount(48_000), 48);
    }

    #[test]
    fn framecount_125us_at_48khz_is_6_frames() {
        assert_eq!(PacketTime::US_125.framecount(48_000), 6);
    }

    #[test]
    fn framecount_scales_for_non_48k_family_rates() {
        // 44.1kHz needs ceil(44100/48000) = 1, so 1ms -> 44 frames (rounded).
        assert_eq!(PacketTime::MS_1.framecount(44_100), 44);
        // 96kHz needs ceil(96000/48000) = 2; 1ms packet time represents
        // 2 underlying "48kHz-equivalent" packets worth of frames.
        assert_eq!(PacketTime::MS_1.framecount(96_000), 192);
    }
}
