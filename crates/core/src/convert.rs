//! Converts staged wire-format PCM into planar `f32` for a client
//! `AudioBufferView`, and back (spec §4.9 "Audio conversion", §8 round
//! trip). 24-bit samples use the 2^23 fixed-point scale factor named in
//! spec §8; 16/32-bit integer samples use 2^15/2^31.

use crate::format::{AudioFormat, ByteOrder, Encoding, SampleOrdering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertError {
    /// Caller supplied a different channel count than `format.num_channels`.
    ChannelCountMismatch,
    /// Caller's expected byte order doesn't match the format being converted.
    ByteOrderMismatch,
    /// Input/output buffer too small for `num_frames`.
    BufferTooShort,
}

fn read_sample(raw: &[u8], encoding: Encoding, byte_order: ByteOrder) -> f32 {
    match encoding {
        Encoding::PcmS16 => {
            let bytes = [raw[0], raw[1]];
            let v = match byte_order {
                ByteOrder::Big => i16::from_be_bytes(bytes),
                ByteOrder::Little => i16::from_le_bytes(bytes),
            };
            v as f32 / 32_768.0
        }
        Encoding::PcmS24 => {
            let (b0, b1, b2) = match byte_order {
                ByteOrder::Big => (raw[0], raw[1], raw[2]),
                ByteOrder::Little => (raw[2], raw[1], raw[0]),
            };
            let mut v = ((b0 as i32) << 16) | ((b1 as i32) << 8) | (b2 as i32);
            if v & 0x0080_0000 != 0 {
                v |= !0x00ff_ffffu32 as i32;
            }
            v as f32 / 8_388_608.0
        }
        Encoding::PcmS32 => {
            let bytes = [raw[0], raw[1], raw[2], raw[3]];
            let v = match byte_order {
                ByteOrder::Big => i32::from_be_bytes(bytes),
                ByteOrder::Little => i32::from_le_bytes(bytes),
            };
            v as f32 / 2_147_483_648.0
        }
        Encoding::PcmF32 => {
            let bytes = [raw[0], raw[1], raw[2], raw[3]];
            match byte_order {
                ByteOrder::Big => f32::from_be_bytes(bytes),
                ByteOrder::Little => f32::from_le_bytes(bytes),
            }
        }
    }
}

fn write_sample(value: f32, encoding: Encoding, byte_order: ByteOrder, out: &mut [u8]) {
    match encoding {
        Encoding::PcmS16 => {
            let v = (value * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            let bytes = match byte_order {
                ByteOrder::Big => v.to_be_bytes(),
                ByteOrder::Little => v.to_le_bytes(),
            };
            out[..2].copy_from_slice(&bytes);
        }
        Encoding::PcmS24 => {
            let v = (value * 8_388_608.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
            let be = [(v >> 16) as u8, (v >> 8) as u8, v as u8];
            match byte_order {
                ByteOrder::Big => out[..3].copy_from_slice(&be),
                ByteOrder::Little => out[..3].copy_from_slice(&[be[2], be[1], be[0]]),
            }
        }
        Encoding::PcmS32 => {
            let v = (value as f64 * 2_147_483_648.0).round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            let bytes = match byte_order {
                ByteOrder::Big => v.to_be_bytes(),
                ByteOrder::Little => v.to_le_bytes(),
            };
            out[..4].copy_from_slice(&bytes);
        }
        Encoding::PcmF32 => {
            let bytes = match byte_order {
                ByteOrder::Big => value.to_be_bytes(),
                ByteOrder::Little => value.to_le_bytes(),
            };
            out[..4].copy_from_slice(&bytes);
        }
    }
}

/// Converts `num_frames` frames of `input` (in `format`'s wire layout)
/// into one `f32` slice per channel. `output` must have exactly
/// `format.num_channels` entries, each at least `num_frames` long.
#[allow(clippy::needless_range_loop)]
pub fn to_planar_f32(
    format: &AudioFormat,
    expected_byte_order: ByteOrder,
    input: &[u8],
    num_frames: usize,
    output: &mut [&mut [f32]],
) -> Result<(), ConvertError> {
    if format.byte_order != expected_byte_order {
        return Err(ConvertError::ByteOrderMismatch);
    }
    if output.len() != format.num_channels as usize {
        return Err(ConvertError::ChannelCountMismatch);
    }
    let bytes_per_sample = format.encoding.bytes_per_sample();
    let bytes_per_frame = format.bytes_per_frame();
    if input.len() < num_frames * bytes_per_frame || output.iter().any(|ch| ch.len() < num_frames) {
        return Err(ConvertError::BufferTooShort);
    }

    for frame in 0..num_frames {
        for ch in 0..format.num_channels as usize {
            let offset = match format.ordering {
                SampleOrdering::Interleaved => frame * bytes_per_frame + ch * bytes_per_sample,
                SampleOrdering::Planar => ch * num_frames * bytes_per_sample + frame * bytes_per_sample,
            };
            output[ch][frame] = read_sample(&input[offset..], format.encoding, format.byte_order);
        }
    }
    Ok(())
}

/// Inverse of [`to_planar_f32`]: packs planar `f32` channels back into
/// `format`'s wire layout.
#[allow(clippy::needless_range_loop)]
pub fn from_planar_f32(
    format: &AudioFormat,
    expected_byte_order: ByteOrder,
    input: &[&[f32]],
    num_frames: usize,
    output: &mut [u8],
) -> Result<(), ConvertError> {
    if format.byte_order != expected_byte_order {
        return Err(ConvertError::ByteOrderMismatch);
    }
    if input.len() != format.num_channels as usize {
        return Err(ConvertError::ChannelCountMismatch);
    }
    let bytes_per_sample = format.encoding.bytes_per_sample();
    let bytes_per_frame = format.bytes_per_frame();
    if output.len() < num_frames * bytes_per_frame || input.iter().any(|ch| ch.len() < num_frames) {
        return Err(ConvertError::BufferTooShort);
    }

    for frame in 0..num_frames {
        for ch in 0..format.num_channels as usize {
            let offset = match format.ordering {
                SampleOrdering::Interleaved => frame * bytes_per_frame + ch * bytes_per_sample,
                SampleOrdering::Planar => ch * num_frames * bytes_per_sample + frame * bytes_per_sample,
            };
            write_sample(input[ch][frame], format.encoding, format.byte_order, &mut output[offset..]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s24_format() -> AudioFormat {
        AudioFormat {
            encoding: Encoding::PcmS24,
            byte_order: ByteOrder::Big,
            ordering: SampleOrdering::Interleaved,
            sample_rate: 48_000,
            num_channels: 2,
        }
    }

    #[test]
    fn pcm_s24_be_interleaved_round_trips_losslessly() {
        let format = s24_format();
        let raw: [u8; 6] = [0x12, 0x34, 0x56, 0xfe, 0xdc, 0xba];

        let mut ch0 = vec![0f32; 1];
        let mut ch1 = vec![0f32; 1];
        {
            let mut output: [&mut [f32]; 2] = [&mut ch0, &mut ch1];
            to_planar_f32(&format, ByteOrder::Big, &raw, 1, &mut output).unwrap();
        }

        let mut back = [0u8; 6];
        from_planar_f32(&format, ByteOrder::Big, &[&ch0, &ch1], 1, &mut back).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let format = s24_format();
        let raw = [0u8; 6];
        let mut ch0 = vec![0f32; 1];
        let mut output: [&mut [f32]; 1] = [&mut ch0];
        let err = to_planar_f32(&format, ByteOrder::Big, &raw, 1, &mut output).unwrap_err();
        assert_eq!(err, ConvertError::ChannelCountMismatch);
    }

    #[test]
    fn byte_order_mismatch_is_rejected() {
        let format = s24_format();
        let raw = [0u8; 6];
        let mut ch0 = vec![0f32; 1];
        let mut ch1 = vec![0f32; 1];
        let mut output: [&mut [f32]; 2] = [&mut ch0, &mut ch1];
        let err = to_planar_f32(&format, ByteOrder::Little, &raw, 1, &mut output).unwrap_err();
        assert_eq!(err, ConvertError::ByteOrderMismatch);
    }

    #[test]
    fn planar_ordering_reads_channel_major_layout() {
        let format = AudioFormat {
            encoding: Encoding::PcmS16,
            byte_order: ByteOrder::Little,
            ordering: SampleOrdering::Planar,
            sample_rate: 48_000,
            num_channels: 2,
        };
        // ch0 = [1, 2], ch1 = [3, 4] as i16 LE
        let raw: Vec<u8> = [1i16, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut ch0 = vec![0f32; 2];
        let mut ch1 = vec![0f32; 2];
        {
            let mut output: [&mut [f32]; 2] = [&mut ch0, &mut ch1];
            to_planar_f32(&format, ByteOrder::Little, &raw, 2, &mut output).unwrap();
        }
        assert_eq!(ch0[1], 2.0 / 32_768.0);
        assert_eq!(ch1[0], 3.0 / 32_768.0);
    }
}
