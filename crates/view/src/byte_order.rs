//! Endian-aware reads and writes over raw byte slices.
//!
//! Every function here copies bytes rather than casting a pointer, so
//! callers never trip strict-aliasing or unaligned-access rules on
//! architectures that care (the original C++ used the same `memcpy`-based
//! approach for that reason).

/// Types that can be read from and written to a big/little/native-endian
/// byte representation of a fixed width.
pub trait Endian: Sized + Copy {
    const WIDTH: usize;

    fn from_be_bytes_slice(bytes: &[u8]) -> Self;
    fn from_le_bytes_slice(bytes: &[u8]) -> Self;
    fn to_be_bytes_vec(self) -> Vec<u8>;
    fn to_le_bytes_vec(self) -> Vec<u8>;
}

macro_rules! impl_endian {
    ($ty:ty, $width:expr) => {
        impl Endian for $ty {
            const WIDTH: usize = $width;

            fn from_be_bytes_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$ty>::from_be_bytes(buf)
            }

            fn from_le_bytes_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$ty>::from_le_bytes(buf)
            }

            fn to_be_bytes_vec(self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }

            fn to_le_bytes_vec(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
        }
    };
}

impl_endian!(u16, 2);
impl_endian!(u32, 4);
impl_endian!(u64, 8);
impl_endian!(f32, 4);
impl_endian!(f64, 8);

/// Reads a big-endian `T` from the start of `bytes`.
///
/// # Panics
///
/// Panics if `bytes` is shorter than `T::WIDTH`. Packet-view accessors
/// never call this directly on untrusted lengths; they check first and
/// fall back to a default.
pub fn read_be<T: Endian>(bytes: &[u8]) -> T {
    T::from_be_bytes_slice(bytes)
}

/// Reads a little-endian `T` from the start of `bytes`.
pub fn read_le<T: Endian>(bytes: &[u8]) -> T {
    T::from_le_bytes_slice(bytes)
}

/// Reads a native-endian `T` from the start of `bytes`.
#[cfg(target_endian = "little")]
pub fn read_ne<T: Endian>(bytes: &[u8]) -> T {
    read_le(bytes)
}

#[cfg(target_endian = "big")]
pub fn read_ne<T: Endian>(bytes: &[u8]) -> T {
    read_be(bytes)
}

/// Writes `value` as big-endian bytes into `out`, which must be at least
/// `T::WIDTH` long.
pub fn write_be<T: Endian>(out: &mut [u8], value: T) {
    let bytes = value.to_be_bytes_vec();
    out[..bytes.len()].copy_from_slice(&bytes);
}

/// Writes `value` as little-endian bytes into `out`.
pub fn write_le<T: Endian>(out: &mut [u8], value: T) {
    let bytes = value.to_le_bytes_vec();
    out[..bytes.len()].copy_from_slice(&bytes);
}

/// Writes `value` as native-endian bytes into `out`.
#[cfg(target_endian = "little")]
pub fn write_ne<T: Endian>(out: &mut [u8], value: T) {
    write_le(out, value);
}

#[cfg(target_endian = "big")]
pub fn write_ne<T: Endian>(out: &mut [u8], value: T) {
    write_be(out, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_u16_be() {
        let mut buf = [0u8; 2];
        write_be(&mut buf, 0x0123u16);
        assert_eq!(read_be::<u16>(&buf), 0x0123);
    }

    #[test]
    fn round_trip_u16_le() {
        let mut buf = [0u8; 2];
        write_le(&mut buf, 0x0123u16);
        assert_eq!(read_le::<u16>(&buf), 0x0123);
    }

    #[test]
    fn round_trip_u32_be() {
        let mut buf = [0u8; 4];
        write_be(&mut buf, 0xdead_beefu32);
        assert_eq!(read_be::<u32>(&buf), 0xdead_beef);
    }

    #[test]
    fn round_trip_u64_le() {
        let mut buf = [0u8; 8];
        write_le(&mut buf, 0x0102_0304_0506_0708u64);
        assert_eq!(read_le::<u64>(&buf), 0x0102_0304_0506_0708);
    }

    #[test]
    fn round_trip_f32_be() {
        let mut buf = [0u8; 4];
        write_be(&mut buf, 1.5f32);
        assert_eq!(read_be::<f32>(&buf), 1.5f32);
    }

    #[test]
    fn round_trip_f64_ne() {
        let mut buf = [0u8; 8];
        write_ne(&mut buf, 3.25f64);
        assert_eq!(read_ne::<f64>(&buf), 3.25f64);
    }
}
