//! Fixed-width integer codecs.
//!
//! MSP payloads and MSP-log records are little-endian; tlog timestamps are
//! big-endian. Both codecs read from an arbitrary index and return `None`
//! when the buffer is too short instead of panicking, so payload consumers can
//! treat a short message as "not decodable" rather than a crash.
//!
//! # Example
//!
//! ```
//! use flightlink::codec::{BigEndian, LittleEndian};
//!
//! let buf = [0x34, 0x12, 0xFF];
//! assert_eq!(LittleEndian::read_u16(&buf, 0), Some(0x1234));
//! assert_eq!(BigEndian::read_u16(&buf, 0), Some(0x3412));
//! assert_eq!(LittleEndian::read_u16(&buf, 2), None);
//! ```

use bytes::BufMut;

/// Slice `N` bytes starting at `index`, if present.
#[inline]
fn window<const N: usize>(buf: &[u8], index: usize) -> Option<[u8; N]> {
    let end = index.checked_add(N)?;
    buf.get(index..end)?.try_into().ok()
}

/// Little-endian integer codec.
pub struct LittleEndian;

impl LittleEndian {
    #[inline]
    pub fn read_u8(buf: &[u8], index: usize) -> Option<u8> {
        buf.get(index).copied()
    }

    #[inline]
    pub fn read_i8(buf: &[u8], index: usize) -> Option<i8> {
        buf.get(index).map(|&b| b as i8)
    }

    #[inline]
    pub fn read_u16(buf: &[u8], index: usize) -> Option<u16> {
        window(buf, index).map(u16::from_le_bytes)
    }

    #[inline]
    pub fn read_i16(buf: &[u8], index: usize) -> Option<i16> {
        window(buf, index).map(i16::from_le_bytes)
    }

    #[inline]
    pub fn read_u32(buf: &[u8], index: usize) -> Option<u32> {
        window(buf, index).map(u32::from_le_bytes)
    }

    #[inline]
    pub fn read_i32(buf: &[u8], index: usize) -> Option<i32> {
        window(buf, index).map(i32::from_le_bytes)
    }

    #[inline]
    pub fn read_u64(buf: &[u8], index: usize) -> Option<u64> {
        window(buf, index).map(u64::from_le_bytes)
    }

    #[inline]
    pub fn read_f64(buf: &[u8], index: usize) -> Option<f64> {
        window(buf, index).map(f64::from_le_bytes)
    }

    #[inline]
    pub fn write_u16(value: u16) -> [u8; 2] {
        value.to_le_bytes()
    }

    #[inline]
    pub fn write_i16(value: i16) -> [u8; 2] {
        value.to_le_bytes()
    }

    #[inline]
    pub fn write_u32(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }

    #[inline]
    pub fn write_i32(value: i32) -> [u8; 4] {
        value.to_le_bytes()
    }

    /// Append a `u16` to a growable buffer.
    #[inline]
    pub fn put_u16<B: BufMut>(buf: &mut B, value: u16) {
        buf.put_u16_le(value);
    }

    /// Append a `u32` to a growable buffer.
    #[inline]
    pub fn put_u32<B: BufMut>(buf: &mut B, value: u32) {
        buf.put_u32_le(value);
    }

    /// Append an `i32` to a growable buffer.
    #[inline]
    pub fn put_i32<B: BufMut>(buf: &mut B, value: i32) {
        buf.put_i32_le(value);
    }

    /// Append an `f64` to a growable buffer.
    #[inline]
    pub fn put_f64<B: BufMut>(buf: &mut B, value: f64) {
        buf.put_f64_le(value);
    }
}

/// Big-endian integer codec.
pub struct BigEndian;

impl BigEndian {
    #[inline]
    pub fn read_u16(buf: &[u8], index: usize) -> Option<u16> {
        window(buf, index).map(u16::from_be_bytes)
    }

    #[inline]
    pub fn read_u32(buf: &[u8], index: usize) -> Option<u32> {
        window(buf, index).map(u32::from_be_bytes)
    }

    #[inline]
    pub fn read_u64(buf: &[u8], index: usize) -> Option<u64> {
        window(buf, index).map(u64::from_be_bytes)
    }

    #[inline]
    pub fn write_u16(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    #[inline]
    pub fn write_u32(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }

    #[inline]
    pub fn write_u64(value: u64) -> [u8; 8] {
        value.to_be_bytes()
    }
}
