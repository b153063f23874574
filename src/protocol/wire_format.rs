//! MSP wire format encoding.
//!
//! Implements the MSP v1 frame layout:
//! ```text
//! ┌─────┬─────┬─────┬──────┬──────┬─────────────┬──────────┐
//! │ '$' │ 'M' │ dir │ size │ code │   payload   │ checksum │
//! │  1  │  1  │  1  │  1   │  1   │ size bytes  │    1     │
//! └─────┴─────┴─────┴──────┴──────┴─────────────┴──────────┘
//! ```
//!
//! `dir` is `<` toward the device, `>` from the device and `!` for an error
//! reply. The checksum is the XOR of `size`, `code` and every payload byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FlightlinkError, Result};

/// First byte of every frame.
pub const PREAMBLE: u8 = b'$';

/// Second byte of every MSP v1 frame.
pub const MSP_MARKER: u8 = b'M';

/// `$`, `M`, direction, size, code.
pub const HEADER_SIZE: usize = 5;

/// Largest payload the one-byte size field can describe.
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Direction byte values.
pub mod direction {
    pub const TO_DEVICE: u8 = b'<';
    pub const FROM_DEVICE: u8 = b'>';
    pub const ERROR: u8 = b'!';
}

/// Direction of an MSP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward the device (`<`).
    Request,
    /// Reply from the device (`>`).
    Response,
    /// Error reply from the device (`!`).
    Error,
}

impl Direction {
    /// Parse a direction byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            direction::TO_DEVICE => Some(Self::Request),
            direction::FROM_DEVICE => Some(Self::Response),
            direction::ERROR => Some(Self::Error),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Request => direction::TO_DEVICE,
            Self::Response => direction::FROM_DEVICE,
            Self::Error => direction::ERROR,
        }
    }
}

/// XOR checksum over size, code and payload.
#[inline]
pub fn checksum(size: u8, code: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(size ^ code, |acc, b| acc ^ b)
}

/// Encode a complete MSP frame.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if `payload` exceeds 255 bytes.
///
/// # Example
///
/// ```
/// use flightlink::protocol::{encode, Direction};
///
/// let bytes = encode(Direction::Request, 108, &[]).unwrap();
/// assert_eq!(&bytes[..], b"$M<\x00\x6c\x6c");
/// ```
pub fn encode(direction: Direction, code: u8, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FlightlinkError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let size = payload.len() as u8;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + 1);
    buf.put_u8(PREAMBLE);
    buf.put_u8(MSP_MARKER);
    buf.put_u8(direction.to_byte());
    buf.put_u8(size);
    buf.put_u8(code);
    buf.put_slice(payload);
    buf.put_u8(checksum(size, code, payload));
    Ok(buf.freeze())
}

/// Encode a request toward the device.
#[inline]
pub fn encode_request(code: u8, payload: &[u8]) -> Result<Bytes> {
    encode(Direction::Request, code, payload)
}
