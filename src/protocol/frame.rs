//! Decoded MSP frame.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use flightlink::protocol::{Direction, Frame};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(108, Direction::Response, Bytes::from_static(&[1, 0, 2, 0, 90, 0]));
//!
//! assert_eq!(frame.code, 108);
//! assert_eq!(frame.size(), 6);
//! assert!(frame.is_reply());
//! ```

use bytes::Bytes;

use super::wire_format::{encode, Direction};
use crate::error::Result;

/// One complete, checksum-validated MSP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub direction: Direction,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(code: u8, direction: Direction, payload: Bytes) -> Self {
        Self {
            code,
            direction,
            payload,
        }
    }

    /// Payload length. Always equal to `payload.len()`.
    #[inline]
    pub fn size(&self) -> u16 {
        self.payload.len() as u16
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this frame came from the device (`>` or `!`).
    #[inline]
    pub fn is_reply(&self) -> bool {
        matches!(self.direction, Direction::Response | Direction::Error)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.direction == Direction::Error
    }

    /// Re-encode this frame to wire bytes.
    pub fn to_bytes(&self) -> Result<Bytes> {
        encode(self.direction, self.code, &self.payload)
    }
}
