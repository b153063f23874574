//! Protocol module - wire formats, incremental parsers and autodetection.
//!
//! This module implements the byte-level side of the link:
//! - MSP v1 frame encoding and the incremental [`MspParser`]
//! - MAVLink v1/v2 framing ([`MavlinkParser`], [`MavlinkEncoder`])
//! - [`ProtocolDetector`], which commits a fresh stream to one of the two
//!   protocols once a frame validates

mod detector;
mod frame;
mod mavlink;
pub mod msp_code;
mod msp_parser;
mod wire_format;

pub use detector::{Detection, Inbound, ProtocolDetector};
pub use frame::Frame;
pub use mavlink::{
    crc16, crc_extra, message_id, MavlinkEncoder, MavlinkFrame, MavlinkParser, MavlinkVersion,
    INCOMPAT_FLAG_SIGNED, SIGNATURE_SIZE, STX_V1, STX_V2,
};
pub use msp_parser::MspParser;
pub use wire_format::{
    checksum, direction, encode, encode_request, Direction, HEADER_SIZE, MAX_PAYLOAD_SIZE,
    MSP_MARKER, PREAMBLE,
};

/// Incremental parser over a byte stream of arbitrary chunking.
///
/// Implementations keep the bytes of a partially received frame across calls
/// and silently drop frames that fail validation.
pub trait FrameParser {
    type Frame;

    /// Append `data` and return every frame it completed, in stream order.
    fn push(&mut self, data: &[u8]) -> Vec<Self::Frame>;

    /// Set once the first valid frame has been decoded.
    fn protocol_recognized(&self) -> bool;

    /// Total bytes pushed so far.
    fn bytes_fed(&self) -> u64;

    /// Discard buffered bytes and return to the idle state.
    fn clear(&mut self);
}
