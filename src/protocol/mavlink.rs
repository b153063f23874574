//! MAVLink v1/v2 framing.
//!
//! Only the frame envelope is handled here: start byte, header, payload and
//! CRC-16/MCRF4XX seeded with the message's CRC_EXTRA byte. Payload contents
//! are left to consumers.
//!
//! ```text
//! v1: ┌──────┬─────┬─────┬───────┬────────┬───────┬─────────┬───────┐
//!     │ 0xFE │ len │ seq │ sysid │ compid │ msgid │ payload │ crc16 │
//!     └──────┴─────┴─────┴───────┴────────┴───────┴─────────┴───────┘
//! v2: ┌──────┬─────┬────────┬────────┬─────┬───────┬────────┬──────────┬─────────┬───────┬───────────┐
//!     │ 0xFD │ len │ incomp │ compat │ seq │ sysid │ compid │ msgid x3 │ payload │ crc16 │ signature │
//!     └──────┴─────┴────────┴────────┴─────┴───────┴────────┴──────────┴─────────┴───────┴───────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::FrameParser;
use crate::codec::LittleEndian;
use crate::error::{FlightlinkError, Result};

/// MAVLink 1 start byte.
pub const STX_V1: u8 = 0xFE;

/// MAVLink 2 start byte.
pub const STX_V2: u8 = 0xFD;

/// Header length including the start byte.
pub const HEADER_SIZE_V1: usize = 6;
pub const HEADER_SIZE_V2: usize = 10;

/// Trailing signature length when `INCOMPAT_FLAG_SIGNED` is set.
pub const SIGNATURE_SIZE: usize = 13;

/// v2 incompatibility flag: frame carries a signature.
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

const CRC_SIZE: usize = 2;
const CRC_INIT: u16 = 0xFFFF;

/// Common message ids.
pub mod message_id {
    pub const HEARTBEAT: u32 = 0;
    pub const SYS_STATUS: u32 = 1;
    pub const PARAM_REQUEST_READ: u32 = 20;
    pub const PARAM_REQUEST_LIST: u32 = 21;
    pub const PARAM_VALUE: u32 = 22;
    pub const PARAM_SET: u32 = 23;
    pub const GPS_RAW_INT: u32 = 24;
    pub const ATTITUDE: u32 = 30;
    pub const GLOBAL_POSITION_INT: u32 = 33;
    pub const MISSION_REQUEST_LIST: u32 = 43;
    pub const MISSION_COUNT: u32 = 44;
    pub const MISSION_ACK: u32 = 47;
    pub const RC_CHANNELS: u32 = 65;
    pub const REQUEST_DATA_STREAM: u32 = 66;
    pub const VFR_HUD: u32 = 74;
    pub const COMMAND_LONG: u32 = 76;
    pub const COMMAND_ACK: u32 = 77;
    pub const AUTOPILOT_VERSION: u32 = 148;
    pub const STATUSTEXT: u32 = 253;
}

/// CRC_EXTRA seed for a message id, if the message is known.
pub fn crc_extra(message_id: u32) -> Option<u8> {
    let extra = match message_id {
        0 => 50,
        1 => 124,
        2 => 137,
        4 => 237,
        20 => 214,
        21 => 159,
        22 => 220,
        23 => 168,
        24 => 24,
        25 => 23,
        26 => 170,
        27 => 144,
        29 => 115,
        30 => 39,
        31 => 246,
        32 => 185,
        33 => 104,
        34 => 237,
        35 => 244,
        36 => 222,
        39 => 254,
        40 => 230,
        41 => 28,
        42 => 28,
        43 => 132,
        44 => 221,
        45 => 232,
        46 => 11,
        47 => 153,
        62 => 183,
        65 => 118,
        66 => 148,
        67 => 21,
        69 => 243,
        70 => 124,
        74 => 20,
        76 => 152,
        77 => 143,
        109 => 185,
        116 => 76,
        147 => 154,
        148 => 178,
        253 => 83,
        _ => return None,
    };
    Some(extra)
}

#[inline]
fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc as u8);
    tmp ^= tmp << 4;
    let tmp = tmp as u16;
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

/// CRC-16/MCRF4XX over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC_INIT, |crc, &b| crc_accumulate(b, crc))
}

/// Frame checksum: CRC over header (without start byte) and payload, then CRC_EXTRA.
fn frame_crc(header_and_payload: &[u8], extra: u8) -> u16 {
    crc_accumulate(extra, crc16(header_and_payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MavlinkVersion {
    V1,
    V2,
}

impl MavlinkVersion {
    fn from_stx(byte: u8) -> Option<Self> {
        match byte {
            STX_V1 => Some(Self::V1),
            STX_V2 => Some(Self::V2),
            _ => None,
        }
    }

    fn header_size(self) -> usize {
        match self {
            Self::V1 => HEADER_SIZE_V1,
            Self::V2 => HEADER_SIZE_V2,
        }
    }
}

/// One CRC-validated MAVLink frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavlinkFrame {
    pub version: MavlinkVersion,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
    pub payload: Bytes,
    pub signed: bool,
}

impl MavlinkFrame {
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Header(MavlinkVersion),
    Payload { version: MavlinkVersion, total: usize },
}

/// Accumulates MAVLink bytes and extracts validated frames.
pub struct MavlinkParser {
    buffer: BytesMut,
    state: State,
    recognized: bool,
    bytes_fed: u64,
    frames_dropped: u64,
}

impl MavlinkParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            state: State::Idle,
            recognized: false,
            bytes_fed: 0,
            frames_dropped: 0,
        }
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    fn try_extract_one(&mut self) -> Option<MavlinkFrame> {
        loop {
            match self.state {
                State::Idle => {
                    let start = self
                        .buffer
                        .iter()
                        .position(|&b| MavlinkVersion::from_stx(b).is_some());
                    let Some(pos) = start else {
                        self.buffer.clear();
                        return None;
                    };
                    self.buffer.advance(pos);
                    let Some(version) = MavlinkVersion::from_stx(self.buffer[0]) else {
                        self.resync();
                        continue;
                    };
                    self.state = State::Header(version);
                }

                State::Header(version) => {
                    let header_size = version.header_size();
                    if self.buffer.len() < header_size {
                        return None;
                    }
                    let len = self.buffer[1] as usize;
                    let mut total = header_size + len + CRC_SIZE;
                    if version == MavlinkVersion::V2 {
                        let incompat = self.buffer[2];
                        if incompat & !INCOMPAT_FLAG_SIGNED != 0 {
                            self.resync();
                            continue;
                        }
                        if incompat & INCOMPAT_FLAG_SIGNED != 0 {
                            total += SIGNATURE_SIZE;
                        }
                    }
                    self.state = State::Payload { version, total };
                }

                State::Payload { version, total } => {
                    if self.buffer.len() < total {
                        return None;
                    }
                    match self.validate(version) {
                        Some(frame) => {
                            self.buffer.advance(total);
                            self.state = State::Idle;
                            if !self.recognized {
                                tracing::trace!(
                                    message_id = frame.message_id,
                                    "MAVLink stream recognized"
                                );
                                self.recognized = true;
                            }
                            return Some(frame);
                        }
                        None => {
                            self.frames_dropped += 1;
                            self.resync();
                        }
                    }
                }
            }
        }
    }

    /// Check the CRC of the complete candidate at the front of the buffer.
    fn validate(&self, version: MavlinkVersion) -> Option<MavlinkFrame> {
        let buf = &self.buffer[..];
        let header_size = version.header_size();
        let len = buf[1] as usize;

        let (sequence, system_id, component_id, message_id, signed) = match version {
            MavlinkVersion::V1 => (buf[2], buf[3], buf[4], buf[5] as u32, false),
            MavlinkVersion::V2 => {
                let id = u32::from_le_bytes([buf[7], buf[8], buf[9], 0]);
                (buf[4], buf[5], buf[6], id, buf[2] & INCOMPAT_FLAG_SIGNED != 0)
            }
        };

        let Some(extra) = crc_extra(message_id) else {
            tracing::debug!(message_id, "unknown MAVLink message id, dropping frame");
            return None;
        };

        let crc_at = header_size + len;
        let received = LittleEndian::read_u16(buf, crc_at)?;
        let computed = frame_crc(&buf[1..crc_at], extra);
        if received != computed {
            tracing::debug!(
                message_id,
                received,
                computed,
                "MAVLink CRC mismatch, dropping frame"
            );
            return None;
        }

        Some(MavlinkFrame {
            version,
            sequence,
            system_id,
            component_id,
            message_id,
            payload: Bytes::copy_from_slice(&buf[header_size..crc_at]),
            signed,
        })
    }

    fn resync(&mut self) {
        self.buffer.advance(1);
        self.state = State::Idle;
    }
}

impl FrameParser for MavlinkParser {
    type Frame = MavlinkFrame;

    fn push(&mut self, data: &[u8]) -> Vec<MavlinkFrame> {
        self.bytes_fed += data.len() as u64;
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one() {
            frames.push(frame);
        }
        frames
    }

    fn protocol_recognized(&self) -> bool {
        self.recognized
    }

    fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Idle;
    }
}

impl Default for MavlinkParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds outbound MAVLink frames with a rolling sequence number.
///
/// # Example
///
/// ```
/// use flightlink::protocol::{message_id, MavlinkEncoder, MavlinkVersion};
///
/// let mut encoder = MavlinkEncoder::new(MavlinkVersion::V2);
/// let frame = encoder.encode(message_id::PARAM_REQUEST_LIST, &[1, 1]).unwrap();
/// assert_eq!(frame[0], 0xFD);
/// assert_eq!(frame.len(), 10 + 2 + 2);
/// ```
#[derive(Debug, Clone)]
pub struct MavlinkEncoder {
    version: MavlinkVersion,
    system_id: u8,
    component_id: u8,
    sequence: u8,
}

impl MavlinkEncoder {
    /// Ground-station ids 255/190.
    pub fn new(version: MavlinkVersion) -> Self {
        Self::with_ids(version, 255, 190)
    }

    pub fn with_ids(version: MavlinkVersion, system_id: u8, component_id: u8) -> Self {
        Self {
            version,
            system_id,
            component_id,
            sequence: 0,
        }
    }

    pub fn version(&self) -> MavlinkVersion {
        self.version
    }

    /// Encode one frame and advance the sequence number.
    ///
    /// # Errors
    ///
    /// - `UnknownMavlinkMessage` if no CRC_EXTRA is known for `message_id`
    /// - `PayloadTooLarge` if `payload` exceeds 255 bytes
    /// - `Protocol` if `message_id` does not fit a v1 frame
    pub fn encode(&mut self, message_id: u32, payload: &[u8]) -> Result<Bytes> {
        let extra =
            crc_extra(message_id).ok_or(FlightlinkError::UnknownMavlinkMessage(message_id))?;
        if payload.len() > u8::MAX as usize {
            return Err(FlightlinkError::PayloadTooLarge {
                size: payload.len(),
                max: u8::MAX as usize,
            });
        }

        let header_size = self.version.header_size();
        let mut buf = BytesMut::with_capacity(header_size + payload.len() + CRC_SIZE);
        match self.version {
            MavlinkVersion::V1 => {
                let id = u8::try_from(message_id).map_err(|_| {
                    FlightlinkError::Protocol(format!(
                        "message id {message_id} does not fit a MAVLink 1 frame"
                    ))
                })?;
                buf.put_u8(STX_V1);
                buf.put_u8(payload.len() as u8);
                buf.put_u8(self.sequence);
                buf.put_u8(self.system_id);
                buf.put_u8(self.component_id);
                buf.put_u8(id);
            }
            MavlinkVersion::V2 => {
                buf.put_u8(STX_V2);
                buf.put_u8(payload.len() as u8);
                buf.put_u8(0);
                buf.put_u8(0);
                buf.put_u8(self.sequence);
                buf.put_u8(self.system_id);
                buf.put_u8(self.component_id);
                buf.put_slice(&message_id.to_le_bytes()[..3]);
            }
        }
        buf.put_slice(payload);

        let crc = frame_crc(&buf[1..], extra);
        LittleEndian::put_u16(&mut buf, crc);

        self.sequence = self.sequence.wrapping_add(1);
        Ok(buf.freeze())
    }
}
