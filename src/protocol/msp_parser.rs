//! Incremental MSP frame parser.
//!
//! Uses `bytes::BytesMut` to keep the bytes of a candidate frame until it is
//! either emitted or rejected. Implements a state machine over the buffer:
//! - `Idle`: scanning for `$`
//! - `Header`: `$` found, need `M`, direction, size and code
//! - `Payload`: header accepted, need `size` payload bytes plus checksum
//!
//! A rejected candidate (wrong marker, unknown direction, bad checksum) drops
//! only its leading `$`; scanning resumes at the next byte, so a frame that
//! started inside the rejected bytes is still found.
//!
//! # Example
//!
//! ```
//! use flightlink::protocol::{encode, Direction, FrameParser, MspParser};
//!
//! let mut parser = MspParser::new();
//! let bytes = encode(Direction::Response, 101, &[1, 2, 3]).unwrap();
//!
//! assert!(parser.push(&bytes[..4]).is_empty());
//! let frames = parser.push(&bytes[4..]);
//! assert_eq!(frames.len(), 1);
//! assert!(parser.protocol_recognized());
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{checksum, Direction, HEADER_SIZE, MSP_MARKER, PREAMBLE};
use super::{Frame, FrameParser};

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Header,
    Payload {
        direction: Direction,
        size: u8,
        code: u8,
    },
}

/// Accumulates MSP bytes and extracts validated frames.
pub struct MspParser {
    buffer: BytesMut,
    state: State,
    recognized: bool,
    bytes_fed: u64,
    frames_dropped: u64,
}

impl MspParser {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::Idle,
            recognized: false,
            bytes_fed: 0,
            frames_dropped: 0,
        }
    }

    /// Candidates rejected after their header was accepted.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Bytes currently held for a partial frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn try_extract_one(&mut self) -> Option<Frame> {
        loop {
            match self.state {
                State::Idle => match self.buffer.iter().position(|&b| b == PREAMBLE) {
                    Some(pos) => {
                        self.buffer.advance(pos);
                        self.state = State::Header;
                    }
                    None => {
                        self.buffer.clear();
                        return None;
                    }
                },

                State::Header => {
                    if self.buffer.len() < 2 {
                        return None;
                    }
                    if self.buffer[1] != MSP_MARKER {
                        self.resync();
                        continue;
                    }
                    if self.buffer.len() < 3 {
                        return None;
                    }
                    let Some(direction) = Direction::from_byte(self.buffer[2]) else {
                        self.resync();
                        continue;
                    };
                    if self.buffer.len() < HEADER_SIZE {
                        return None;
                    }
                    self.state = State::Payload {
                        direction,
                        size: self.buffer[3],
                        code: self.buffer[4],
                    };
                }

                State::Payload {
                    direction,
                    size,
                    code,
                } => {
                    let total = HEADER_SIZE + size as usize + 1;
                    if self.buffer.len() < total {
                        return None;
                    }

                    let expected = self.buffer[total - 1];
                    let actual = checksum(size, code, &self.buffer[HEADER_SIZE..total - 1]);
                    if expected != actual {
                        tracing::debug!(
                            code,
                            expected,
                            actual,
                            "MSP checksum mismatch, dropping frame"
                        );
                        self.frames_dropped += 1;
                        self.resync();
                        continue;
                    }

                    let mut frame = self.buffer.split_to(total);
                    frame.advance(HEADER_SIZE);
                    frame.truncate(size as usize);

                    self.state = State::Idle;
                    if !self.recognized {
                        tracing::trace!(code, "MSP stream recognized");
                        self.recognized = true;
                    }
                    return Some(Frame::new(code, direction, frame.freeze()));
                }
            }
        }
    }

    /// Drop the `$` of the current candidate and rescan from the next byte.
    fn resync(&mut self) {
        self.buffer.advance(1);
        self.state = State::Idle;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Idle => "Idle",
            State::Header => "Header",
            State::Payload { .. } => "Payload",
        }
    }
}

impl FrameParser for MspParser {
    type Frame = Frame;

    fn push(&mut self, data: &[u8]) -> Vec<Frame> {
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

impl Default for MspParser {
    fn default() -> Self {
        Self::new()
    }
}
