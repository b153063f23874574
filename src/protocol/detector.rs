//! Protocol autodetection between MSP and MAVLink.
//!
//! Until one parser recognizes the stream, every chunk goes to both. MSP is
//! evaluated first: when a chunk makes the MSP parser recognize, the MAVLink
//! parser never sees that chunk. After commitment the losing parser is
//! cleared and receives nothing for the rest of the session.

use super::{Frame, FrameParser, MavlinkFrame, MavlinkParser, MspParser};

/// Which protocol the stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Detection {
    #[default]
    Undetermined,
    Msp,
    Mavlink,
}

impl Detection {
    #[inline]
    pub fn is_determined(self) -> bool {
        self != Self::Undetermined
    }
}

/// A frame from whichever parser is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Msp(Frame),
    Mavlink(MavlinkFrame),
}

/// Routes bytes to the MSP and MAVLink parsers until one wins.
///
/// # Example
///
/// ```
/// use flightlink::protocol::{encode, Detection, Direction, ProtocolDetector};
///
/// let mut detector = ProtocolDetector::new();
/// assert_eq!(detector.detection(), Detection::Undetermined);
///
/// let frames = detector.feed(&encode(Direction::Response, 1, &[0, 1, 40]).unwrap());
/// assert_eq!(frames.len(), 1);
/// assert_eq!(detector.detection(), Detection::Msp);
/// ```
#[derive(Default)]
pub struct ProtocolDetector {
    msp: MspParser,
    mavlink: MavlinkParser,
    detection: Detection,
}

impl ProtocolDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detection(&self) -> Detection {
        self.detection
    }

    pub fn msp(&self) -> &MspParser {
        &self.msp
    }

    pub fn mavlink(&self) -> &MavlinkParser {
        &self.mavlink
    }

    /// Feed one chunk and return the frames it completed.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Inbound> {
        match self.detection {
            Detection::Msp => self.msp.push(data).into_iter().map(Inbound::Msp).collect(),
            Detection::Mavlink => self
                .mavlink
                .push(data)
                .into_iter()
                .map(Inbound::Mavlink)
                .collect(),
            Detection::Undetermined => {
                let frames = self.msp.push(data);
                if self.msp.protocol_recognized() {
                    self.commit(Detection::Msp);
                    return frames.into_iter().map(Inbound::Msp).collect();
                }

                let frames = self.mavlink.push(data);
                if self.mavlink.protocol_recognized() {
                    self.commit(Detection::Mavlink);
                    return frames.into_iter().map(Inbound::Mavlink).collect();
                }

                Vec::new()
            }
        }
    }

    /// Drop any partial frame held by the active parser(s).
    ///
    /// Used after a reconnect; the committed protocol is kept.
    pub fn reset_partial(&mut self) {
        match self.detection {
            Detection::Msp => self.msp.clear(),
            Detection::Mavlink => self.mavlink.clear(),
            Detection::Undetermined => {
                self.msp.clear();
                self.mavlink.clear();
            }
        }
    }

    fn commit(&mut self, detection: Detection) {
        match detection {
            Detection::Msp => self.mavlink.clear(),
            Detection::Mavlink => self.msp.clear(),
            Detection::Undetermined => return,
        }
        tracing::debug!(?detection, "protocol detected");
        self.detection = detection;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, message_id, Direction, MavlinkEncoder, MavlinkVersion};

    fn msp_reply(code: u8) -> Vec<u8> {
        encode(Direction::Response, code, &[1, 2, 3]).unwrap().to_vec()
    }

    fn heartbeat() -> Vec<u8> {
        MavlinkEncoder::with_ids(MavlinkVersion::V2, 1, 1)
            .encode(message_id::HEARTBEAT, &[0, 0, 0, 0, 2, 3, 0x51, 3, 3])
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_garbage_stays_undetermined() {
        let mut detector = ProtocolDetector::new();
        for _ in 0..100 {
            assert!(detector.feed(b"\x00\x11garbage$M").is_empty());
        }
        assert_eq!(detector.detection(), Detection::Undetermined);
        assert!(detector.mavlink().bytes_fed() > 0);
    }

    #[test]
    fn test_msp_commitment_starves_mavlink() {
        let mut detector = ProtocolDetector::new();
        detector.feed(b"noise");
        let mavlink_seen = detector.mavlink().bytes_fed();

        let frames = detector.feed(&msp_reply(101));
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Inbound::Msp(_)));
        assert_eq!(detector.detection(), Detection::Msp);

        // The recognizing chunk and everything after never reach MAVLink.
        let frames = detector.feed(&heartbeat());
        assert!(frames.is_empty());
        assert_eq!(detector.mavlink().bytes_fed(), mavlink_seen);
        assert!(!detector.mavlink().protocol_recognized());
    }

    #[test]
    fn test_mavlink_commitment_starves_msp() {
        let mut detector = ProtocolDetector::new();

        let frames = detector.feed(&heartbeat());
        assert_eq!(frames.len(), 1);
        assert_eq!(detector.detection(), Detection::Mavlink);
        let msp_seen = detector.msp().bytes_fed();

        let frames = detector.feed(&msp_reply(101));
        assert!(frames.is_empty());
        assert_eq!(detector.msp().bytes_fed(), msp_seen);
        assert!(!detector.msp().protocol_recognized());

        assert_eq!(detector.feed(&heartbeat()).len(), 1);
    }

    #[test]
    fn test_msp_wins_tie() {
        let mut window = msp_reply(1);
        window.extend(heartbeat());

        let mut detector = ProtocolDetector::new();
        let frames = detector.feed(&window);

        assert_eq!(detector.detection(), Detection::Msp);
        assert_eq!(frames.len(), 1);
        assert_eq!(detector.mavlink().bytes_fed(), 0);
    }

    #[test]
    fn test_reset_partial_keeps_commitment() {
        let mut detector = ProtocolDetector::new();
        detector.feed(&msp_reply(1));

        let reply = msp_reply(2);
        detector.feed(&reply[..4]);
        detector.reset_partial();

        assert_eq!(detector.detection(), Detection::Msp);
        assert!(detector.feed(&reply[4..]).is_empty());
        assert_eq!(detector.feed(&reply).len(), 1);
    }
}
