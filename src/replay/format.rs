//! Session log layouts.
//!
//! MSP log (own format):
//! ```text
//! [header]  "MFL\x00" i32 len, stats blob      (legacy, stats not decoded)
//!           "MFL\x01" 8 x f64 stats             (current)
//!           then i32 len, aircraft blob
//! records   u32 LE timestamp ms | u16 LE size | size bytes of raw stream
//! ```
//! A file without a header is replayed from offset 0.
//!
//! tlog:
//! ```text
//! records   u64 BE timestamp us | 6-byte MAVLink v1 header | len + 2 bytes
//! ```
//! The length byte is offset 9 of the 14-byte record prefix.

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::LittleEndian;

/// Legacy header, statistics stored as an opaque archive.
pub const HEADER_V1: [u8; 4] = *b"MFL\x00";

/// Current header, statistics stored as eight `f64`.
pub const HEADER_V2: [u8; 4] = *b"MFL\x01";

/// Timestamp and size preceding every MSP-log record.
pub const MSP_RECORD_HEADER_SIZE: usize = 6;

/// Largest MSP-log record payload.
pub const MAX_RECORD_SIZE: usize = u16::MAX as usize;

/// Timestamp plus MAVLink header preceding every tlog record.
pub const TLOG_PREFIX_SIZE: usize = 14;

/// Offset of the MAVLink length byte within the tlog prefix.
pub const TLOG_LENGTH_OFFSET: usize = 9;

/// Offset of the MAVLink header within the tlog prefix.
pub const TLOG_HEADER_OFFSET: usize = 8;

/// Record layout of a replay file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayFormat {
    MspLog,
    TLog,
}

impl ReplayFormat {
    /// `.tlog` files are tlogs; everything else is an MSP log.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tlog") => ReplayFormat::TLog,
            _ => ReplayFormat::MspLog,
        }
    }
}

/// Flight statistics stored in the `MFL\x01` header.
///
/// `armed_date` is seconds since 2001-01-01T00:00:00Z.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightStats {
    pub armed_date: f64,
    pub flight_time: f64,
    pub total_distance: f64,
    pub max_distance_to_home: f64,
    pub max_speed: f64,
    pub max_altitude: f64,
    pub max_amps: f64,
    pub mamps_used: f64,
}

impl FlightStats {
    pub const ENCODED_SIZE: usize = 8 * 8;

    fn fields(&self) -> [f64; 8] {
        [
            self.armed_date,
            self.flight_time,
            self.total_distance,
            self.max_distance_to_home,
            self.max_speed,
            self.max_altitude,
            self.max_amps,
            self.mamps_used,
        ]
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        for (chunk, value) in out.chunks_exact_mut(8).zip(self.fields()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let f = |i: usize| LittleEndian::read_f64(buf, i * 8);
        Some(Self {
            armed_date: f(0)?,
            flight_time: f(1)?,
            total_distance: f(2)?,
            max_distance_to_home: f(3)?,
            max_speed: f(4)?,
            max_altitude: f(5)?,
            max_amps: f(6)?,
            mamps_used: f(7)?,
        })
    }
}

/// What a replay file says about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub format: ReplayFormat,
    /// Present for `MFL\x01` logs.
    pub stats: Option<FlightStats>,
    /// Opaque aircraft blob stored after the header, empty if none.
    pub aircraft_data: Bytes,
}

impl SessionMetadata {
    pub fn headerless(format: ReplayFormat) -> Self {
        Self {
            format,
            stats: None,
            aircraft_data: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ReplayFormat::from_path(Path::new("flight.tlog")),
            ReplayFormat::TLog
        );
        assert_eq!(
            ReplayFormat::from_path(Path::new("/logs/FLIGHT.TLOG")),
            ReplayFormat::TLog
        );
        assert_eq!(
            ReplayFormat::from_path(Path::new("2016-01-06.mflog")),
            ReplayFormat::MspLog
        );
        assert_eq!(
            ReplayFormat::from_path(Path::new("noextension")),
            ReplayFormat::MspLog
        );
    }

    #[test]
    fn test_stats_layout() {
        let stats = FlightStats {
            armed_date: 474_000_000.0,
            flight_time: 321.5,
            max_speed: 17.25,
            ..FlightStats::default()
        };
        let encoded = stats.encode();

        assert_eq!(encoded.len(), 64);
        assert_eq!(&encoded[8..16], &321.5f64.to_le_bytes());
        assert_eq!(FlightStats::decode(&encoded), Some(stats));
        assert_eq!(FlightStats::decode(&encoded[..63]), None);
    }

    #[test]
    fn test_stats_json() {
        let stats = FlightStats {
            max_altitude: 120.0,
            ..FlightStats::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"max_altitude\":120.0"));
    }
}
