//! Codec module - fixed-width integer encoding for frames and log records.
//!
//! - [`LittleEndian`] - MSP payload fields, MSP-log record headers
//! - [`BigEndian`] - tlog record timestamps
//! - [`PayloadReader`] - sequential reads over a decoded payload
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the byte order is fixed at the call site.
//!
//! # Example
//!
//! ```
//! use flightlink::codec::{LittleEndian, PayloadReader};
//!
//! // MSP_API_VERSION reply: protocol 0, API 1.40
//! let payload = [0u8, 1, 40];
//! let mut reader = PayloadReader::new(&payload);
//! assert_eq!(reader.read_u8(), Some(0));
//! assert_eq!(LittleEndian::read_u16(&payload, 1), Some(40 << 8 | 1));
//! ```

mod endian;
mod reader;

pub use endian::{BigEndian, LittleEndian};
pub use reader::PayloadReader;
