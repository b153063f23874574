//! Recorded sessions: the file layouts, a reader, a recorder and the replay
//! channel that plays a file back through a session.

pub(crate) mod engine;
mod format;
mod reader;
mod recorder;

pub use format::{
    FlightStats, ReplayFormat, SessionMetadata, HEADER_V1, HEADER_V2, MAX_RECORD_SIZE,
};
pub use reader::{ReplayReader, ReplayRecord};
pub use recorder::Recorder;
