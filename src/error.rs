//! Error types for flightlink.

use thiserror::Error;

/// Main error type for all flightlink operations.
#[derive(Debug, Error)]
pub enum FlightlinkError {
    /// I/O error on a socket, peripheral stream or log file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration and session metadata only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (invalid code, malformed outbound message, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload does not fit the frame's length field.
    #[error("Payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// No CRC_EXTRA is known for this MAVLink message id.
    #[error("Unknown MAVLink message id: {0}")]
    UnknownMavlinkMessage(u32),

    /// Connect attempt did not complete within the configured timeout.
    #[error("Connect timeout")]
    ConnectTimeout,

    /// Channel closed (locally, or lost without reconnection).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request exhausted its retries, or the device replied with an error frame.
    #[error("Request {code} failed")]
    RequestFailed { code: u32 },

    /// Device firmware is older than the handshake accepts.
    #[error("Unsupported firmware API version {api_version}")]
    UnsupportedFirmware { api_version: String },
}

/// Result type alias using FlightlinkError.
pub type Result<T> = std::result::Result<T, FlightlinkError>;
