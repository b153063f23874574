//! # flightlink
//!
//! Protocol and transport layer for talking to a flight controller over MSP
//! or MAVLink.
//!
//! ## Architecture
//!
//! - **Transport**: a live link (TCP socket, BLE peripheral) or a recorded
//!   session file, driven by one I/O task per session
//! - **Protocol**: incremental MSP and MAVLink parsers behind a detector that
//!   commits the stream to whichever protocol validates first
//! - **Dispatch**: an ordered output queue plus per-request retry and timeout
//!   bookkeeping; every request completes exactly once
//! - **Events**: typed publish/subscribe delivered on a single callback task
//!
//! ## Example
//!
//! ```ignore
//! use flightlink::events::EventKind;
//! use flightlink::protocol::msp_code;
//! use flightlink::transport::TcpConnector;
//! use flightlink::Session;
//!
//! #[tokio::main]
//! async fn main() -> flightlink::Result<()> {
//!     let session = Session::connect(TcpConnector::new("127.0.0.1:5760")).await?;
//!     let info = session.handshake().await?;
//!     println!("{} {}", info.fc_identifier, info.fc_version);
//!
//!     let attitude = session.request(msp_code::MSP_ATTITUDE, &[], 2).await?;
//!     println!("{} B/s, {:?}", session.current_throughput(), attitude);
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handshake;
pub mod protocol;
pub mod replay;
pub mod transport;

mod config;
mod meter;
mod session;
mod writer;

pub use config::SessionConfig;
pub use error::{FlightlinkError, Result};
pub use handshake::{ApiVersion, DeviceInfo};
pub use meter::ThroughputMeter;
pub use session::{Session, SessionBuilder};
pub use writer::OutputQueue;
