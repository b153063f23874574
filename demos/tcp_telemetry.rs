//! TCP telemetry - handshake and attitude polling over a network link.
//!
//! This example demonstrates:
//! - Connecting a session through [`TcpConnector`]
//! - Running the MSP handshake
//! - Polling `MSP_ATTITUDE` and reading the payload
//! - Reporting link throughput
//!
//! # Running
//!
//! Point it at a flight controller exposed over TCP (an SITL build or a
//! serial-to-TCP bridge):
//!
//! ```text
//! cargo run --example tcp_telemetry -- 127.0.0.1:5761
//! ```

use std::time::Duration;

use flightlink::codec::PayloadReader;
use flightlink::events::{EventKind, SessionEvent};
use flightlink::protocol::msp_code;
use flightlink::transport::TcpConnector;
use flightlink::Session;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5761".to_string());

    let session = Session::builder()
        .connect_timeout(Duration::from_secs(3))
        .on(EventKind::ProtocolDetected, |event| {
            if let SessionEvent::ProtocolDetected(protocol) = event {
                println!("protocol: {protocol:?}");
            }
        })
        .connect(TcpConnector::new(addr.as_str()))
        .await?;

    let info = session.handshake().await?;
    println!(
        "{} {} (API {}), modes: {}",
        info.fc_identifier,
        info.fc_version,
        info.api_version,
        info.box_names.join(", ")
    );

    for _ in 0..20 {
        let payload = session.request(msp_code::MSP_ATTITUDE, &[], 2).await?;
        let mut reader = PayloadReader::new(&payload);
        if let (Some(roll), Some(pitch), Some(heading)) =
            (reader.read_i16(), reader.read_i16(), reader.read_i16())
        {
            println!(
                "roll {:6.1}  pitch {:6.1}  heading {:4}  ({} B/s)",
                roll as f32 / 10.0,
                pitch as f32 / 10.0,
                heading,
                session.current_throughput()
            );
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    session.close().await;
    Ok(())
}
