//! Replay - play back a recorded session and print its frames.
//!
//! This example demonstrates:
//! - Opening an MSP log or a MAVLink tlog through the session builder
//! - Reading the session metadata stored in the log header
//! - Subscribing to frames as they arrive at their original pace
//!
//! # Running
//!
//! ```text
//! cargo run --example replay -- path/to/flight.mflog
//! cargo run --example replay -- path/to/flight.tlog
//! ```

use flightlink::events::{EventKind, SessionEvent};
use flightlink::protocol::Inbound;
use flightlink::Session;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: replay <log file>");
        std::process::exit(2);
    };

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let (_session, metadata) = Session::builder()
        .on(EventKind::FrameReceived, |event| match event {
            SessionEvent::FrameReceived(Inbound::Msp(frame)) => {
                println!("MSP {:3} {:?} {:02x?}", frame.code, frame.direction, &frame.payload[..]);
            }
            SessionEvent::FrameReceived(Inbound::Mavlink(frame)) => {
                println!(
                    "MAVLink #{:<5} sys {} comp {} seq {}",
                    frame.message_id, frame.system_id, frame.component_id, frame.sequence
                );
            }
            _ => {}
        })
        .on(EventKind::ReplayEnded, |_| println!("end of log"))
        .on(EventKind::Disconnected, move |_| {
            let _ = done_tx.send(());
        })
        .replay(&path)
        .await?;

    println!("format: {:?}", metadata.format);
    if let Some(stats) = &metadata.stats {
        println!("stats: {}", serde_json::to_string_pretty(stats)?);
    }
    if !metadata.aircraft_data.is_empty() {
        println!("aircraft data: {} bytes", metadata.aircraft_data.len());
    }

    // Handlers run on the session's callback task; Disconnected is the last one.
    done_rx.recv().await;
    Ok(())
}
