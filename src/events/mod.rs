//! Events module - session notifications for consumers.
//!
//! Provides:
//! - [`EventBus`] - typed publish/subscribe with explicit [`Subscription`] handles
//! - [`CallbackQueue`] - the serial context every handler and completion runs on
//! - [`SessionEvent`] - what a session publishes
//!
//! # Example
//!
//! ```ignore
//! use flightlink::events::{EventKind, SessionEvent};
//!
//! let sub = session.subscribe(EventKind::FrameReceived, |event| {
//!     if let SessionEvent::FrameReceived(frame) = event {
//!         println!("{:?}", frame);
//!     }
//! });
//! ```

mod bus;
mod queue;

pub use bus::{Event, EventBus, Subscription};
pub use queue::{spawn_callback_queue, CallbackQueue};

use crate::protocol::{Detection, Inbound};
use crate::transport::ChannelKind;

/// Notifications published by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First link established.
    Connected(ChannelKind),
    /// Live link dropped unexpectedly; a reconnect may follow.
    ConnectionLost,
    /// Link re-established after `ConnectionLost`.
    Reconnected,
    /// The stream was committed to one protocol.
    ProtocolDetected(Detection),
    /// A validated frame arrived.
    FrameReceived(Inbound),
    /// Replay reached the end of the file.
    ReplayEnded,
    /// Session is over. Published exactly once.
    Disconnected,
}

/// Subscription key for [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    ConnectionLost,
    Reconnected,
    ProtocolDetected,
    FrameReceived,
    ReplayEnded,
    Disconnected,
}

impl Event for SessionEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connected(_) => EventKind::Connected,
            SessionEvent::ConnectionLost => EventKind::ConnectionLost,
            SessionEvent::Reconnected => EventKind::Reconnected,
            SessionEvent::ProtocolDetected(_) => EventKind::ProtocolDetected,
            SessionEvent::FrameReceived(_) => EventKind::FrameReceived,
            SessionEvent::ReplayEnded => EventKind::ReplayEnded,
            SessionEvent::Disconnected => EventKind::Disconnected,
        }
    }
}
