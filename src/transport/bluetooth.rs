//! Bluetooth Low Energy link.
//!
//! The platform BLE stack is outside this crate. It is plugged in through
//! [`Peripheral`], which turns a remembered peripheral into a byte stream
//! (typically a serial characteristic pair). Every reconnect attempt calls
//! [`Peripheral::open`] on the same peripheral.

use std::sync::Arc;

use super::{BoxFuture, BoxedLink, ChannelKind, Connector};
use crate::error::Result;

/// A BLE peripheral that can be opened as a byte stream.
pub trait Peripheral: Send + Sync + 'static {
    /// Stable identifier (address or platform UUID), used in logs.
    fn identifier(&self) -> &str;

    /// Connect to the peripheral and return its byte stream.
    fn open(&self) -> BoxFuture<'_, Result<BoxedLink>>;
}

/// Connector for a single BLE peripheral.
#[derive(Clone)]
pub struct BluetoothConnector {
    peripheral: Arc<dyn Peripheral>,
}

impl BluetoothConnector {
    pub fn new<P: Peripheral>(peripheral: P) -> Self {
        Self {
            peripheral: Arc::new(peripheral),
        }
    }

    pub fn from_arc(peripheral: Arc<dyn Peripheral>) -> Self {
        Self { peripheral }
    }

    pub fn identifier(&self) -> &str {
        self.peripheral.identifier()
    }
}

impl Connector for BluetoothConnector {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Bluetooth
    }

    fn connect(&self) -> BoxFuture<'_, Result<BoxedLink>> {
        tracing::debug!(peripheral = self.peripheral.identifier(), "opening peripheral");
        self.peripheral.open()
    }
}

impl std::fmt::Debug for BluetoothConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluetoothConnector")
            .field("peripheral", &self.peripheral.identifier())
            .finish()
    }
}
