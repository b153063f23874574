//! Transport module - physical links and the channel loop that drives them.
//!
//! Provides:
//! - [`Connector`] - opens a byte link (TCP socket, BLE peripheral)
//! - [`TcpConnector`], [`BluetoothConnector`] - the two live variants
//! - [`ReconnectPolicy`] - what a channel does after an unexpected loss
//!
//! Replay is the third channel kind; it lives in [`crate::replay`].

mod bluetooth;
pub(crate) mod channel;
mod tcp;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{FlightlinkError, Result};

pub use bluetooth::{BluetoothConnector, Peripheral};
pub use tcp::TcpConnector;

/// Boxed future returned by connectors.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connected, bidirectional byte stream.
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedLink = Box<dyn Link>;

/// Channel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Bluetooth,
    Network,
    Replay,
}

impl ChannelKind {
    /// Whether the channel reconnects after an unexpected loss when the
    /// configuration does not say otherwise.
    pub fn reconnects_by_default(self) -> bool {
        matches!(self, ChannelKind::Bluetooth)
    }
}

/// Opens links of one kind. Called again for every reconnect attempt.
pub trait Connector: Send + Sync + 'static {
    fn kind(&self) -> ChannelKind;

    fn connect(&self) -> BoxFuture<'_, Result<BoxedLink>>;
}

/// Reconnect behavior after an unexpected loss.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub interval: Duration,
    /// `None` retries until success or close.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Open a link, bounded by `timeout`.
pub async fn connect_link(connector: &dyn Connector, timeout: Duration) -> Result<BoxedLink> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(link) => link,
        Err(_) => Err(FlightlinkError::ConnectTimeout),
    }
}
