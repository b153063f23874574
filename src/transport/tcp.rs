//! TCP/Wi-Fi link.

use tokio::net::TcpStream;

use super::{BoxFuture, BoxedLink, ChannelKind, Connector};
use crate::error::Result;

/// Connects to a telemetry bridge over TCP.
///
/// A refused or timed-out connect is reported as an error; retrying is up to
/// the caller or the channel's reconnect policy.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// `addr` is anything `TcpStream::connect` accepts, e.g. `"192.168.4.1:23"`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Network
    }

    fn connect(&self) -> BoxFuture<'_, Result<BoxedLink>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            tracing::debug!(addr = %self.addr, "TCP connected");
            Ok(Box::new(stream) as BoxedLink)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let connector = TcpConnector::new(addr);
        let (link, accepted) = tokio::join!(connector.connect(), listener.accept());

        assert!(link.is_ok());
        assert!(accepted.is_ok());
        assert_eq!(connector.kind(), ChannelKind::Network);
    }

    #[tokio::test]
    async fn test_refused_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(TcpConnector::new(addr).connect().await.is_err());
    }
}
