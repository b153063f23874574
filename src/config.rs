//! Session configuration.
//!
//! Every field has a default, so a JSON document only needs the fields it
//! changes:
//!
//! ```
//! use flightlink::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{ "request_timeout_ms": 300, "reconnect": true }"#).unwrap();
//! assert_eq!(config.request_timeout().as_millis(), 300);
//! assert_eq!(config.connect_timeout().as_secs(), 5);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::meter::DEFAULT_METER_CAPACITY;
use crate::transport::{ChannelKind, ReconnectPolicy};

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reply timeout per request attempt.
    pub request_timeout_ms: u64,
    /// Bound on each connect attempt.
    pub connect_timeout_ms: u64,
    /// `None` uses the channel default (Bluetooth reconnects, network does not).
    pub reconnect: Option<bool>,
    pub reconnect_interval_ms: u64,
    /// `None` keeps trying until close.
    pub max_reconnect_attempts: Option<u32>,
    pub read_buffer_size: usize,
    pub meter_capacity: usize,
    pub meter_window_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 500,
            connect_timeout_ms: 5000,
            reconnect: None,
            reconnect_interval_ms: 1000,
            max_reconnect_attempts: None,
            read_buffer_size: 4096,
            meter_capacity: DEFAULT_METER_CAPACITY,
            meter_window_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn meter_window(&self) -> Duration {
        Duration::from_millis(self.meter_window_ms)
    }

    /// Reconnect policy for a channel of `kind`.
    pub fn reconnect_policy(&self, kind: ChannelKind) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self
                .reconnect
                .unwrap_or_else(|| kind.reconnects_by_default()),
            interval: Duration::from_millis(self.reconnect_interval_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.meter_capacity, 500);
        assert_eq!(config.meter_window(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json() {
        let config = SessionConfig::from_json(
            r#"{ "reconnect_interval_ms": 250, "max_reconnect_attempts": 3 }"#,
        )
        .unwrap();

        assert_eq!(config.reconnect_interval_ms, 250);
        assert_eq!(config.max_reconnect_attempts, Some(3));
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_invalid_json() {
        assert!(SessionConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_reconnect_policy_defaults_by_kind() {
        let config = SessionConfig::default();
        assert!(config.reconnect_policy(ChannelKind::Bluetooth).enabled);
        assert!(!config.reconnect_policy(ChannelKind::Network).enabled);

        let forced = SessionConfig {
            reconnect: Some(true),
            ..SessionConfig::default()
        };
        let policy = forced.reconnect_policy(ChannelKind::Network);
        assert!(policy.enabled);
        assert_eq!(policy.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{ "request_timeout_ms": 800 }"#).unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_timeout_ms, 800);
    }
}
