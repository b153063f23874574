//! Opening MSP exchange.
//!
//! Identifies the flight controller before normal operation: API version,
//! firmware variant and version, flight mode names, then the power
//! configuration message that matches the API version. Each step waits for
//! the previous one; the first failure ends the handshake.

use std::fmt;

use bytes::Bytes;

use crate::codec::PayloadReader;
use crate::dispatcher::RequestDispatcher;
use crate::error::{FlightlinkError, Result};
use crate::protocol::msp_code;

/// Oldest API version the handshake accepts.
pub const MIN_API_VERSION: ApiVersion = ApiVersion::new(1, 16);

/// From this API version on, power settings come from `MSP_BATTERY_CONFIG`.
pub const BATTERY_CONFIG_API_VERSION: ApiVersion = ApiVersion::new(1, 35);

const IDENTIFY_RETRIES: u32 = 4;
const POWER_CONFIG_RETRIES: u32 = 2;

/// MSP API version reported by the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
}

impl ApiVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What the handshake learned about the flight controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub msp_protocol: u8,
    pub api_version: ApiVersion,
    /// Four-letter firmware identifier, e.g. `BTFL`.
    pub fc_identifier: String,
    /// `major.minor.patch`
    pub fc_version: String,
    pub box_names: Vec<String>,
    /// Raw `MSP_BATTERY_CONFIG` or `MSP_VOLTAGE_METER_CONFIG` reply.
    pub power_config: Bytes,
}

/// Run the handshake over `dispatcher`.
pub async fn handshake(dispatcher: &RequestDispatcher) -> Result<DeviceInfo> {
    let reply = dispatcher
        .request(msp_code::MSP_API_VERSION, &[], IDENTIFY_RETRIES)
        .await?;
    let (msp_protocol, api_version) = parse_api_version(&reply)?;
    if api_version < MIN_API_VERSION {
        tracing::warn!(%api_version, "firmware too old");
        return Err(FlightlinkError::UnsupportedFirmware {
            api_version: api_version.to_string(),
        });
    }
    tracing::debug!(msp_protocol, %api_version, "api version");

    let reply = dispatcher
        .request(msp_code::MSP_FC_VARIANT, &[], IDENTIFY_RETRIES)
        .await?;
    let fc_identifier = parse_fc_variant(&reply)?;

    let reply = dispatcher
        .request(msp_code::MSP_FC_VERSION, &[], IDENTIFY_RETRIES)
        .await?;
    let fc_version = parse_fc_version(&reply)?;

    let reply = dispatcher
        .request(msp_code::MSP_BOXNAMES, &[], IDENTIFY_RETRIES)
        .await?;
    let box_names = parse_box_names(&reply);

    let power_code = if api_version >= BATTERY_CONFIG_API_VERSION {
        msp_code::MSP_BATTERY_CONFIG
    } else {
        msp_code::MSP_VOLTAGE_METER_CONFIG
    };
    let power_config = dispatcher
        .request(power_code, &[], POWER_CONFIG_RETRIES)
        .await?;

    tracing::info!(%fc_identifier, %fc_version, %api_version, "handshake complete");

    Ok(DeviceInfo {
        msp_protocol,
        api_version,
        fc_identifier,
        fc_version,
        box_names,
        power_config,
    })
}

fn short_reply(code: u8) -> FlightlinkError {
    FlightlinkError::Protocol(format!("reply to MSP code {code} is too short"))
}

fn parse_api_version(payload: &[u8]) -> Result<(u8, ApiVersion)> {
    let mut reader = PayloadReader::new(payload);
    match (reader.read_u8(), reader.read_u8(), reader.read_u8()) {
        (Some(protocol), Some(major), Some(minor)) => {
            Ok((protocol, ApiVersion::new(major, minor)))
        }
        _ => Err(short_reply(msp_code::MSP_API_VERSION)),
    }
}

fn parse_fc_variant(payload: &[u8]) -> Result<String> {
    let mut reader = PayloadReader::new(payload);
    let bytes = reader
        .read_bytes(4)
        .ok_or_else(|| short_reply(msp_code::MSP_FC_VARIANT))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn parse_fc_version(payload: &[u8]) -> Result<String> {
    match payload {
        [major, minor, patch, ..] => Ok(format!("{major}.{minor}.{patch}")),
        _ => Err(short_reply(msp_code::MSP_FC_VERSION)),
    }
}

fn parse_box_names(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .split(';')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::events::spawn_callback_queue;
    use crate::protocol::{Direction, Frame, FrameParser, Inbound, MspParser};
    use crate::writer::OutputQueue;

    /// Answers requests drained from the output queue with canned payloads.
    fn fake_device(
        dispatcher: RequestDispatcher,
        replies: HashMap<u8, Vec<u8>>,
    ) -> Arc<Mutex<Vec<u8>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            let queue = dispatcher.queue().clone();
            let mut parser = MspParser::new();
            while let Some(batch) = queue.next_batch(64).await {
                for message in batch {
                    for request in parser.push(&message) {
                        log.lock().unwrap().push(request.code);
                        if let Some(payload) = replies.get(&request.code) {
                            let reply = Frame::new(
                                request.code,
                                Direction::Response,
                                Bytes::from(payload.clone()),
                            );
                            dispatcher.on_frame(&Inbound::Msp(reply));
                        }
                    }
                }
            }
        });
        seen
    }

    fn dispatcher() -> RequestDispatcher {
        let (callbacks, _) = spawn_callback_queue();
        RequestDispatcher::new(OutputQueue::new(), callbacks, Duration::from_millis(500))
    }

    fn betaflight(api_minor: u8) -> HashMap<u8, Vec<u8>> {
        HashMap::from([
            (msp_code::MSP_API_VERSION, vec![0, 1, api_minor]),
            (msp_code::MSP_FC_VARIANT, b"BTFL".to_vec()),
            (msp_code::MSP_FC_VERSION, vec![3, 1, 6]),
            (msp_code::MSP_BOXNAMES, b"ARM;ANGLE;HORIZON;".to_vec()),
            (msp_code::MSP_BATTERY_CONFIG, vec![33, 43, 35, 0x6C, 0x07]),
            (msp_code::MSP_VOLTAGE_METER_CONFIG, vec![110, 33, 43, 35]),
        ])
    }

    #[tokio::test]
    async fn test_handshake_modern_firmware() {
        let dispatcher = dispatcher();
        let seen = fake_device(dispatcher.clone(), betaflight(40));

        let info = handshake(&dispatcher).await.unwrap();

        assert_eq!(info.msp_protocol, 0);
        assert_eq!(info.api_version, ApiVersion::new(1, 40));
        assert_eq!(info.fc_identifier, "BTFL");
        assert_eq!(info.fc_version, "3.1.6");
        assert_eq!(info.box_names, vec!["ARM", "ANGLE", "HORIZON"]);
        assert_eq!(&info.power_config[..], &[33, 43, 35, 0x6C, 0x07]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                msp_code::MSP_API_VERSION,
                msp_code::MSP_FC_VARIANT,
                msp_code::MSP_FC_VERSION,
                msp_code::MSP_BOXNAMES,
                msp_code::MSP_BATTERY_CONFIG,
            ]
        );
    }

    #[tokio::test]
    async fn test_handshake_older_api_uses_voltage_meter() {
        let dispatcher = dispatcher();
        let seen = fake_device(dispatcher.clone(), betaflight(20));

        let info = handshake(&dispatcher).await.unwrap();

        assert_eq!(&info.power_config[..], &[110, 33, 43, 35]);
        assert_eq!(
            seen.lock().unwrap().last(),
            Some(&msp_code::MSP_VOLTAGE_METER_CONFIG)
        );
    }

    #[tokio::test]
    async fn test_handshake_rejects_old_firmware() {
        let dispatcher = dispatcher();
        let seen = fake_device(dispatcher.clone(), betaflight(15));

        let err = handshake(&dispatcher).await.unwrap_err();

        assert!(matches!(
            err,
            FlightlinkError::UnsupportedFirmware { ref api_version } if api_version == "1.15"
        ));
        assert_eq!(*seen.lock().unwrap(), vec![msp_code::MSP_API_VERSION]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_stops_at_first_failure() {
        let dispatcher = dispatcher();
        let mut replies = betaflight(40);
        replies.remove(&msp_code::MSP_FC_VERSION);
        let seen = fake_device(dispatcher.clone(), replies);

        let err = handshake(&dispatcher).await.unwrap_err();

        assert!(matches!(
            err,
            FlightlinkError::RequestFailed { code } if code == msp_code::MSP_FC_VERSION as u32
        ));
        let seen = seen.lock().unwrap();
        let attempts = seen
            .iter()
            .filter(|&&code| code == msp_code::MSP_FC_VERSION)
            .count();
        assert_eq!(attempts, 1 + IDENTIFY_RETRIES as usize);
        assert!(!seen.contains(&msp_code::MSP_BOXNAMES));
    }

    #[test]
    fn test_short_replies() {
        assert!(parse_api_version(&[0, 1]).is_err());
        assert!(parse_fc_variant(b"BTF").is_err());
        assert!(parse_fc_version(&[4, 2]).is_err());
        assert!(parse_box_names(&[]).is_empty());
    }

    #[test]
    fn test_api_version_ordering() {
        assert!(ApiVersion::new(1, 16) >= MIN_API_VERSION);
        assert!(ApiVersion::new(1, 9) < ApiVersion::new(1, 16));
        assert!(ApiVersion::new(2, 0) > BATTERY_CONFIG_API_VERSION);
        assert_eq!(ApiVersion::new(1, 40).to_string(), "1.40");
    }
}
