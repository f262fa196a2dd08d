//! Pipe configuration — one tagged variant per physical medium

use super::abstraction::{PipeError, PipeType};
use crate::frame::Compression;
use crate::reliability::ReliabilityConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default physical operation timeout (ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Full configuration of one pipe instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfiguration {
    /// Bound on every physical connect/send/disconnect call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-chunk compression for outbound frames
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    pub settings: PipeSettings,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Medium-specific settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pipe_type", rename_all = "snake_case")]
pub enum PipeSettings {
    QrKiss(QrKissConfig),
    Ble(RadioConfig),
    Nfc(RadioConfig),
    Web(WebConfig),
}

/// Visual channel: payload bytes per QR frame and display cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrKissConfig {
    pub chunk_size: usize,
    pub frame_interval_ms: u64,
}

impl Default for QrKissConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            frame_interval_ms: 100,
        }
    }
}

/// Short-range radio: service/characteristic identifiers and MTU.
/// NFC uses `service_uuid` as its application identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub mtu: usize,
}

/// Socket / HTTP endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebConfig {
    pub endpoint_url: String,
    /// WebSocket when true, HTTP POST + polling GET otherwise
    pub use_websocket: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl PipeSettings {
    pub fn pipe_type(&self) -> PipeType {
        match self {
            PipeSettings::QrKiss(_) => PipeType::QrKiss,
            PipeSettings::Ble(_) => PipeType::Ble,
            PipeSettings::Nfc(_) => PipeType::Nfc,
            PipeSettings::Web(_) => PipeType::Web,
        }
    }
}

impl PipeConfiguration {
    pub fn new(settings: PipeSettings) -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            compression: Compression::None,
            reliability: ReliabilityConfig::default(),
            settings,
        }
    }

    pub fn pipe_type(&self) -> PipeType {
        self.settings.pipe_type()
    }

    /// Reject configurations with missing or zero required fields
    pub fn validate(&self) -> Result<(), PipeError> {
        if self.timeout_ms == 0 {
            return Err(PipeError::Configuration("timeout_ms must be > 0".into()));
        }
        if self.reliability.base_timeout_ms == 0 {
            return Err(PipeError::Configuration(
                "reliability.base_timeout_ms must be > 0".into(),
            ));
        }
        match &self.settings {
            PipeSettings::QrKiss(qr) => {
                if qr.chunk_size == 0 {
                    return Err(PipeError::Configuration("QR chunk_size must be > 0".into()));
                }
                if qr.frame_interval_ms == 0 {
                    return Err(PipeError::Configuration(
                        "QR frame_interval_ms must be > 0".into(),
                    ));
                }
            }
            PipeSettings::Ble(radio) | PipeSettings::Nfc(radio) => {
                if radio.service_uuid.trim().is_empty() {
                    return Err(PipeError::Configuration("service_uuid is required".into()));
                }
                if radio.characteristic_uuid.trim().is_empty() {
                    return Err(PipeError::Configuration(
                        "characteristic_uuid is required".into(),
                    ));
                }
                if radio.mtu == 0 {
                    return Err(PipeError::Configuration("mtu must be > 0".into()));
                }
            }
            PipeSettings::Web(web) => {
                let url = web.endpoint_url.trim();
                if url.is_empty() {
                    return Err(PipeError::Configuration("endpoint_url is required".into()));
                }
                let scheme_ok = if web.use_websocket {
                    url.starts_with("ws://") || url.starts_with("wss://")
                } else {
                    url.starts_with("http://") || url.starts_with("https://")
                };
                if !scheme_ok {
                    return Err(PipeError::Configuration(format!(
                        "endpoint_url {} does not match use_websocket={}",
                        url, web.use_websocket
                    )));
                }
                if !web.use_websocket && web.poll_interval_ms == 0 {
                    return Err(PipeError::Configuration(
                        "poll_interval_ms must be > 0 for HTTP polling".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
