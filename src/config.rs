// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Node configuration
//!
//! Loaded once at startup from JSON and immutable afterwards.
//!
//! ```json
//! {
//!   "radio": { "dev_eui": "70B3D57ED0041234", "app_eui": "0000000000000000",
//!              "app_key": "2B7E151628AED2A6ABF7158809CF4F3C", "data_rate": 0 },
//!   "sampling": { "interval_minutes": 10, "samples_per_uplink": 5, "version": 2 },
//!   "thresholds": { "temperature": 45.0, "co2": 2000.0 },
//!   "sensors": [ { "type": "bme280", "sda": 4, "scl": 15 }, { "type": "sound", "pin": 37 } ],
//!   "fallback": { "ssid": "lab", "password": "secret", "endpoint": "https://example.org/ingest",
//!                 "token": "abc" }
//! }
//! ```

use crate::error::ConfigError;
use crate::protocol::{Channel, ProtocolConfig};
use crate::sensors::SensorKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Radio identity and credentials
    pub radio: RadioConfig,
    /// Sampling and framing
    pub sampling: SamplingConfig,
    /// Emergency thresholds
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Attached sensors and their wiring
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    /// Battery gauge calibration
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Fallback network
    pub fallback: FallbackConfig,
}

impl NodeConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Check every derived value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol()?;
        self.radio.dev_eui()?;
        self.radio.app_eui()?;
        self.radio.app_key()?;
        if self.battery.min_raw >= self.battery.max_raw {
            return Err(ConfigError::InvalidBatteryRange {
                min: self.battery.min_raw,
                max: self.battery.max_raw,
            });
        }
        let mut seen: Vec<SensorKind> = Vec::new();
        for sensor in &self.sensors {
            let kind = sensor.kind();
            if seen.contains(&kind) {
                return Err(ConfigError::DuplicateSensor(kind.to_string()));
            }
            seen.push(kind);
        }
        Ok(())
    }

    /// Session protocol configuration
    pub fn protocol(&self) -> Result<ProtocolConfig, ConfigError> {
        ProtocolConfig::new(
            self.sampling.interval_minutes,
            self.sampling.samples_per_uplink,
            self.sampling.version,
        )
    }

    /// Whether a sensor kind is attached; the battery gauge always is
    pub fn has_sensor(&self, kind: SensorKind) -> bool {
        kind == SensorKind::Battery || self.sensors.iter().any(|s| s.kind() == kind)
    }
}

/// Radio network identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Device EUI, 8 bytes hex
    pub dev_eui: String,
    /// Application EUI, 8 bytes hex
    pub app_eui: String,
    /// Application key, 16 bytes hex
    pub app_key: String,
    /// Uplink data rate, used to derive the payload budget
    #[serde(default)]
    pub data_rate: u8,
}

impl RadioConfig {
    /// Parsed device EUI
    pub fn dev_eui(&self) -> Result<[u8; 8], ConfigError> {
        parse_hex("dev_eui", &self.dev_eui)
    }

    /// Parsed application EUI
    pub fn app_eui(&self) -> Result<[u8; 8], ConfigError> {
        parse_hex("app_eui", &self.app_eui)
    }

    /// Parsed application key
    pub fn app_key(&self) -> Result<[u8; 16], ConfigError> {
        parse_hex("app_key", &self.app_key)
    }

    /// Device identity: the device EUI as 16 lowercase hex digits
    pub fn device_id(&self) -> Result<String, ConfigError> {
        Ok(self
            .dev_eui()?
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    /// Maximum application payload for the configured data rate
    pub fn payload_budget(&self) -> usize {
        match self.data_rate {
            0..=2 => 51,  // SF12..SF10/125kHz
            3 => 115,     // SF9/125kHz
            _ => 242,     // SF8 and faster
        }
    }
}

/// Sampling and framing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Minutes between wake-ups
    pub interval_minutes: u8,
    /// Samples gathered before a narrowband uplink
    #[serde(default = "default_one")]
    pub samples_per_uplink: u8,
    /// Requested frame version
    #[serde(default = "default_one")]
    pub version: u8,
    /// Maximum duty-cycle jitter in either direction (ms)
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u32,
}

fn default_one() -> u8 {
    1
}

fn default_jitter_ms() -> u32 {
    1000
}

/// Per-channel emergency thresholds
///
/// A reading at or above its threshold raises an emergency. Unset thresholds
/// never trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Temperature limit
    pub temperature: Option<f32>,
    /// Pressure limit
    pub pressure: Option<f32>,
    /// Humidity limit
    pub humidity: Option<f32>,
    /// CO2 limit
    pub co2: Option<f32>,
    /// Noise limit
    pub noise: Option<f32>,
    /// Air-quality index limit
    pub air_quality: Option<f32>,
}

impl Thresholds {
    /// Threshold for a channel, if one is monitored
    pub fn limit(&self, channel: Channel) -> Option<f64> {
        let limit = match channel {
            Channel::Temperature => self.temperature,
            Channel::Pressure => self.pressure,
            Channel::Humidity => self.humidity,
            Channel::Co2 => self.co2,
            Channel::Noise => self.noise,
            Channel::AirQuality => self.air_quality,
            _ => None,
        };
        limit.map(f64::from)
    }

    /// Whether `value` on `channel` raises an emergency
    pub fn exceeded(&self, channel: Channel, value: f64) -> bool {
        self.limit(channel).map_or(false, |limit| value >= limit)
    }
}

/// Attached sensor and its wiring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SensorConfig {
    /// Temperature/pressure/humidity on I2C
    Bme280 { sda: u8, scl: u8 },
    /// Temperature/pressure/humidity/air quality on I2C
    Bme680 { sda: u8, scl: u8 },
    /// MQ-135 gas sensor on an analog pin
    Gas { pin: u8 },
    /// GPS module on a serial port
    Gps { baud: u32, rx: u8, tx: u8 },
    /// Sound sensor on an analog pin
    Sound { pin: u8 },
}

impl SensorConfig {
    /// Sensor kind
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorConfig::Bme280 { .. } => SensorKind::Bme280,
            SensorConfig::Bme680 { .. } => SensorKind::Bme680,
            SensorConfig::Gas { .. } => SensorKind::Gas,
            SensorConfig::Gps { .. } => SensorKind::Gps,
            SensorConfig::Sound { .. } => SensorKind::Sound,
        }
    }
}

/// Battery gauge calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Raw reading of an empty battery
    pub min_raw: u16,
    /// Raw reading of a full battery
    pub max_raw: u16,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            min_raw: 1606,
            max_raw: 2127,
        }
    }
}

/// Fallback network credentials and endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Access point name
    pub ssid: String,
    /// Access point password
    pub password: String,
    /// Key for the approximate-location service
    #[serde(default)]
    pub geolocation_key: String,
    /// HTTPS endpoint receiving fallback documents
    pub endpoint: String,
    /// Bearer token for the endpoint
    pub token: String,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Approximate locations less accurate than this are ignored (meters)
    #[serde(default = "default_max_location_accuracy_m")]
    pub max_location_accuracy_m: f32,
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_max_location_accuracy_m() -> f32 {
    500.0
}

impl FallbackConfig {
    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_hex<const N: usize>(field: &'static str, text: &str) -> Result<[u8; N], ConfigError> {
    let err = ConfigError::InvalidHex { field, expected: N };
    let text = text.trim();
    if text.len() != N * 2 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(err);
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).map_err(|_| err.clone())?;
    }
    Ok(out)
}
