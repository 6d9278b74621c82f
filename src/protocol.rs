// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Protocol definitions for the uplink frame
//!
//! This module defines the core types shared by the encoder, the decoder and
//! the fallback document:
//! - Channel identifiers and their wire header tags
//! - Protocol versions and their slot capacity
//! - The per-session [`ProtocolConfig`]
//!
//! # Wire endianness
//!
//! Every multi-byte field is written big-endian. On the little-endian MCUs the
//! frame format was designed for, this is the byte-reverse of the native
//! integer layout, which is what the network-side decoder expects.

use crate::error::ConfigError;
use std::fmt;
use std::time::Duration;

/// Absolute maximum number of slots in one frame
pub const MAX_SAMPLES: usize = 8;

/// Float channels at or below this value are treated as absent on the wire
pub const ABSENT_FLOAT: f32 = -200.0;

/// Integer channels equal to this value are treated as absent on the wire
pub const ABSENT_INT: u16 = 0;

/// Byte closing the field list of a slot (version > 1)
pub const SLOT_TERMINATOR: u8 = 0x00;

/// Largest number of bytes one slot can occupy:
/// timestamp + every channel (header + value) + terminator
pub const MAX_SLOT_WIDTH: usize = 50;

/// Sensor channels carried in a slot
///
/// The discriminant is the channel's 1-byte header tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Battery percentage, 8-bit int
    Battery = 0x01,
    /// Temperature, fixed-point 2 decimals
    Temperature = 0x02,
    /// Pressure, fixed-point 2 decimals
    Pressure = 0x03,
    /// Relative humidity, fixed-point 2 decimals
    Humidity = 0x04,
    /// Altitude in meters, fixed-point 2 decimals
    Altitude = 0x05,
    /// Ambient light, 16-bit int
    Light = 0x06,
    /// Latitude, fixed-point 6 decimals
    Latitude = 0x07,
    /// Longitude, fixed-point 6 decimals
    Longitude = 0x08,
    /// CO2-equivalent concentration, fixed-point 2 decimals
    Co2 = 0x09,
    /// Noise level, 16-bit int
    Noise = 0x0A,
    /// Air-quality index, fixed-point 2 decimals
    AirQuality = 0x0B,
}

impl Channel {
    /// Emission order of the channels inside a slot
    pub const SLOT_ORDER: [Channel; 11] = [
        Channel::Battery,
        Channel::Temperature,
        Channel::Pressure,
        Channel::Humidity,
        Channel::Light,
        Channel::Latitude,
        Channel::Longitude,
        Channel::Altitude,
        Channel::Co2,
        Channel::Noise,
        Channel::AirQuality,
    ];

    /// Channels forming the version 3 geolocation block, in emission order
    pub const GEOLOCATION: [Channel; 3] =
        [Channel::Latitude, Channel::Longitude, Channel::Altitude];

    /// Header tag written before the value
    pub fn header(self) -> u8 {
        self as u8
    }

    /// Convert from a header tag
    pub fn from_header(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Channel::Battery),
            0x02 => Some(Channel::Temperature),
            0x03 => Some(Channel::Pressure),
            0x04 => Some(Channel::Humidity),
            0x05 => Some(Channel::Altitude),
            0x06 => Some(Channel::Light),
            0x07 => Some(Channel::Latitude),
            0x08 => Some(Channel::Longitude),
            0x09 => Some(Channel::Co2),
            0x0A => Some(Channel::Noise),
            0x0B => Some(Channel::AirQuality),
            _ => None,
        }
    }

    /// Width of the encoded value in bytes (excluding header)
    pub fn width(self) -> usize {
        match self {
            Channel::Battery => 1,
            Channel::Light | Channel::Noise => 2,
            _ => 4,
        }
    }

    /// Decimal places kept by the fixed-point encoding, `None` for integer channels
    pub fn precision(self) -> Option<u32> {
        match self {
            Channel::Battery | Channel::Light | Channel::Noise => None,
            Channel::Latitude | Channel::Longitude => Some(6),
            _ => Some(2),
        }
    }

    /// Whether the channel carries an integer value
    pub fn is_integer(self) -> bool {
        self.precision().is_none()
    }

    /// Whether the channel belongs to the geolocation triplet
    pub fn is_geolocation(self) -> bool {
        matches!(
            self,
            Channel::Latitude | Channel::Longitude | Channel::Altitude
        )
    }

    /// Field name used in the fallback document
    pub fn name(self) -> &'static str {
        match self {
            Channel::Battery => "battery",
            Channel::Temperature => "temperature",
            Channel::Pressure => "pressure",
            Channel::Humidity => "humidity",
            Channel::Altitude => "altitude",
            Channel::Light => "light",
            Channel::Latitude => "latitude",
            Channel::Longitude => "longitude",
            Channel::Co2 => "co2",
            Channel::Noise => "noise",
            Channel::AirQuality => "airQuality",
        }
    }

    /// Scale factor `10^precision` for float channels, 1 for integers
    pub fn scale(self) -> f64 {
        match self.precision() {
            Some(p) => 10f64.powi(p as i32),
            None => 1.0,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Uplink frame format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// One implicit slot, no interval, no framing
    #[default]
    V1 = 1,
    /// Up to 5 timestamped slots, geolocation per slot
    V2 = 2,
    /// Up to 8 timestamped slots, one geolocation block per frame
    V3 = 3,
}

impl ProtocolVersion {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolVersion::V1),
            2 => Some(ProtocolVersion::V2),
            3 => Some(ProtocolVersion::V3),
            _ => None,
        }
    }

    /// Version byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maximum number of slots a frame of this version carries
    pub fn capacity(self) -> usize {
        let capacity = match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 5,
            ProtocolVersion::V3 => 8,
        };
        capacity.min(MAX_SAMPLES)
    }

    /// Whether the preamble carries the interval byte and slots are
    /// timestamped and terminated
    pub fn is_framed(self) -> bool {
        self != ProtocolVersion::V1
    }

    /// Whether geolocation is sent once per frame instead of per slot
    pub fn has_geolocation_block(self) -> bool {
        self == ProtocolVersion::V3
    }
}

/// Immutable per-session protocol configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    version: ProtocolVersion,
    interval_minutes: u8,
    samples_per_uplink: usize,
}

impl ProtocolConfig {
    /// Derive the session configuration from the requested values
    ///
    /// A single requested sample forces version 1; several samples with a
    /// requested version 1 upgrade to version 2. The number of samples per
    /// uplink is capped silently at the version capacity; zero counts as one.
    pub fn new(
        interval_minutes: u8,
        requested_samples: u8,
        requested_version: u8,
    ) -> Result<Self, ConfigError> {
        if interval_minutes == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let requested = ProtocolVersion::from_u8(requested_version)
            .ok_or(ConfigError::InvalidVersion(requested_version))?;

        let samples = requested_samples.max(1) as usize;
        let version = match (samples, requested) {
            (1, _) => ProtocolVersion::V1,
            (_, ProtocolVersion::V1) => ProtocolVersion::V2,
            (_, v) => v,
        };

        Ok(Self {
            version,
            interval_minutes,
            samples_per_uplink: samples.min(version.capacity()),
        })
    }

    /// Selected protocol version
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Sampling interval in minutes
    pub fn interval_minutes(&self) -> u8 {
        self.interval_minutes
    }

    /// Sampling interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes as u64 * 60)
    }

    /// Slot capacity of the selected version
    pub fn capacity(&self) -> usize {
        self.version.capacity()
    }

    /// Number of slots buffered before a narrowband flush
    pub fn samples_per_uplink(&self) -> usize {
        self.samples_per_uplink
    }

    /// Theoretical maximum frame size for a buffer whose last written slot
    /// is `high_water_mark`
    pub fn max_frame_len(high_water_mark: usize) -> usize {
        2 + (high_water_mark + 2) * MAX_SLOT_WIDTH
    }
}
