// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # envnode - Environmental sensor node core
//!
//! Firmware core of a battery-powered environmental sensor node: it samples
//! sensors on a jittered duty cycle, batches readings into a bounded buffer
//! and sends them as compact binary frames over a narrowband radio, escalating
//! to a fallback network when a reading crosses an emergency threshold.
//!
//! ## Key Features
//!
//! - **Sparse fixed-point frames**: only present channels are sent, each tagged
//!   with a 1-byte header
//! - **Versioned batching**: 1, 5 or 8 timestamped slots per frame
//! - **Emergency escalation**: threshold crossings flush immediately as JSON
//!   over the fallback network
//! - **Retained state**: buffer, counters and calibration survive deep sleep
//!
//! ## Quick Start
//!
//! ```rust
//! use envnode::{Channel, PacketCodec, ProtocolConfig, SampleBuffer};
//!
//! let config = ProtocolConfig::new(10, 5, 2).unwrap();
//! let mut buffer = SampleBuffer::new(config.capacity());
//! buffer.write(0, Channel::Temperature, 22.5).unwrap();
//! buffer.write(1, Channel::Battery, 55.0).unwrap();
//!
//! let frame = PacketCodec::new(config).encode(&buffer);
//! assert_eq!(
//!     frame,
//!     [0x02, 0x0A, 0x00, 0x02, 0x00, 0x00, 0x08, 0xCA, 0x00, 0x01, 0x01, 0x37, 0x00]
//! );
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Channels, versions and the session configuration
//! - [`buffer`]: Sample slots and the bounded buffer
//! - [`encoder`]: Binary frame encoding
//! - [`decoder`]: Network-side frame decoding
//! - [`fallback`]: JSON documents for the fallback network
//! - [`orchestrator`]: The device state machine
//! - [`sensors`]: Sensor capability set and adapters
//! - [`channel`]: Radio, fallback network and power rail collaborators
//! - [`state`]: Retained state and storage backends
//! - [`config`]: JSON configuration
//! - [`metrics`]: Per-boot counters

// Modules
pub mod buffer;
pub mod channel;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fallback;
pub mod frame;
pub mod location;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod sensors;
pub mod state;

// Re-exports for convenient access
pub use buffer::{SampleBuffer, SampleSlot};
pub use channel::{
    AccessoryPower, FallbackNetwork, MemoryFallback, MemoryPower, MemoryRadio, PowerEvent,
    RadioStack,
};
pub use config::NodeConfig;
pub use decoder::{DecodedSlot, DecodedUplink, UplinkDecoder};
pub use encoder::PacketCodec;
pub use error::{NodeError, Result};
pub use fallback::{FallbackEncoder, FallbackRequest};
pub use location::{Location, LocationFix};
pub use metrics::NodeMetrics;
pub use orchestrator::{DutyCycle, SampleOrchestrator, Step};
pub use protocol::{Channel, ProtocolConfig, ProtocolVersion};
pub use sensors::{Measurement, Sensor, SensorKind};
pub use state::{DeviceState, FileStorage, MemoryStorage, NodeState, RetainedStorage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_basic_roundtrip() {
        let config = ProtocolConfig::new(5, 8, 3).unwrap();
        let mut buffer = SampleBuffer::new(config.capacity());
        buffer.write(0, Channel::Humidity, 48.25).unwrap();
        buffer.write(0, Channel::Latitude, 50.668).unwrap();

        let frame = PacketCodec::new(config).encode(&buffer);
        let decoded = UplinkDecoder::new().decode(&frame).unwrap();

        assert_eq!(decoded.slots[0].slot.humidity, Some(48.25));
        assert!((decoded.fixed.latitude.unwrap() - 50.668).abs() < 1e-5);
    }
}
