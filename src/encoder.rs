// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Uplink frame encoder
//!
//! Serializes the written prefix of a [`SampleBuffer`] into the sparse,
//! header-tagged binary frame sent over the narrowband channel.
//!
//! # Frame Format
//!
//! ```text
//! [version: 1] [interval: 1, v>1]
//! [lat field] [lon field] [alt field]            (v3 only, from the last slot)
//! per slot:
//!   [timestamp: 1, v>1] [header: 1][value: 1|2|4 BE]... [0x00, v>1]
//! ```
//!
//! Float channels are sent as `round(value * 10^precision)` in a 4-byte
//! signed big-endian integer; integer channels are sent as-is.

use crate::buffer::{SampleBuffer, SampleSlot};
use crate::error::EncodeError;
use crate::frame::FrameWriter;
use crate::protocol::{Channel, ProtocolConfig, SLOT_TERMINATOR};

/// Encoder for uplink frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    config: ProtocolConfig,
}

impl PacketCodec {
    /// Create an encoder for the session configuration
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    /// Session configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Destination size guaranteed to hold the frame for `buffer`
    pub fn max_frame_len(&self, buffer: &SampleBuffer) -> usize {
        ProtocolConfig::max_frame_len(buffer.high_water_mark().unwrap_or(0))
    }

    /// Encode the buffer into a freshly allocated frame
    pub fn encode(&self, buffer: &SampleBuffer) -> Vec<u8> {
        let mut frame = vec![0u8; self.max_frame_len(buffer)];
        let len = self
            .encode_into(buffer, &mut frame)
            .expect("frame destination sized to its theoretical maximum");
        frame.truncate(len);
        frame
    }

    /// Encode the buffer into `dest`, returning the frame length
    ///
    /// Fails without truncating when `dest` is too small; size it with
    /// [`max_frame_len`](Self::max_frame_len).
    pub fn encode_into(&self, buffer: &SampleBuffer, dest: &mut [u8]) -> Result<usize, EncodeError> {
        let version = self.config.version();
        let mut writer = FrameWriter::new(dest);

        // Preamble
        writer.push(version.as_u8())?;
        if version.is_framed() {
            writer.push(self.config.interval_minutes())?;
        }

        // Geolocation block, once per frame
        if version.has_geolocation_block() {
            if let Some(last) = buffer.last_written() {
                for channel in Channel::GEOLOCATION {
                    write_channel(&mut writer, last, channel)?;
                }
            }
        }

        for (timestamp, slot) in buffer.written().iter().enumerate() {
            if version.is_framed() {
                writer.push(timestamp as u8)?;
            }
            for channel in Channel::SLOT_ORDER {
                if channel.is_geolocation() && version.has_geolocation_block() {
                    continue;
                }
                write_channel(&mut writer, slot, channel)?;
            }
            if version.is_framed() {
                writer.push(SLOT_TERMINATOR)?;
            }
        }

        Ok(writer.finish())
    }

    /// Encoded size of one slot under this configuration, geolocation block excluded
    pub fn slot_len(&self, slot: &SampleSlot) -> usize {
        let version = self.config.version();
        let framing = if version.is_framed() { 2 } else { 0 };
        framing
            + slot
                .present()
                .filter(|(c, _)| !(c.is_geolocation() && version.has_geolocation_block()))
                .map(|(c, _)| 1 + c.width())
                .sum::<usize>()
    }
}

fn write_channel(
    writer: &mut FrameWriter<'_>,
    slot: &SampleSlot,
    channel: Channel,
) -> Result<(), EncodeError> {
    if !slot.is_present(channel) {
        return Ok(());
    }
    match slot.get(channel) {
        Some(value) => {
            let (bytes, width) = encode_value(channel, value);
            writer.field(channel.header(), &bytes[..width])
        }
        None => Ok(()),
    }
}

/// Fixed-point integer sent for a float channel
///
/// Saturates at the `i32` range.
pub fn quantize(channel: Channel, value: f64) -> i32 {
    (value * channel.scale()).round() as i32
}

/// Wire bytes of a channel value, big-endian, with the used width
pub fn encode_value(channel: Channel, value: f64) -> ([u8; 4], usize) {
    let mut bytes = [0u8; 4];
    match channel.width() {
        1 => bytes[0] = value as u8,
        2 => bytes[..2].copy_from_slice(&(value as u16).to_be_bytes()),
        _ => bytes = quantize(channel, value).to_be_bytes(),
    }
    (bytes, channel.width())
}

/// Hex dump of a frame, `0x02 0x0A ...`
pub fn format_frame(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;

    fn codec(interval: u8, samples: u8, version: u8) -> PacketCodec {
        PacketCodec::new(ProtocolConfig::new(interval, samples, version).unwrap())
    }

    #[test]
    fn test_v2_reference_frame() {
        let codec = codec(10, 5, 2);
        let mut buffer = SampleBuffer::new(codec.config().capacity());
        buffer.write(0, Channel::Temperature, 22.5).unwrap();
        buffer.write(1, Channel::Battery, 55.0).unwrap();

        let frame = codec.encode(&buffer);
        assert_eq!(
            frame,
            vec![
                0x02, 0x0A, // preamble
                0x00, 0x02, 0x00, 0x00, 0x08, 0xCA, 0x00, // slot 0
                0x01, 0x01, 0x37, 0x00, // slot 1
            ]
        );
    }

    #[test]
    fn test_v1_zero_battery_omitted() {
        let codec = codec(10, 1, 1);
        let mut buffer = SampleBuffer::new(1);
        buffer.write(0, Channel::Battery, 0.0).unwrap();

        assert_eq!(codec.encode(&buffer), vec![0x01]);
    }

    #[test]
    fn test_v1_has_no_framing() {
        let codec = codec(10, 1, 1);
        let mut buffer = SampleBuffer::new(1);
        buffer.write(0, Channel::Battery, 80.0).unwrap();
        buffer.write(0, Channel::Light, 300.0).unwrap();

        assert_eq!(codec.encode(&buffer), vec![0x01, 0x01, 80, 0x06, 0x01, 0x2C]);
    }

    #[test]
    fn test_empty_buffer_is_preamble_only() {
        let buffer = SampleBuffer::new(8);
        assert_eq!(codec(10, 1, 1).encode(&buffer), vec![0x01]);
        assert_eq!(codec(15, 5, 2).encode(&buffer), vec![0x02, 15]);
        assert_eq!(codec(15, 8, 3).encode(&buffer), vec![0x03, 15]);
    }

    #[test]
    fn test_v3_geolocation_block_from_last_slot() {
        let codec = codec(5, 8, 3);
        let mut buffer = SampleBuffer::new(8);
        buffer.write(0, Channel::Latitude, 10.0).unwrap();
        buffer.write(0, Channel::Noise, 40.0).unwrap();
        buffer.write(1, Channel::Latitude, 50.5).unwrap();
        buffer.write(1, Channel::Altitude, 120.25).unwrap();

        let frame = codec.encode(&buffer);
        let mut expected = vec![0x03, 5];
        expected.push(0x07);
        expected.extend_from_slice(&50_500_000i32.to_be_bytes());
        expected.push(0x05);
        expected.extend_from_slice(&12_025i32.to_be_bytes());
        expected.extend_from_slice(&[0x00, 0x0A, 0x00, 40, 0x00]);
        expected.extend_from_slice(&[0x01, 0x00]);
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_v2_geolocation_per_slot_in_order() {
        let codec = codec(5, 5, 2);
        let mut buffer = SampleBuffer::new(5);
        buffer.write(0, Channel::Co2, 1.0).unwrap();
        buffer.write(0, Channel::Longitude, 4.6).unwrap();
        buffer.write(0, Channel::Light, 1.0).unwrap();

        let frame = codec.encode(&buffer);
        let headers: Vec<u8> = vec![frame[3], frame[6], frame[11]];
        assert_eq!(headers, vec![0x06, 0x08, 0x09]);
        assert_eq!(*frame.last().unwrap(), SLOT_TERMINATOR);
    }

    #[test]
    fn test_negative_values_are_signed() {
        let (bytes, width) = encode_value(Channel::Temperature, -12.34);
        assert_eq!(width, 4);
        assert_eq!(i32::from_be_bytes(bytes), -1234);
    }

    #[test]
    fn test_quantize_rounds_to_nearest() {
        assert_eq!(quantize(Channel::Humidity, 45.678), 4568);
        assert_eq!(quantize(Channel::Latitude, 50.668_12), 50_668_120);
        assert_eq!(quantize(Channel::Battery, 42.0), 42);
    }

    #[test]
    fn test_slot_len_matches_frame() {
        let codec = codec(10, 5, 2);
        let mut buffer = SampleBuffer::new(5);
        buffer.write(0, Channel::Battery, 70.0).unwrap();
        buffer.write(0, Channel::Pressure, 1013.25).unwrap();
        buffer.write(0, Channel::Noise, 33.0).unwrap();

        let frame = codec.encode(&buffer);
        let slot_len = codec.slot_len(buffer.slot(0).unwrap());
        assert_eq!(slot_len, 1 + 2 + 5 + 3 + 1);
        assert_eq!(frame.len(), 2 + slot_len);
    }

    #[test]
    fn test_encode_into_undersized_fails() {
        let codec = codec(10, 5, 2);
        let mut buffer = SampleBuffer::new(5);
        buffer.write(0, Channel::Temperature, 22.5).unwrap();

        let mut dest = [0u8; 4];
        let err = codec.encode_into(&buffer, &mut dest).unwrap_err();
        assert!(matches!(err, EncodeError::BufferTooSmall { available: 4, .. }));
    }

    #[test]
    fn test_full_buffer_fits_max_frame_len() {
        let codec = codec(10, 8, 3);
        let mut buffer = SampleBuffer::new(8);
        for i in 0..8 {
            for channel in Channel::SLOT_ORDER {
                buffer.write(i, channel, 12.0).unwrap();
            }
        }
        let frame = codec.encode(&buffer);
        assert!(frame.len() <= codec.max_frame_len(&buffer));
        assert_eq!(codec.config().version(), ProtocolVersion::V3);
    }

    #[test]
    fn test_format_frame() {
        assert_eq!(format_frame(&[0x02, 0x0A, 0x00]), "0x02 0x0A 0x00");
    }
}
