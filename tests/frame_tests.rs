// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Integration tests for the uplink frame
//!
//! Encoder output is checked byte-for-byte against known frames and decoded
//! back with the network-side decoder.

use approx::assert_relative_eq;
use envnode::encoder::PacketCodec;
use envnode::protocol::{Channel, ProtocolConfig, ProtocolVersion, MAX_SAMPLES};
use envnode::{SampleBuffer, UplinkDecoder};

fn codec(samples: u8, version: u8) -> PacketCodec {
    PacketCodec::new(ProtocolConfig::new(10, samples, version).unwrap())
}

/// Buffer with a realistic reading in every slot up to `slots`
fn filled_buffer(capacity: usize, slots: usize) -> SampleBuffer {
    let mut buffer = SampleBuffer::new(capacity);
    for i in 0..slots {
        let t = i as f64;
        buffer.write(i, Channel::Battery, 90.0 - t).unwrap();
        buffer.write(i, Channel::Temperature, 21.37 + t * 0.5).unwrap();
        buffer.write(i, Channel::Pressure, 101_325.0 - t * 10.0).unwrap();
        buffer.write(i, Channel::Humidity, 45.5).unwrap();
        buffer.write(i, Channel::Latitude, 50.668_123).unwrap();
        buffer.write(i, Channel::Longitude, 4.611_987).unwrap();
        buffer.write(i, Channel::Altitude, 103.25).unwrap();
        buffer.write(i, Channel::Co2, 412.0 + t).unwrap();
        buffer.write(i, Channel::Noise, 300.0 + t).unwrap();
    }
    buffer
}

#[test]
fn test_reference_v2_frame() {
    let codec = codec(5, 2);
    let mut buffer = SampleBuffer::new(codec.config().capacity());
    buffer.write(0, Channel::Temperature, 22.5).unwrap();
    buffer.write(1, Channel::Battery, 55.0).unwrap();

    assert_eq!(
        codec.encode(&buffer),
        vec![0x02, 0x0A, 0x00, 0x02, 0x00, 0x00, 0x08, 0xCA, 0x00, 0x01, 0x01, 0x37, 0x00]
    );
}

#[test]
fn test_roundtrip_every_version() {
    for (samples, version) in [(1u8, 1u8), (5, 2), (8, 3)] {
        let codec = codec(samples, version);
        let capacity = codec.config().capacity();
        let buffer = filled_buffer(capacity, capacity);

        let frame = codec.encode(&buffer);
        let decoded = UplinkDecoder::new().decode(&frame).unwrap();
        assert_eq!(decoded.version, codec.config().version());
        assert_eq!(decoded.slots.len(), capacity);

        for (i, decoded_slot) in decoded.slots.iter().enumerate() {
            let original = buffer.slot(i).unwrap();
            assert_eq!(decoded_slot.timestamp as usize, if version == 1 { 0 } else { i });
            for channel in Channel::SLOT_ORDER {
                let sent = match original.get(channel) {
                    Some(v) => v,
                    None => continue,
                };
                let received = if channel.is_geolocation()
                    && decoded.version == ProtocolVersion::V3
                {
                    decoded.fixed.get(channel).unwrap()
                } else {
                    decoded_slot.slot.get(channel).unwrap()
                };
                assert_relative_eq!(sent, received, epsilon = 0.006);
            }
        }
    }
}

#[test]
fn test_slot_size_formula() {
    let codec = codec(5, 2);
    let mut buffer = SampleBuffer::new(5);
    buffer.write(0, Channel::Battery, 42.0).unwrap();
    buffer.write(0, Channel::Light, 1200.0).unwrap();
    buffer.write(0, Channel::Co2, 800.0).unwrap();

    // timestamp + (1+1) + (1+2) + (1+4) + terminator
    let frame = codec.encode(&buffer);
    assert_eq!(frame.len(), 2 + 1 + 2 + 3 + 5 + 1);
}

#[test]
fn test_cleared_buffer_is_preamble_only() {
    for (samples, version, expected) in [
        (1u8, 1u8, vec![0x01]),
        (5, 2, vec![0x02, 10]),
        (8, 3, vec![0x03, 10]),
    ] {
        let codec = codec(samples, version);
        let capacity = codec.config().capacity();
        let mut buffer = filled_buffer(capacity, capacity);
        buffer.clear();
        assert_eq!(codec.encode(&buffer), expected);
    }
}

#[test]
fn test_v3_block_uses_last_written_slot() {
    let codec = codec(8, 3);
    let mut buffer = SampleBuffer::new(8);
    buffer.write(0, Channel::Latitude, 1.0).unwrap();
    buffer.write(0, Channel::Longitude, 2.0).unwrap();
    buffer.write(3, Channel::Battery, 12.0).unwrap();

    // slot 3 carries no geolocation, so the block is empty
    let frame = codec.encode(&buffer);
    let decoded = UplinkDecoder::new().decode(&frame).unwrap();
    assert_eq!(decoded.fixed.latitude, None);
    assert_eq!(decoded.slots.len(), 4);
    assert_eq!(decoded.slots[0].slot.latitude, None);
    assert_eq!(decoded.slots[3].slot.battery, Some(12));
}

#[test]
fn test_full_v3_frame_within_max_len() {
    let codec = codec(8, 3);
    let buffer = filled_buffer(MAX_SAMPLES, MAX_SAMPLES);
    let frame = codec.encode(&buffer);

    assert!(frame.len() <= codec.max_frame_len(&buffer));
    let mut exact = vec![0u8; frame.len()];
    assert_eq!(codec.encode_into(&buffer, &mut exact).unwrap(), frame.len());
    let mut short = vec![0u8; frame.len() - 1];
    assert!(codec.encode_into(&buffer, &mut short).is_err());
}

#[test]
fn test_v1_zero_battery_omitted() {
    let codec = codec(1, 1);
    let mut buffer = SampleBuffer::new(1);
    buffer.write(0, Channel::Battery, 0.0).unwrap();
    buffer.write(0, Channel::Noise, 7.0).unwrap();
    assert_eq!(codec.encode(&buffer), vec![0x01, 0x0A, 0x00, 0x07]);
}
