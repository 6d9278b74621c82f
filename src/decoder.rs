// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Uplink frame decoder
//!
//! Network-side counterpart of [`PacketCodec`](crate::encoder::PacketCodec).
//! The node itself never decodes; this is used by tooling on the receiving
//! end and to check encoder output.
//!
//! Fields are located by header tag, never by offset.

use crate::buffer::SampleSlot;
use crate::error::DecodeError;
use crate::protocol::{Channel, ProtocolVersion, SLOT_TERMINATOR};

/// One decoded timestamped slot
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSlot {
    /// Position of the slot in the batch
    pub timestamp: u8,
    /// Decoded channels
    pub slot: SampleSlot,
}

/// A decoded uplink frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedUplink {
    /// Protocol version
    pub version: ProtocolVersion,
    /// Sampling interval in minutes (version > 1)
    pub interval_minutes: Option<u8>,
    /// Fields sent once per frame (version 3 geolocation block)
    pub fixed: SampleSlot,
    /// Decoded slots; version 1 yields exactly one with timestamp 0
    pub slots: Vec<DecodedSlot>,
}

/// Decoder for uplink frames
#[derive(Debug, Clone, Default)]
pub struct UplinkDecoder;

impl UplinkDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }

    /// Decode a complete frame
    pub fn decode(&self, frame: &[u8]) -> Result<DecodedUplink, DecodeError> {
        let version_byte = *frame.first().ok_or(DecodeError::Empty)?;
        let version = ProtocolVersion::from_u8(version_byte)
            .ok_or(DecodeError::UnsupportedVersion(version_byte))?;

        if !version.is_framed() {
            let mut slot = SampleSlot::new();
            let mut pos = 1;
            while pos < frame.len() {
                pos = read_field(frame, pos, &mut slot)?;
            }
            return Ok(DecodedUplink {
                version,
                interval_minutes: None,
                fixed: SampleSlot::new(),
                slots: vec![DecodedSlot { timestamp: 0, slot }],
            });
        }

        let interval = *frame.get(1).ok_or(DecodeError::Truncated {
            offset: 1,
            needed: 1,
        })?;
        let mut pos = 2;

        // Leading geolocation fields are frame-wide
        let mut fixed = SampleSlot::new();
        while let Some(channel) = frame.get(pos).and_then(|&tag| Channel::from_header(tag)) {
            if !channel.is_geolocation() {
                break;
            }
            pos = read_field(frame, pos, &mut fixed)?;
        }

        let mut slots = Vec::new();
        while pos < frame.len() {
            let timestamp = frame[pos];
            pos += 1;
            let mut slot = SampleSlot::new();
            loop {
                match frame.get(pos) {
                    Some(&SLOT_TERMINATOR) => {
                        pos += 1;
                        break;
                    }
                    Some(_) => pos = read_field(frame, pos, &mut slot)?,
                    None => return Err(DecodeError::MissingTerminator { timestamp }),
                }
            }
            slots.push(DecodedSlot { timestamp, slot });
        }

        Ok(DecodedUplink {
            version,
            interval_minutes: Some(interval),
            fixed,
            slots,
        })
    }
}

/// Read one header-tagged field at `pos` into `slot`, returning the next offset
fn read_field(frame: &[u8], pos: usize, slot: &mut SampleSlot) -> Result<usize, DecodeError> {
    let tag = frame[pos];
    let channel = Channel::from_header(tag).ok_or(DecodeError::UnknownHeader { tag, offset: pos })?;
    let start = pos + 1;
    let end = start + channel.width();
    if end > frame.len() {
        return Err(DecodeError::Truncated {
            offset: start,
            needed: end - frame.len(),
        });
    }
    let raw = &frame[start..end];
    let value = match channel.width() {
        1 => raw[0] as f64,
        2 => u16::from_be_bytes([raw[0], raw[1]]) as f64,
        _ => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64 / channel.scale(),
    };
    slot.set(channel, value);
    Ok(end)
}
