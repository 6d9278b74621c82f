// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fallback document encoder
//!
//! Emergency flushes leave over the fallback network as JSON. The document
//! mirrors the binary frame:
//!
//! - version 1: one flat object of fields
//! - version 2: `interval` plus a `measurements` array of per-timestamp objects
//! - version 3: as version 2, with latitude/longitude/altitude hoisted to the
//!   top level from the last written slot
//!
//! Float values are rounded to the precision kept on the wire so both
//! channels report the same numbers.

use crate::buffer::{SampleBuffer, SampleSlot};
use crate::protocol::{Channel, ProtocolConfig};
use serde_json::{json, Map, Value};

/// Authenticated POST handed to the fallback network
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackRequest {
    /// Endpoint URL
    pub url: String,
    /// `Authorization` header value
    pub authorization: String,
    /// `Content-Type` header value
    pub content_type: &'static str,
    /// JSON body
    pub body: String,
}

impl FallbackRequest {
    /// Header name/value pairs
    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [
            ("Authorization", self.authorization.as_str()),
            ("Content-Type", self.content_type),
        ]
    }
}

/// Encoder for fallback documents
#[derive(Debug, Clone)]
pub struct FallbackEncoder {
    config: ProtocolConfig,
    device_id: String,
}

impl FallbackEncoder {
    /// Create an encoder; `device_id` is the lowercase hex device EUI
    pub fn new(config: ProtocolConfig, device_id: impl Into<String>) -> Self {
        Self {
            config,
            device_id: device_id.into(),
        }
    }

    /// Device identity the document is keyed by
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Decoded-payload object for the written prefix of `buffer`
    pub fn payload(&self, buffer: &SampleBuffer) -> Value {
        let version = self.config.version();
        let mut payload = Map::new();
        payload.insert("version".into(), json!(version.as_u8()));

        if !version.is_framed() {
            if let Some(slot) = buffer.written().first() {
                insert_fields(&mut payload, slot, false);
            }
            return Value::Object(payload);
        }

        payload.insert("interval".into(), json!(self.config.interval_minutes()));

        let hoist = version.has_geolocation_block();
        if hoist {
            if let Some(last) = buffer.last_written() {
                for channel in Channel::GEOLOCATION {
                    insert_channel(&mut payload, last, channel);
                }
            }
        }

        let measurements: Vec<Value> = buffer
            .written()
            .iter()
            .enumerate()
            .map(|(timestamp, slot)| {
                let mut entry = Map::new();
                entry.insert("timestamp".into(), json!(timestamp));
                insert_fields(&mut entry, slot, hoist);
                Value::Object(entry)
            })
            .collect();
        payload.insert("measurements".into(), Value::Array(measurements));

        Value::Object(payload)
    }

    /// Full document: device identity plus the decoded payload
    pub fn document(&self, buffer: &SampleBuffer) -> Value {
        json!({
            "end_device_ids": { "dev_eui": self.device_id },
            "uplink_message": { "decoded_payload": self.payload(buffer) },
        })
    }

    /// Request posting the document to `endpoint` with a bearer `token`
    pub fn request(&self, buffer: &SampleBuffer, endpoint: &str, token: &str) -> FallbackRequest {
        FallbackRequest {
            url: endpoint.to_string(),
            authorization: format!("Bearer {}", token),
            content_type: "application/json",
            body: self.document(buffer).to_string(),
        }
    }
}

fn insert_fields(map: &mut Map<String, Value>, slot: &SampleSlot, skip_geolocation: bool) {
    for channel in Channel::SLOT_ORDER {
        if skip_geolocation && channel.is_geolocation() {
            continue;
        }
        insert_channel(map, slot, channel);
    }
}

fn insert_channel(map: &mut Map<String, Value>, slot: &SampleSlot, channel: Channel) {
    if !slot.is_present(channel) {
        return;
    }
    let value = match slot.get(channel) {
        Some(v) => v,
        None => return,
    };
    let json = if channel.is_integer() {
        json!(value as u64)
    } else {
        let scale = channel.scale();
        match serde_json::Number::from_f64((value * scale).round() / scale) {
            Some(n) => Value::Number(n),
            None => return,
        }
    };
    map.insert(channel.name().into(), json);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(samples: u8, version: u8) -> FallbackEncoder {
        let config = ProtocolConfig::new(10, samples, version).unwrap();
        FallbackEncoder::new(config, "70b3d57ed0041234")
    }

    #[test]
    fn test_v1_flat_object() {
        let mut buffer = SampleBuffer::new(1);
        buffer.write(0, Channel::Battery, 80.0).unwrap();
        buffer.write(0, Channel::Temperature, 21.456).unwrap();

        let payload = encoder(1, 1).payload(&buffer);
        assert_eq!(
            payload,
            json!({ "version": 1, "battery": 80, "temperature": 21.46 })
        );
    }

    #[test]
    fn test_v2_measurements_array() {
        let mut buffer = SampleBuffer::new(5);
        buffer.write(0, Channel::Temperature, 22.5).unwrap();
        buffer.write(1, Channel::Battery, 55.0).unwrap();
        buffer.write(1, Channel::Noise, 0.0).unwrap();

        let payload = encoder(5, 2).payload(&buffer);
        assert_eq!(
            payload,
            json!({
                "version": 2,
                "interval": 10,
                "measurements": [
                    { "timestamp": 0, "temperature": 22.5 },
                    { "timestamp": 1, "battery": 55 },
                ]
            })
        );
    }

    #[test]
    fn test_v3_hoists_geolocation() {
        let mut buffer = SampleBuffer::new(8);
        buffer.write(0, Channel::Latitude, 10.0).unwrap();
        buffer.write(0, Channel::Co2, 415.0).unwrap();
        buffer.write(1, Channel::Latitude, 50.5).unwrap();
        buffer.write(1, Channel::Longitude, 4.25).unwrap();

        let payload = encoder(8, 3).payload(&buffer);
        assert_eq!(payload["latitude"], json!(50.5));
        assert_eq!(payload["longitude"], json!(4.25));
        assert!(payload.get("altitude").is_none());
        assert_eq!(
            payload["measurements"],
            json!([{ "timestamp": 0, "co2": 415.0 }, { "timestamp": 1 }])
        );
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = SampleBuffer::new(5);
        assert_eq!(
            encoder(5, 2).payload(&buffer),
            json!({ "version": 2, "interval": 10, "measurements": [] })
        );
        assert_eq!(encoder(1, 1).payload(&buffer), json!({ "version": 1 }));
    }

    #[test]
    fn test_document_envelope() {
        let buffer = SampleBuffer::new(1);
        let doc = encoder(1, 1).document(&buffer);
        assert_eq!(doc["end_device_ids"]["dev_eui"], "70b3d57ed0041234");
        assert_eq!(doc["uplink_message"]["decoded_payload"]["version"], 1);
    }

    #[test]
    fn test_request_headers() {
        let mut buffer = SampleBuffer::new(1);
        buffer.write(0, Channel::Humidity, 40.0).unwrap();
        let request = encoder(1, 1).request(&buffer, "https://example.org/ingest", "abc");

        assert_eq!(request.url, "https://example.org/ingest");
        assert_eq!(request.headers()[0], ("Authorization", "Bearer abc"));
        assert_eq!(request.headers()[1], ("Content-Type", "application/json"));

        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["uplink_message"]["decoded_payload"]["humidity"], 40.0);
    }
}
