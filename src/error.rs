// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for envnode
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Main error type for node operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Frame encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Frame decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Retained storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Radio stack failed to initialize
    #[error("Radio error: {0}")]
    Radio(String),

    /// Write past the end of the sample buffer
    #[error("Slot {index} out of range for buffer of capacity {capacity}")]
    SlotOutOfRange { index: usize, capacity: usize },
}

/// Errors while building an uplink frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Destination cannot hold the frame
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Errors while decoding an uplink frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Empty frame
    #[error("Empty frame")]
    Empty,

    /// Version byte is not 1, 2 or 3
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Header byte does not map to a channel
    #[error("Unknown channel header 0x{tag:02x} at offset {offset}")]
    UnknownHeader { tag: u8, offset: usize },

    /// Frame ends inside a field
    #[error("Frame truncated at offset {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    /// Slot never terminated
    #[error("Missing slot terminator for timestamp {timestamp}")]
    MissingTerminator { timestamp: u8 },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// JSON could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// Protocol version outside 1..=3
    #[error("Invalid protocol version: {0}")]
    InvalidVersion(u8),

    /// Sampling interval of zero minutes
    #[error("Sampling interval must be at least one minute")]
    ZeroInterval,

    /// Hex credential of the wrong size or alphabet
    #[error("Invalid {field}: expected {expected} hex bytes")]
    InvalidHex { field: &'static str, expected: usize },

    /// Battery calibration with min >= max
    #[error("Invalid battery calibration: min {min} must be below max {max}")]
    InvalidBatteryRange { min: u16, max: u16 },

    /// The same sensor kind listed twice
    #[error("Sensor listed twice: {0}")]
    DuplicateSensor(String),
}

/// Failures reported by a sensor read
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// The sensor reported itself as absent; it stays disconnected
    #[error("Sensor not connected")]
    NotConnected,

    /// The sensor has no data this cycle
    #[error("Sensor not ready")]
    NotReady,
}

/// Errors related to the retained state image
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Backend I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Image does not start with the expected magic
    #[error("Bad magic bytes")]
    BadMagic,

    /// Image written by an unknown format revision
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(u16),

    /// Image checksum mismatch
    #[error("Invalid checksum: expected {expected:08x}, got {actual:08x}")]
    InvalidChecksum { expected: u32, actual: u32 },

    /// Image ends early
    #[error("Image too short: need {needed} bytes, got {available}")]
    TooShort { needed: usize, available: usize },

    /// Image fields are inconsistent
    #[error("Corrupted image: {0}")]
    Corrupted(String),

    /// Calibration blob too long for the image
    #[error("Calibration of {sensor} too large: {len} bytes")]
    CalibrationTooLarge { sensor: String, len: usize },
}
