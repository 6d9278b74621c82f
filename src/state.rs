// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Retained device state
//!
//! Everything that must survive deep sleep lives in [`DeviceState`] and is
//! written to a [`RetainedStorage`] before every sleep.
//!
//! # Image Format
//!
//! Little-endian throughout:
//!
//! ```text
//! magic "ENVN" (4) | format (2) | state (1) | count (1) | flags (1)
//! location: presence (1) | latitude f64 | longitude f64 | altitude f64
//! disconnected mask (1)
//! capacity (1) | high-water mark (1, 0xFF = none) | slots (capacity x 39)
//! calibration: count (1) | { sensor id (1) | len (2) | bytes }...
//! CRC-32 of everything above (4)
//! ```

use crate::buffer::{SampleBuffer, SampleSlot};
use crate::error::StorageError;
use crate::location::Location;
use crate::protocol::MAX_SAMPLES;
use crate::sensors::SensorKind;
use crc::{Crc, CRC_32_ISO_HDLC};
use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Magic bytes opening a retained image
pub const IMAGE_MAGIC: [u8; 4] = *b"ENVN";

/// Current image format revision
pub const IMAGE_FORMAT: u16 = 1;

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const FLAG_STARTUP: u8 = 0x01;
const FLAG_ALTITUDE_GPS: u8 = 0x02;
const NO_MARK: u8 = 0xFF;
const SLOT_IMAGE_LEN: usize = 39;

/// Largest calibration blob a retained image can carry
pub const MAX_CALIBRATION_LEN: usize = u16::MAX as usize;

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum NodeState {
    /// Radio stack not initialized
    #[default]
    Init = 0,
    /// Joining the network
    Join = 1,
    /// Sampling and flushing
    Send = 2,
    /// Scheduling the next wake-up
    Cycle = 3,
    /// Suspending
    Sleep = 4,
}

impl NodeState {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NodeState::Init),
            1 => Some(NodeState::Join),
            2 => Some(NodeState::Send),
            3 => Some(NodeState::Cycle),
            4 => Some(NodeState::Sleep),
            _ => None,
        }
    }
}

/// State retained across deep sleep
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Lifecycle state
    pub state: NodeState,
    /// Write position in the buffer
    pub count: u8,
    /// Set until the first post-join wake has been skipped
    pub startup: bool,
    /// Last-known location
    pub location: Location,
    /// Sample buffer
    pub buffer: SampleBuffer,
    /// Calibration blobs per sensor
    pub calibration: BTreeMap<SensorKind, Vec<u8>>,
    disconnected: u8,
}

impl DeviceState {
    /// Power-on state for a buffer of `capacity` slots
    pub fn cold_boot(capacity: usize) -> Self {
        Self {
            state: NodeState::Init,
            count: 0,
            startup: true,
            location: Location::new(),
            buffer: SampleBuffer::new(capacity),
            calibration: BTreeMap::new(),
            disconnected: 0,
        }
    }

    /// Whether a sensor reported itself absent this session
    pub fn is_disconnected(&self, kind: SensorKind) -> bool {
        self.disconnected & kind.mask_bit() != 0
    }

    /// Mark a sensor as absent for the rest of the session
    pub fn mark_disconnected(&mut self, kind: SensorKind) {
        self.disconnected |= kind.mask_bit();
    }

    /// Disconnected sensors, in acquisition order
    pub fn disconnected(&self) -> Vec<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .filter(|k| self.is_disconnected(*k))
            .collect()
    }

    /// Serialize to a retained image
    ///
    /// Fails when a calibration blob is longer than [`MAX_CALIBRATION_LEN`].
    pub fn to_image(&self) -> Result<Vec<u8>, StorageError> {
        let mut bytes = Vec::with_capacity(64 + self.buffer.capacity() * SLOT_IMAGE_LEN);

        bytes.extend_from_slice(&IMAGE_MAGIC);
        bytes.extend_from_slice(&IMAGE_FORMAT.to_le_bytes());
        bytes.push(self.state as u8);
        bytes.push(self.count);

        let mut flags = 0;
        if self.startup {
            flags |= FLAG_STARTUP;
        }
        if self.location.altitude_from_gps {
            flags |= FLAG_ALTITUDE_GPS;
        }
        bytes.push(flags);

        let coords = [
            self.location.latitude,
            self.location.longitude,
            self.location.altitude,
        ];
        let presence = coords
            .iter()
            .enumerate()
            .fold(0u8, |p, (i, c)| if c.is_some() { p | (1 << i) } else { p });
        bytes.push(presence);
        for coord in coords {
            bytes.extend_from_slice(&coord.unwrap_or(0.0).to_le_bytes());
        }

        bytes.push(self.disconnected);

        bytes.push(self.buffer.capacity() as u8);
        bytes.push(self.buffer.high_water_mark().map_or(NO_MARK, |m| m as u8));
        for slot in self.buffer.slots() {
            write_slot(&mut bytes, slot);
        }

        // At most one entry per sensor kind, so the count fits a byte
        bytes.push(self.calibration.len() as u8);
        for (kind, blob) in &self.calibration {
            let len = u16::try_from(blob.len()).map_err(|_| StorageError::CalibrationTooLarge {
                sensor: kind.to_string(),
                len: blob.len(),
            })?;
            bytes.push(kind.id());
            bytes.extend_from_slice(&len.to_le_bytes());
            bytes.extend_from_slice(blob);
        }

        let checksum = CHECKSUM.checksum(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        Ok(bytes)
    }

    /// Parse a retained image
    ///
    /// An unknown state byte restores as [`NodeState::Init`].
    pub fn from_image(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < 4 + 4 {
            return Err(StorageError::TooShort {
                needed: 8,
                available: data.len(),
            });
        }
        if data[0..4] != IMAGE_MAGIC {
            return Err(StorageError::BadMagic);
        }

        let (body, trailer) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = CHECKSUM.checksum(body);
        if expected != actual {
            return Err(StorageError::InvalidChecksum { expected, actual });
        }

        let mut reader = ImageReader::new(body);
        reader.skip(4)?;
        let format = u16::from_le_bytes(reader.array()?);
        if format != IMAGE_FORMAT {
            return Err(StorageError::UnsupportedFormat(format));
        }

        let state_byte = reader.u8()?;
        let state = NodeState::from_u8(state_byte).unwrap_or_else(|| {
            warn!("Unknown retained state {}, restarting from INIT", state_byte);
            NodeState::Init
        });
        let count = reader.u8()?;
        let flags = reader.u8()?;

        let presence = reader.u8()?;
        let mut coords = [None; 3];
        for (i, coord) in coords.iter_mut().enumerate() {
            let value = f64::from_le_bytes(reader.array()?);
            if presence & (1 << i) != 0 {
                *coord = Some(value);
            }
        }
        let location = Location {
            latitude: coords[0],
            longitude: coords[1],
            altitude: coords[2],
            altitude_from_gps: flags & FLAG_ALTITUDE_GPS != 0,
        };

        let disconnected = reader.u8()?;

        let capacity = reader.u8()? as usize;
        if capacity == 0 || capacity > MAX_SAMPLES {
            return Err(StorageError::Corrupted(format!(
                "buffer capacity {} out of range",
                capacity
            )));
        }
        let mark = reader.u8()?;
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(read_slot(&mut reader)?);
        }
        let high_water_mark = match mark {
            NO_MARK => None,
            m if (m as usize) < capacity => Some(m as usize),
            m => {
                return Err(StorageError::Corrupted(format!(
                    "high-water mark {} beyond capacity {}",
                    m, capacity
                )))
            }
        };
        if count as usize >= capacity {
            return Err(StorageError::Corrupted(format!(
                "count {} beyond capacity {}",
                count, capacity
            )));
        }

        let mut calibration = BTreeMap::new();
        for _ in 0..reader.u8()? {
            let id = reader.u8()?;
            let kind = SensorKind::from_id(id)
                .ok_or_else(|| StorageError::Corrupted(format!("unknown sensor id {}", id)))?;
            let len = u16::from_le_bytes(reader.array()?) as usize;
            calibration.insert(kind, reader.take(len)?.to_vec());
        }

        if reader.remaining() != 0 {
            return Err(StorageError::Corrupted(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }

        Ok(Self {
            state,
            count,
            startup: flags & FLAG_STARTUP != 0,
            location,
            buffer: SampleBuffer::from_parts(slots, high_water_mark),
            calibration,
            disconnected,
        })
    }
}

fn write_slot(bytes: &mut Vec<u8>, slot: &SampleSlot) {
    let floats = [
        slot.temperature,
        slot.pressure,
        slot.humidity,
        slot.latitude,
        slot.longitude,
        slot.altitude,
        slot.co2,
        slot.air_quality,
    ];
    let mut presence: u16 = 0;
    for (i, f) in floats.iter().enumerate() {
        if f.is_some() {
            presence |= 1 << i;
        }
    }
    if slot.battery.is_some() {
        presence |= 1 << 8;
    }
    if slot.light.is_some() {
        presence |= 1 << 9;
    }
    if slot.noise.is_some() {
        presence |= 1 << 10;
    }

    bytes.extend_from_slice(&presence.to_le_bytes());
    bytes.push(slot.battery.unwrap_or(0));
    bytes.extend_from_slice(&slot.light.unwrap_or(0).to_le_bytes());
    bytes.extend_from_slice(&slot.noise.unwrap_or(0).to_le_bytes());
    for f in floats {
        bytes.extend_from_slice(&f.unwrap_or(0.0).to_le_bytes());
    }
}

fn read_slot(reader: &mut ImageReader<'_>) -> Result<SampleSlot, StorageError> {
    let presence = u16::from_le_bytes(reader.array()?);
    let has = |bit: u16| presence & (1 << bit) != 0;

    let battery = reader.u8()?;
    let light = u16::from_le_bytes(reader.array()?);
    let noise = u16::from_le_bytes(reader.array()?);
    let mut floats = [None; 8];
    for (i, f) in floats.iter_mut().enumerate() {
        let value = f32::from_le_bytes(reader.array()?);
        if has(i as u16) {
            *f = Some(value);
        }
    }

    Ok(SampleSlot {
        battery: has(8).then_some(battery),
        temperature: floats[0],
        pressure: floats[1],
        humidity: floats[2],
        light: has(9).then_some(light),
        latitude: floats[3],
        longitude: floats[4],
        altitude: floats[5],
        co2: floats[6],
        noise: has(10).then_some(noise),
        air_quality: floats[7],
    })
}

struct ImageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ImageReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StorageError> {
        if n > self.remaining() {
            return Err(StorageError::TooShort {
                needed: self.pos + n,
                available: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), StorageError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Memory that survives deep sleep
pub trait RetainedStorage {
    /// Read the retained image; `None` when nothing was ever stored
    fn load(&mut self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the retained image
    fn store(&mut self, image: &[u8]) -> Result<(), StorageError>;
}

/// Retained RAM analog
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    image: Option<Vec<u8>>,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage holding an existing image
    pub fn with_image(image: Vec<u8>) -> Self {
        Self { image: Some(image) }
    }

    /// Stored image
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    /// Mutable access to the stored image
    pub fn image_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.image.as_mut()
    }
}

impl RetainedStorage for MemoryStorage {
    fn load(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.image.clone())
    }

    fn store(&mut self, image: &[u8]) -> Result<(), StorageError> {
        self.image = Some(image.to_vec());
        Ok(())
    }
}

/// Retained image kept in a file
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage backed by `path`; the file is created on first store
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RetainedStorage for FileStorage {
    fn load(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn store(&mut self, image: &[u8]) -> Result<(), StorageError> {
        std::fs::write(&self.path, image).map_err(|e| {
            StorageError::Io(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}
