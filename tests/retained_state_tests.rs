// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Integration tests for retained state
//!
//! These tests verify that the node survives a sleep/wake boundary through a
//! file-backed image, and falls back to a cold boot when the image cannot be
//! trusted.

use crc::{Crc, CRC_32_ISO_HDLC};
use envnode::error::{SensorError, StorageError};
use envnode::sensors::{EnvironmentDriver, EnvironmentReading, EnvironmentSensor};
use envnode::{
    Channel, DeviceState, FileStorage, MemoryFallback, MemoryPower, MemoryRadio, MemoryStorage,
    NodeConfig, NodeState, RetainedStorage, SampleOrchestrator, SensorKind,
};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::tempdir;

fn config() -> NodeConfig {
    NodeConfig::from_json_str(
        r#"{
            "radio": { "dev_eui": "0004A30B001C0530", "app_eui": "0000000000000000",
                       "app_key": "2B7E151628AED2A6ABF7158809CF4F3C" },
            "sampling": { "interval_minutes": 15, "samples_per_uplink": 5, "version": 2 },
            "sensors": [ { "type": "bme680", "sda": 4, "scl": 15 } ],
            "fallback": { "ssid": "lab", "password": "pw",
                          "endpoint": "https://example.org/ingest", "token": "tok" }
        }"#,
    )
    .unwrap()
}

/// BME680-like driver sharing its calibration state with the test
struct Bme680 {
    state: Rc<RefCell<Vec<u8>>>,
}

impl EnvironmentDriver for Bme680 {
    fn begin(&mut self) -> bool {
        true
    }

    fn read(&mut self) -> EnvironmentReading {
        self.state.borrow_mut().push(0xA5);
        EnvironmentReading {
            temperature: 19.5,
            pressure: 100_000.0,
            humidity: 61.0,
            air_quality: Some(42.0),
        }
    }

    fn save_state(&mut self) -> Option<Vec<u8>> {
        Some(self.state.borrow().clone())
    }

    fn load_state(&mut self, state: &[u8]) {
        *self.state.borrow_mut() = state.to_vec();
    }
}

fn boot<S: RetainedStorage>(
    storage: S,
    calibration: Rc<RefCell<Vec<u8>>>,
) -> SampleOrchestrator<MemoryRadio, MemoryFallback, MemoryPower, S> {
    let sensor = EnvironmentSensor::bme680(Bme680 { state: calibration });
    SampleOrchestrator::new(
        &config(),
        MemoryRadio::new(),
        MemoryFallback::new(),
        MemoryPower::new(),
        storage,
    )
    .unwrap()
    .with_sensor(Box::new(sensor))
}

#[test]
fn test_state_survives_sleep_in_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("retained.bin");

    // First power-on: join, skip, then two sampling cycles
    let calibration = Rc::new(RefCell::new(Vec::new()));
    let mut node = boot(FileStorage::new(&path), calibration.clone());
    node.run().unwrap();
    node.resume();
    node.run().unwrap();
    for _ in 0..2 {
        assert!(node.resume());
        node.run().unwrap();
    }
    assert!(path.exists(), "Retained image should exist");
    drop(node);

    // Deep sleep wipes RAM: the driver starts with empty calibration
    let restored_calibration = Rc::new(RefCell::new(Vec::new()));
    let mut node = boot(FileStorage::new(&path), restored_calibration.clone());

    assert_eq!(node.node_state(), NodeState::Sleep);
    assert_eq!(node.count(), 2);
    assert!(!node.device_state().startup);
    assert_eq!(*restored_calibration.borrow(), vec![0xA5, 0xA5]);

    let slot = node.device_state().buffer.slot(1).unwrap();
    assert_eq!(slot.temperature, Some(19.5));
    assert_eq!(slot.air_quality, Some(42.0));
    assert!(slot.altitude.is_some());

    // Waking continues the batch where it stopped
    assert!(node.resume());
    node.run().unwrap();
    assert_eq!(node.count(), 3);
    assert_eq!(node.radio().joins, 0);
}

#[test]
fn test_missing_file_is_cold_boot() {
    let dir = tempdir().unwrap();
    let mut storage = FileStorage::new(dir.path().join("absent.bin"));
    assert_eq!(storage.load().unwrap(), None);

    let node = boot(storage, Rc::new(RefCell::new(Vec::new())));
    assert_eq!(node.node_state(), NodeState::Init);
    assert!(node.device_state().startup);
}

#[test]
fn test_unreadable_path_reports_io_error() {
    let dir = tempdir().unwrap();
    let mut storage = FileStorage::new(dir.path());
    assert!(matches!(storage.load(), Err(StorageError::Io(_))));
    assert!(matches!(storage.store(&[1, 2, 3]), Err(StorageError::Io(_))));
}

#[test]
fn test_truncated_file_is_cold_boot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("retained.bin");

    let mut state = DeviceState::cold_boot(5);
    state.state = NodeState::Sleep;
    state.count = 3;
    let image = state.to_image().unwrap();
    std::fs::write(&path, &image[..image.len() / 2]).unwrap();

    let node = boot(FileStorage::new(&path), Rc::new(RefCell::new(Vec::new())));
    assert_eq!(node.node_state(), NodeState::Init);
    assert_eq!(node.count(), 0);
}

#[test]
fn test_unknown_state_byte_restarts_init() {
    let mut state = DeviceState::cold_boot(5);
    state.state = NodeState::Cycle;
    state.startup = false;
    state.count = 1;
    state.buffer.write(0, Channel::Humidity, 55.0).unwrap();

    let mut image = state.to_image().unwrap();
    image[6] = 0xEE;
    let body = image.len() - 4;
    let checksum = Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(&image[..body]);
    image[body..].copy_from_slice(&checksum.to_le_bytes());

    let node = boot(
        MemoryStorage::with_image(image),
        Rc::new(RefCell::new(Vec::new())),
    );
    assert_eq!(node.node_state(), NodeState::Init);
    assert_eq!(node.count(), 1);
    assert_eq!(
        node.device_state().buffer.slot(0).unwrap().humidity,
        Some(55.0)
    );
}

#[test]
fn test_capacity_change_is_cold_boot() {
    let mut state = DeviceState::cold_boot(8);
    state.state = NodeState::Sleep;
    state.count = 6;

    let node = boot(
        MemoryStorage::with_image(state.to_image().unwrap()),
        Rc::new(RefCell::new(Vec::new())),
    );
    assert_eq!(node.node_state(), NodeState::Init);
    assert_eq!(node.device_state().buffer.capacity(), 5);
}

#[test]
fn test_disconnected_mask_persists() {
    let mut state = DeviceState::cold_boot(5);
    state.state = NodeState::Sleep;
    state.startup = false;
    state.mark_disconnected(SensorKind::Bme680);

    let mut node = boot(
        MemoryStorage::with_image(state.to_image().unwrap()),
        Rc::new(RefCell::new(Vec::new())),
    );
    assert!(node.resume());
    node.run().unwrap();

    assert_eq!(node.device_state().disconnected(), vec![SensorKind::Bme680]);
    assert_eq!(node.device_state().buffer.slot(0).unwrap().temperature, None);
    assert!(node.power().events.is_empty());
}

#[test]
fn test_not_ready_is_not_a_disconnect() {
    let err = SensorError::NotReady;
    assert_ne!(err, SensorError::NotConnected);

    let mut state = DeviceState::cold_boot(5);
    assert!(state.disconnected().is_empty());
    state.mark_disconnected(SensorKind::Gps);
    state.mark_disconnected(SensorKind::Sound);
    assert_eq!(
        state.disconnected(),
        vec![SensorKind::Sound, SensorKind::Gps]
    );
}
