//! Simulated sensor node
//!
//! Runs the node state machine against simulated sensors and in-memory
//! collaborators, printing each uplink as it leaves.
//!
//! Run with: `RUST_LOG=debug cargo run --example simulated_node [config.json]`

use envnode::encoder::format_frame;
use envnode::sensors::{
    AnalogInput, BatteryGauge, EnvironmentDriver, EnvironmentReading, EnvironmentSensor, GpsDriver,
    GpsFix, GpsSensor, SoundSensor,
};
use envnode::{
    LocationFix, MemoryFallback, MemoryPower, MemoryRadio, MemoryStorage, NodeConfig,
    SampleOrchestrator, UplinkDecoder,
};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const DEFAULT_CONFIG: &str = r#"{
    "radio": { "dev_eui": "70B3D57ED0041234", "app_eui": "0000000000000000",
               "app_key": "2B7E151628AED2A6ABF7158809CF4F3C", "data_rate": 3 },
    "sampling": { "interval_minutes": 10, "samples_per_uplink": 5, "version": 3 },
    "thresholds": { "temperature": 35.0, "noise": 3000.0 },
    "sensors": [ { "type": "bme280", "sda": 4, "scl": 15 },
                 { "type": "sound", "pin": 37 },
                 { "type": "gps", "baud": 9600, "rx": 12, "tx": 13 } ],
    "fallback": { "ssid": "lab", "password": "secret",
                  "endpoint": "https://example.org/ingest", "token": "demo" }
}"#;

const WAKE_CYCLES: usize = 24;

/// GPS fix acquisition time on accessory power
const GPS_WARMUP: Duration = Duration::from_secs(10);

/// Temperature drifting upwards until it crosses the threshold
struct DriftingBme280 {
    rng: StdRng,
    temperature: f32,
}

impl EnvironmentDriver for DriftingBme280 {
    fn begin(&mut self) -> bool {
        true
    }

    fn read(&mut self) -> EnvironmentReading {
        self.temperature += self.rng.gen_range(-0.2..1.2);
        EnvironmentReading {
            temperature: self.temperature,
            pressure: 101_000.0 + self.rng.gen_range(-50.0..50.0),
            humidity: 55.0 + self.rng.gen_range(-3.0..3.0),
            air_quality: None,
        }
    }
}

struct NoisyAdc {
    rng: StdRng,
    center: u16,
}

impl AnalogInput for NoisyAdc {
    fn read_raw(&mut self) -> u16 {
        self.center + self.rng.gen_range(0..200)
    }
}

struct FixedGps;

impl GpsDriver for FixedGps {
    fn poll(&mut self) -> GpsFix {
        GpsFix {
            latitude: 50.668_081,
            longitude: 4.611_730,
            altitude: 103.0,
        }
    }
}

fn main() -> envnode::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::from_json_str(DEFAULT_CONFIG)?,
    };

    let fallback = MemoryFallback::new().with_location(LocationFix {
        latitude: 50.6681,
        longitude: 4.6117,
        accuracy_m: 60.0,
    });
    let mut node = SampleOrchestrator::new(
        &config,
        MemoryRadio::new(),
        fallback,
        MemoryPower::new(),
        MemoryStorage::new(),
    )?
    .with_sensor(Box::new(BatteryGauge::new(
        NoisyAdc {
            rng: StdRng::seed_from_u64(1),
            center: 1950,
        },
        config.battery.min_raw,
        config.battery.max_raw,
    )))
    .with_sensor(Box::new(EnvironmentSensor::bme280(DriftingBme280 {
        rng: StdRng::seed_from_u64(2),
        temperature: 24.0,
    })))
    .with_sensor(Box::new(SoundSensor::new(NoisyAdc {
        rng: StdRng::seed_from_u64(3),
        center: 600,
    })))
    .with_sensor(Box::new(GpsSensor::new(FixedGps, GPS_WARMUP)));

    println!("=== envnode Simulated Node ===\n");

    node.run()?;
    node.resume();
    node.run()?;

    let decoder = UplinkDecoder::new();
    let mut frames_seen = 0;
    let mut posts_seen = 0;

    for cycle in 1..=WAKE_CYCLES {
        node.resume();
        node.run()?;

        for frame in &node.radio().frames[frames_seen..] {
            println!("[{:>2}] radio    {} bytes: {}", cycle, frame.len(), format_frame(frame));
            if let Ok(decoded) = decoder.decode(frame) {
                info!("Decoded {} slots", decoded.slots.len());
            }
        }
        frames_seen = node.radio().frames.len();

        for request in &node.fallback().requests[posts_seen..] {
            println!("[{:>2}] fallback {}", cycle, request.body);
        }
        posts_seen = node.fallback().requests.len();
    }

    println!("\n{}", node.metrics().report());
    Ok(())
}
