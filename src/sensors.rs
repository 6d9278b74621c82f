// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor capability set
//!
//! Hardware access stays behind small driver traits ([`AnalogInput`],
//! [`GasDriver`], [`EnvironmentDriver`], [`GpsDriver`]). The adapters here
//! turn driver readings into [`Measurement`]s and report their own
//! "not connected" condition through [`SensorError`].

use crate::error::SensorError;
use crate::protocol::Channel;
use std::fmt;
use std::time::Duration;

/// Sea-level reference pressure in hPa
pub const SEA_LEVEL_PRESSURE_HPA: f64 = 1013.25;

/// Kinds of attachable sensors, in acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorKind {
    /// Battery gauge on the ADC
    Battery,
    /// Analog sound sensor
    Sound,
    /// Serial GPS module
    Gps,
    /// Temperature/pressure/humidity sensor
    Bme280,
    /// Temperature/pressure/humidity/air-quality sensor
    Bme680,
    /// Analog gas sensor
    Gas,
}

impl SensorKind {
    /// All kinds, in acquisition order
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Battery,
        SensorKind::Sound,
        SensorKind::Gps,
        SensorKind::Bme280,
        SensorKind::Bme680,
        SensorKind::Gas,
    ];

    /// Bit of this kind in a disconnected-sensor mask
    pub fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Short lowercase name
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Battery => "battery",
            SensorKind::Sound => "sound",
            SensorKind::Gps => "gps",
            SensorKind::Bme280 => "bme280",
            SensorKind::Bme680 => "bme680",
            SensorKind::Gas => "gas",
        }
    }

    /// Numeric identifier used in the retained image
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Convert from the retained identifier
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an altitude reading comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltitudeSource {
    /// Satellite fix
    Gps,
    /// Derived from pressure and temperature
    Barometric,
}

/// One value produced by a sensor read
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// A value written directly into the current slot
    Reading(Channel, f64),
    /// Horizontal position, fed to the location tracker
    Position { latitude: f64, longitude: f64 },
    /// Altitude, fed to the location tracker
    Altitude { meters: f64, source: AltitudeSource },
}

/// An attached sensor
pub trait Sensor {
    /// Sensor kind
    fn kind(&self) -> SensorKind;

    /// Whether the accessory power rail must be on while reading
    fn needs_accessory_power(&self) -> bool {
        true
    }

    /// Time the sensor needs on accessory power before reading
    fn warmup(&self) -> Duration {
        Duration::ZERO
    }

    /// Read the sensor
    fn read(&mut self) -> Result<Vec<Measurement>, SensorError>;

    /// Calibration state to retain across sleep
    fn calibration(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Restore retained calibration state
    fn restore_calibration(&mut self, _blob: &[u8]) {}
}

/// Raw analog input
pub trait AnalogInput {
    /// Read the raw ADC value
    fn read_raw(&mut self) -> u16;
}

/// Gas sensor driver
pub trait GasDriver {
    /// Raw ADC value; zero when nothing is wired
    fn raw(&mut self) -> u16;
    /// CO2-equivalent concentration in ppm
    fn ppm(&mut self) -> f32;
}

/// Readings of an environmental sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    /// Temperature in °C
    pub temperature: f32,
    /// Pressure in Pa
    pub pressure: f32,
    /// Relative humidity in %
    pub humidity: f32,
    /// Air-quality index, when the sensor computes one
    pub air_quality: Option<f32>,
}

/// Environmental sensor driver
pub trait EnvironmentDriver {
    /// Start a measurement; `false` when the sensor has nothing this cycle
    fn begin(&mut self) -> bool;
    /// Read the last measurement
    fn read(&mut self) -> EnvironmentReading;
    /// Opaque calibration state
    fn save_state(&mut self) -> Option<Vec<u8>> {
        None
    }
    /// Load opaque calibration state
    fn load_state(&mut self, _state: &[u8]) {}
}

/// GPS fix; zero fields mean "no fix"
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsFix {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
}

/// GPS module driver
pub trait GpsDriver {
    /// Drain the serial port and return the current fix
    fn poll(&mut self) -> GpsFix;
}

/// Linear battery percentage between two raw calibration points, clamped to `1..=100`
pub fn battery_percentage(raw: u16, min_raw: u16, max_raw: u16) -> u8 {
    let slope = 100.0 / (max_raw as f64 - min_raw as f64);
    let percentage = slope * (raw as f64 - min_raw as f64);
    if percentage >= 100.0 {
        100
    } else if percentage <= 1.0 {
        1
    } else {
        percentage as u8
    }
}

/// Altitude from pressure (Pa) and temperature (°C), hypsometric formula
pub fn barometric_altitude(temperature: f64, pressure: f64) -> f64 {
    let sea_level = SEA_LEVEL_PRESSURE_HPA * 100.0;
    let ratio = (sea_level / pressure).powf(1.0 / 5.257) - 1.0;
    ratio * (temperature + 273.15) / 0.0065
}

/// Battery gauge
#[derive(Debug)]
pub struct BatteryGauge<A> {
    input: A,
    min_raw: u16,
    max_raw: u16,
}

impl<A: AnalogInput> BatteryGauge<A> {
    /// Create a gauge calibrated between `min_raw` (empty) and `max_raw` (full)
    pub fn new(input: A, min_raw: u16, max_raw: u16) -> Self {
        Self {
            input,
            min_raw,
            max_raw,
        }
    }
}

impl<A: AnalogInput> Sensor for BatteryGauge<A> {
    fn kind(&self) -> SensorKind {
        SensorKind::Battery
    }

    fn needs_accessory_power(&self) -> bool {
        false
    }

    fn read(&mut self) -> Result<Vec<Measurement>, SensorError> {
        // First conversion after wake-up is unreliable
        let _ = self.input.read_raw();
        let raw = self.input.read_raw();
        let percentage = battery_percentage(raw, self.min_raw, self.max_raw);
        Ok(vec![Measurement::Reading(Channel::Battery, percentage as f64)])
    }
}

/// Analog sound sensor
#[derive(Debug)]
pub struct SoundSensor<A> {
    input: A,
}

impl<A: AnalogInput> SoundSensor<A> {
    /// Create a sound sensor on an analog input
    pub fn new(input: A) -> Self {
        Self { input }
    }
}

impl<A: AnalogInput> Sensor for SoundSensor<A> {
    fn kind(&self) -> SensorKind {
        SensorKind::Sound
    }

    fn read(&mut self) -> Result<Vec<Measurement>, SensorError> {
        match self.input.read_raw() {
            0 => Err(SensorError::NotConnected),
            noise => Ok(vec![Measurement::Reading(Channel::Noise, noise as f64)]),
        }
    }
}

/// Analog gas sensor
#[derive(Debug)]
pub struct GasSensor<D> {
    driver: D,
    warmup: Duration,
}

impl<D: GasDriver> GasSensor<D> {
    /// Create a gas sensor needing `warmup` on accessory power
    pub fn new(driver: D, warmup: Duration) -> Self {
        Self { driver, warmup }
    }
}

impl<D: GasDriver> Sensor for GasSensor<D> {
    fn kind(&self) -> SensorKind {
        SensorKind::Gas
    }

    fn warmup(&self) -> Duration {
        self.warmup
    }

    fn read(&mut self) -> Result<Vec<Measurement>, SensorError> {
        if self.driver.raw() == 0 {
            return Err(SensorError::NotConnected);
        }
        let ppm = self.driver.ppm();
        Ok(vec![Measurement::Reading(Channel::Co2, ppm as f64)])
    }
}

/// Serial GPS module
#[derive(Debug)]
pub struct GpsSensor<D> {
    driver: D,
    warmup: Duration,
}

impl<D: GpsDriver> GpsSensor<D> {
    /// Create a GPS sensor needing `warmup` to acquire a fix
    pub fn new(driver: D, warmup: Duration) -> Self {
        Self { driver, warmup }
    }
}

impl<D: GpsDriver> Sensor for GpsSensor<D> {
    fn kind(&self) -> SensorKind {
        SensorKind::Gps
    }

    fn warmup(&self) -> Duration {
        self.warmup
    }

    fn read(&mut self) -> Result<Vec<Measurement>, SensorError> {
        let fix = self.driver.poll();
        let mut out = Vec::with_capacity(2);
        if fix.latitude != 0.0 || fix.longitude != 0.0 {
            out.push(Measurement::Position {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }
        if fix.altitude > 0.0 {
            out.push(Measurement::Altitude {
                meters: fix.altitude,
                source: AltitudeSource::Gps,
            });
        }
        Ok(out)
    }
}

/// Temperature/pressure/humidity sensor, optionally with air quality
#[derive(Debug)]
pub struct EnvironmentSensor<D> {
    driver: D,
    kind: SensorKind,
}

impl<D: EnvironmentDriver> EnvironmentSensor<D> {
    /// BME280-like sensor, powered from the accessory rail
    pub fn bme280(driver: D) -> Self {
        Self {
            driver,
            kind: SensorKind::Bme280,
        }
    }

    /// BME680-like sensor with air quality and calibration state
    pub fn bme680(driver: D) -> Self {
        Self {
            driver,
            kind: SensorKind::Bme680,
        }
    }
}

impl<D: EnvironmentDriver> Sensor for EnvironmentSensor<D> {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn needs_accessory_power(&self) -> bool {
        self.kind == SensorKind::Bme280
    }

    fn read(&mut self) -> Result<Vec<Measurement>, SensorError> {
        if !self.driver.begin() {
            return Err(SensorError::NotReady);
        }
        let reading = self.driver.read();
        let mut out = vec![
            Measurement::Reading(Channel::Temperature, reading.temperature as f64),
            Measurement::Reading(Channel::Pressure, reading.pressure as f64),
            Measurement::Reading(Channel::Humidity, reading.humidity as f64),
        ];
        if self.kind == SensorKind::Bme680 {
            if let Some(iaq) = reading.air_quality {
                out.push(Measurement::Reading(Channel::AirQuality, iaq as f64));
            }
        }
        out.push(Measurement::Altitude {
            meters: barometric_altitude(reading.temperature as f64, reading.pressure as f64),
            source: AltitudeSource::Barometric,
        });
        Ok(out)
    }

    fn calibration(&mut self) -> Option<Vec<u8>> {
        self.driver.save_state()
    }

    fn restore_calibration(&mut self, blob: &[u8]) {
        self.driver.load_state(blob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::VecDeque;

    struct Samples(VecDeque<u16>);

    impl AnalogInput for Samples {
        fn read_raw(&mut self) -> u16 {
            self.0.pop_front().unwrap_or(0)
        }
    }

    struct Env {
        ready: bool,
        state: Vec<u8>,
    }

    impl EnvironmentDriver for Env {
        fn begin(&mut self) -> bool {
            self.ready
        }

        fn read(&mut self) -> EnvironmentReading {
            EnvironmentReading {
                temperature: 21.0,
                pressure: 101_325.0,
                humidity: 40.0,
                air_quality: Some(55.0),
            }
        }

        fn save_state(&mut self) -> Option<Vec<u8>> {
            Some(self.state.clone())
        }

        fn load_state(&mut self, state: &[u8]) {
            self.state = state.to_vec();
        }
    }

    #[test]
    fn test_battery_percentage() {
        assert_eq!(battery_percentage(2127, 1606, 2127), 100);
        assert_eq!(battery_percentage(3000, 1606, 2127), 100);
        assert_eq!(battery_percentage(1606, 1606, 2127), 1);
        assert_eq!(battery_percentage(0, 1606, 2127), 1);
        assert_eq!(battery_percentage(1866, 1606, 2127), 49);
    }

    #[test]
    fn test_battery_discards_first_reading() {
        let mut gauge = BatteryGauge::new(Samples(VecDeque::from([0, 2127])), 1606, 2127);
        let values = gauge.read().unwrap();
        assert_eq!(values, vec![Measurement::Reading(Channel::Battery, 100.0)]);
        assert!(!gauge.needs_accessory_power());
    }

    #[test]
    fn test_sound_zero_is_disconnected() {
        let mut sound = SoundSensor::new(Samples(VecDeque::from([0])));
        assert_eq!(sound.read(), Err(SensorError::NotConnected));

        let mut sound = SoundSensor::new(Samples(VecDeque::from([812])));
        assert_eq!(
            sound.read().unwrap(),
            vec![Measurement::Reading(Channel::Noise, 812.0)]
        );
    }

    #[test]
    fn test_environment_not_ready() {
        let mut env = EnvironmentSensor::bme280(Env {
            ready: false,
            state: Vec::new(),
        });
        assert_eq!(env.read(), Err(SensorError::NotReady));
        assert!(env.needs_accessory_power());
    }

    #[test]
    fn test_bme280_ignores_air_quality() {
        let mut env = EnvironmentSensor::bme280(Env {
            ready: true,
            state: Vec::new(),
        });
        let values = env.read().unwrap();
        assert!(!values
            .iter()
            .any(|m| matches!(m, Measurement::Reading(Channel::AirQuality, _))));
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn test_bme680_calibration_roundtrip() {
        let mut env = EnvironmentSensor::bme680(Env {
            ready: true,
            state: Vec::new(),
        });
        env.restore_calibration(&[1, 2, 3]);
        assert_eq!(env.calibration(), Some(vec![1, 2, 3]));
        assert!(!env.needs_accessory_power());

        let values = env.read().unwrap();
        assert!(values.contains(&Measurement::Reading(Channel::AirQuality, 55.0)));
    }

    #[test]
    fn test_barometric_altitude() {
        assert_relative_eq!(barometric_altitude(15.0, 101_325.0), 0.0, epsilon = 1e-6);
        let alt = barometric_altitude(15.0, 89_875.0);
        assert!(alt > 950.0 && alt < 1050.0);
    }

    #[test]
    fn test_mask_bits_distinct() {
        let mask = SensorKind::ALL.iter().fold(0u8, |m, k| m | k.mask_bit());
        assert_eq!(mask, 0b0011_1111);
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::from_id(kind.id()), Some(kind));
        }
    }
}
