// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Last-known location
//!
//! Sources, strongest first: GPS, barometric altitude, the approximate
//! location obtained over the fallback network at join time. Once GPS has
//! provided an altitude, barometric altitude is ignored.

use crate::buffer::SampleBuffer;
use crate::error::Result;
use crate::protocol::Channel;
use crate::sensors::{AltitudeSource, Measurement};

/// Approximate location from the fallback network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy_m: f32,
}

/// Durable last-known location
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Location {
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
    /// Altitude in meters
    pub altitude: Option<f64>,
    /// Altitude is locked to GPS
    pub altitude_from_gps: bool,
}

impl Location {
    /// Unknown location
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from a sensor measurement; returns whether anything changed
    pub fn apply(&mut self, measurement: &Measurement) -> bool {
        match *measurement {
            Measurement::Position {
                latitude,
                longitude,
            } => {
                self.latitude = Some(latitude);
                self.longitude = Some(longitude);
                true
            }
            Measurement::Altitude {
                meters,
                source: AltitudeSource::Gps,
            } => {
                self.altitude = Some(meters);
                self.altitude_from_gps = true;
                true
            }
            Measurement::Altitude {
                meters,
                source: AltitudeSource::Barometric,
            } if !self.altitude_from_gps => {
                self.altitude = Some(meters);
                true
            }
            _ => false,
        }
    }

    /// Accept an approximate fix if it is accurate enough
    pub fn apply_fix(&mut self, fix: &LocationFix, max_accuracy_m: f32) -> bool {
        if fix.accuracy_m >= max_accuracy_m {
            return false;
        }
        self.latitude = Some(fix.latitude);
        self.longitude = Some(fix.longitude);
        true
    }

    /// Write the known coordinates into slot `index`
    pub fn write_into(&self, buffer: &mut SampleBuffer, index: usize) -> Result<()> {
        let known = [
            (Channel::Latitude, self.latitude),
            (Channel::Longitude, self.longitude),
            (Channel::Altitude, self.altitude),
        ];
        for (channel, value) in known {
            if let Some(v) = value {
                buffer.write(index, channel, v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_locks_altitude() {
        let mut location = Location::new();
        assert!(location.apply(&Measurement::Altitude {
            meters: 120.0,
            source: AltitudeSource::Barometric,
        }));
        assert!(location.apply(&Measurement::Altitude {
            meters: 95.0,
            source: AltitudeSource::Gps,
        }));
        assert!(!location.apply(&Measurement::Altitude {
            meters: 130.0,
            source: AltitudeSource::Barometric,
        }));
        assert_eq!(location.altitude, Some(95.0));
        assert!(location.altitude_from_gps);
    }

    #[test]
    fn test_fix_accuracy_limit() {
        let mut location = Location::new();
        let coarse = LocationFix {
            latitude: 50.0,
            longitude: 4.0,
            accuracy_m: 800.0,
        };
        assert!(!location.apply_fix(&coarse, 500.0));
        assert_eq!(location.latitude, None);

        let fine = LocationFix {
            accuracy_m: 40.0,
            ..coarse
        };
        assert!(location.apply_fix(&fine, 500.0));
        assert_eq!(location.latitude, Some(50.0));
        assert_eq!(location.altitude, None);
    }

    #[test]
    fn test_readings_are_ignored() {
        let mut location = Location::new();
        assert!(!location.apply(&Measurement::Reading(Channel::Noise, 3.0)));
        assert_eq!(location, Location::new());
    }

    #[test]
    fn test_write_into_skips_unknown() {
        let mut location = Location::new();
        location.latitude = Some(50.67);
        let mut buffer = SampleBuffer::new(5);
        location.write_into(&mut buffer, 2).unwrap();

        let slot = buffer.slot(2).unwrap();
        assert!(slot.latitude.is_some());
        assert_eq!(slot.longitude, None);
        assert_eq!(buffer.high_water_mark(), Some(2));
    }
}
