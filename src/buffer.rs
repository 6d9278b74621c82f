// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sample buffer
//!
//! Fixed-capacity sequence of [`SampleSlot`]s filled one cycle at a time and
//! flushed as a whole. Channels are stored as `Option`s; the wire-level
//! "absent" rules (integer zero, floats at or below [`ABSENT_FLOAT`]) are
//! applied by [`SampleSlot::is_present`] so that frames stay compatible with
//! existing network decoders.

use crate::error::{NodeError, Result};
use crate::protocol::{Channel, ABSENT_FLOAT, ABSENT_INT, MAX_SAMPLES};

/// One timestamped observation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleSlot {
    /// Battery percentage (0-100)
    pub battery: Option<u8>,
    /// Temperature in °C
    pub temperature: Option<f32>,
    /// Pressure
    pub pressure: Option<f32>,
    /// Relative humidity in %
    pub humidity: Option<f32>,
    /// Ambient light
    pub light: Option<u16>,
    /// Latitude in degrees
    pub latitude: Option<f32>,
    /// Longitude in degrees
    pub longitude: Option<f32>,
    /// Altitude in meters
    pub altitude: Option<f32>,
    /// CO2-equivalent concentration in ppm
    pub co2: Option<f32>,
    /// Noise level
    pub noise: Option<u16>,
    /// Air-quality index
    pub air_quality: Option<f32>,
}

impl SampleSlot {
    /// Create an all-absent slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one channel
    ///
    /// Integer channels round and saturate to their wire type.
    pub fn set(&mut self, channel: Channel, value: f64) {
        match channel {
            Channel::Battery => self.battery = Some(value.round().clamp(0.0, u8::MAX as f64) as u8),
            Channel::Light => self.light = Some(saturate_u16(value)),
            Channel::Noise => self.noise = Some(saturate_u16(value)),
            Channel::Temperature => self.temperature = Some(value as f32),
            Channel::Pressure => self.pressure = Some(value as f32),
            Channel::Humidity => self.humidity = Some(value as f32),
            Channel::Latitude => self.latitude = Some(value as f32),
            Channel::Longitude => self.longitude = Some(value as f32),
            Channel::Altitude => self.altitude = Some(value as f32),
            Channel::Co2 => self.co2 = Some(value as f32),
            Channel::AirQuality => self.air_quality = Some(value as f32),
        }
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.set(channel, value);
        self
    }

    /// Stored value of a channel, if any
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Battery => self.battery.map(f64::from),
            Channel::Light => self.light.map(f64::from),
            Channel::Noise => self.noise.map(f64::from),
            Channel::Temperature => self.temperature.map(f64::from),
            Channel::Pressure => self.pressure.map(f64::from),
            Channel::Humidity => self.humidity.map(f64::from),
            Channel::Latitude => self.latitude.map(f64::from),
            Channel::Longitude => self.longitude.map(f64::from),
            Channel::Altitude => self.altitude.map(f64::from),
            Channel::Co2 => self.co2.map(f64::from),
            Channel::AirQuality => self.air_quality.map(f64::from),
        }
    }

    /// Whether the channel is emitted on the wire
    ///
    /// A stored integer zero or a float at or below the sentinel counts as absent.
    pub fn is_present(&self, channel: Channel) -> bool {
        match self.get(channel) {
            None => false,
            Some(v) if channel.is_integer() => v != ABSENT_INT as f64,
            Some(v) => v > ABSENT_FLOAT as f64,
        }
    }

    /// Present channels in slot emission order
    pub fn present(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::SLOT_ORDER
            .into_iter()
            .filter(move |c| self.is_present(*c))
            .filter_map(move |c| self.get(c).map(|v| (c, v)))
    }

    /// Whether no channel is present on the wire
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// Reset every channel to absent
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn saturate_u16(value: f64) -> u16 {
    value.round().clamp(0.0, u16::MAX as f64) as u16
}

/// Bounded sequence of sample slots
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    slots: Vec<SampleSlot>,
    high_water_mark: Option<usize>,
}

impl SampleBuffer {
    /// Create an empty buffer; capacity is clamped to `1..=MAX_SAMPLES`
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![SampleSlot::default(); capacity.clamp(1, MAX_SAMPLES)],
            high_water_mark: None,
        }
    }

    /// Rebuild a buffer from retained slots
    pub(crate) fn from_parts(slots: Vec<SampleSlot>, high_water_mark: Option<usize>) -> Self {
        let mut buffer = Self::new(slots.len());
        let len = buffer.slots.len();
        for (dst, src) in buffer.slots.iter_mut().zip(slots) {
            *dst = src;
        }
        buffer.high_water_mark = high_water_mark.filter(|&hwm| hwm < len);
        buffer
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index of the last written slot, `None` when nothing was written since
    /// creation or the last clear
    pub fn high_water_mark(&self) -> Option<usize> {
        self.high_water_mark
    }

    /// Whether nothing was written since creation or the last clear
    pub fn is_empty(&self) -> bool {
        self.high_water_mark.is_none()
    }

    /// Set one channel of the slot at `index`
    pub fn write(&mut self, index: usize, channel: Channel, value: f64) -> Result<()> {
        let capacity = self.capacity();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(NodeError::SlotOutOfRange { index, capacity })?;
        slot.set(channel, value);
        self.high_water_mark = Some(self.high_water_mark.map_or(index, |hwm| hwm.max(index)));
        Ok(())
    }

    /// Slot at `index`
    pub fn slot(&self, index: usize) -> Option<&SampleSlot> {
        self.slots.get(index)
    }

    /// All slots, written or not
    pub fn slots(&self) -> &[SampleSlot] {
        &self.slots
    }

    /// Slots `0..=high_water_mark`
    pub fn written(&self) -> &[SampleSlot] {
        match self.high_water_mark {
            Some(hwm) => &self.slots[..=hwm],
            None => &[],
        }
    }

    /// Last written slot
    pub fn last_written(&self) -> Option<&SampleSlot> {
        self.high_water_mark.and_then(|hwm| self.slots.get(hwm))
    }

    /// Reset every slot to all-absent and forget the high-water mark
    ///
    /// The orchestrator's cycle counter is not touched.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(SampleSlot::clear);
        self.high_water_mark = None;
    }
}
