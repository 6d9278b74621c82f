// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sampling orchestrator
//!
//! The device state machine. Each wake it samples the attached sensors into
//! the current slot, checks the emergency thresholds and picks an egress:
//!
//! ```text
//! INIT --init ok--> JOIN --join, resume()--> SEND --> CYCLE --> SLEEP
//!                                             ^                   |
//!                                             +----- resume() ----+
//! ```
//!
//! In SEND:
//! - emergency: post the buffer over the fallback network, reset the count
//! - count reached `samples_per_uplink - 1`: send a frame over the radio, reset the count
//! - otherwise advance the count
//!
//! The flow never blocks on the radio: [`step`](SampleOrchestrator::step)
//! returns [`Step::AwaitingRadio`] after requesting a join or a sleep, and
//! the radio stack calls [`resume`](SampleOrchestrator::resume) when it is
//! time to sample again.

use crate::channel::{AccessoryPower, FallbackNetwork, RadioStack};
use crate::config::{FallbackConfig, NodeConfig, Thresholds};
use crate::encoder::{format_frame, PacketCodec};
use crate::error::{Result, SensorError};
use crate::fallback::FallbackEncoder;
use crate::metrics::NodeMetrics;
use crate::protocol::ProtocolConfig;
use crate::sensors::{Measurement, Sensor, SensorKind};
use crate::state::{DeviceState, NodeState, RetainedStorage, MAX_CALIBRATION_LEN};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Outcome of one state-machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call [`step`](SampleOrchestrator::step) again
    Continue,
    /// Waiting for the radio stack to call [`resume`](SampleOrchestrator::resume)
    AwaitingRadio,
}

/// Jittered wake-up delay
#[derive(Debug)]
pub struct DutyCycle {
    interval: Duration,
    jitter_ms: u32,
    rng: StdRng,
}

impl DutyCycle {
    /// Delay of `interval` plus uniform jitter in `-jitter_ms..=jitter_ms`
    pub fn new(interval: Duration, jitter_ms: u32) -> Self {
        Self::with_rng(interval, jitter_ms, StdRng::from_entropy())
    }

    /// Deterministic duty cycle
    pub fn seeded(interval: Duration, jitter_ms: u32, seed: u64) -> Self {
        Self::with_rng(interval, jitter_ms, StdRng::seed_from_u64(seed))
    }

    fn with_rng(interval: Duration, jitter_ms: u32, rng: StdRng) -> Self {
        Self {
            interval,
            jitter_ms,
            rng,
        }
    }

    /// Draw the next delay
    pub fn next_delay(&mut self) -> Duration {
        let base = self.interval.as_millis() as i64;
        let jitter = self.jitter_ms as i64;
        let offset = if jitter == 0 {
            0
        } else {
            self.rng.gen_range(-jitter..=jitter)
        };
        Duration::from_millis((base + offset).max(0) as u64)
    }
}

/// The node state machine
pub struct SampleOrchestrator<R, F, P, S> {
    protocol: ProtocolConfig,
    codec: PacketCodec,
    fallback_encoder: FallbackEncoder,
    fallback_config: FallbackConfig,
    thresholds: Thresholds,
    listed_sensors: Vec<SensorKind>,
    payload_budget: usize,
    duty_cycle: DutyCycle,
    sensors: Vec<Box<dyn Sensor>>,
    state: DeviceState,
    metrics: NodeMetrics,
    radio: R,
    fallback: F,
    power: P,
    storage: S,
}

impl<R, F, P, S> SampleOrchestrator<R, F, P, S>
where
    R: RadioStack,
    F: FallbackNetwork,
    P: AccessoryPower,
    S: RetainedStorage,
{
    /// Boot the node: derive the session configuration and restore retained state
    ///
    /// A missing, corrupted or incompatible image starts from a cold boot.
    pub fn new(config: &NodeConfig, radio: R, fallback: F, power: P, mut storage: S) -> Result<Self> {
        config.validate()?;
        let protocol = config.protocol()?;
        let device_id = config.radio.device_id()?;

        let state = restore(&mut storage, protocol.capacity());
        info!(
            "Booting {} in {:?} (v{}, {} samples per uplink)",
            device_id,
            state.state,
            protocol.version().as_u8(),
            protocol.samples_per_uplink()
        );

        Ok(Self {
            protocol,
            codec: PacketCodec::new(protocol),
            fallback_encoder: FallbackEncoder::new(protocol, device_id),
            fallback_config: config.fallback.clone(),
            thresholds: config.thresholds.clone(),
            listed_sensors: SensorKind::ALL
                .into_iter()
                .filter(|&k| config.has_sensor(k))
                .collect(),
            payload_budget: config.radio.payload_budget(),
            duty_cycle: DutyCycle::new(protocol.interval(), config.sampling.jitter_ms),
            sensors: Vec::new(),
            state,
            metrics: NodeMetrics::new(),
            radio,
            fallback,
            power,
            storage,
        })
    }

    /// Replace the duty-cycle generator
    pub fn with_duty_cycle(mut self, duty_cycle: DutyCycle) -> Self {
        self.duty_cycle = duty_cycle;
        self
    }

    /// Attach a sensor, restoring its retained calibration
    ///
    /// Returns whether the sensor kind is listed in the configuration. An
    /// unlisted sensor is still attached.
    pub fn add_sensor(&mut self, mut sensor: Box<dyn Sensor>) -> bool {
        let kind = sensor.kind();
        let listed = self.listed_sensors.contains(&kind);
        if !listed {
            warn!("Sensor {} attached but not listed in the configuration", kind);
        }
        if let Some(blob) = self.state.calibration.get(&kind) {
            sensor.restore_calibration(blob);
        }
        self.sensors.push(sensor);
        self.sensors.sort_by_key(|s| s.kind());
        listed
    }

    /// Builder-style [`add_sensor`](Self::add_sensor)
    pub fn with_sensor(mut self, sensor: Box<dyn Sensor>) -> Self {
        self.add_sensor(sensor);
        self
    }

    /// Current lifecycle state
    pub fn node_state(&self) -> NodeState {
        self.state.state
    }

    /// Retained state
    pub fn device_state(&self) -> &DeviceState {
        &self.state
    }

    /// Current write position in the buffer
    pub fn count(&self) -> usize {
        self.state.count as usize
    }

    /// Session protocol configuration
    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// Activity counters since boot
    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Radio collaborator
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Fallback collaborator
    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    /// Power rail collaborator
    pub fn power(&self) -> &P {
        &self.power
    }

    /// Retained storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Shut down and hand back the retained storage
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// External wake-up from the radio stack
    ///
    /// Moves JOIN or SLEEP to SEND; returns `false` when ignored.
    pub fn resume(&mut self) -> bool {
        match self.state.state {
            NodeState::Join | NodeState::Sleep => {
                debug!("Resume from {:?}", self.state.state);
                self.state.state = NodeState::Send;
                true
            }
            other => {
                debug!("Resume ignored in {:?}", other);
                false
            }
        }
    }

    /// Run steps until the radio stack takes over
    pub fn run(&mut self) -> Result<()> {
        while self.step()? == Step::Continue {}
        Ok(())
    }

    /// Execute the action of the current state
    pub fn step(&mut self) -> Result<Step> {
        match self.state.state {
            NodeState::Init => {
                self.radio.init()?;
                info!("Radio initialized");
                self.state.state = NodeState::Join;
                Ok(Step::Continue)
            }
            NodeState::Join => {
                self.join();
                Ok(Step::AwaitingRadio)
            }
            NodeState::Send => {
                self.send()?;
                self.state.state = NodeState::Cycle;
                Ok(Step::Continue)
            }
            NodeState::Cycle => {
                let delay = self.duty_cycle.next_delay();
                debug!("Next wake-up in {} ms", delay.as_millis());
                self.radio.schedule_cycle(delay);
                self.state.state = NodeState::Sleep;
                Ok(Step::Continue)
            }
            NodeState::Sleep => {
                self.save();
                self.radio.sleep();
                Ok(Step::AwaitingRadio)
            }
        }
    }

    fn join(&mut self) {
        self.state.buffer.clear();
        self.state.count = 0;

        let timeout = self.fallback_config.connect_timeout();
        match self.fallback.approximate_location(timeout) {
            Some(fix) => {
                if self
                    .state
                    .location
                    .apply_fix(&fix, self.fallback_config.max_location_accuracy_m)
                {
                    info!("Approximate location {:.6}, {:.6}", fix.latitude, fix.longitude);
                } else {
                    debug!("Approximate location too coarse ({} m)", fix.accuracy_m);
                }
            }
            None => debug!("No approximate location"),
        }

        info!("Joining network");
        self.radio.join();
    }

    fn send(&mut self) -> Result<()> {
        if self.state.startup {
            info!("First wake after join, skipping sampling");
            self.state.startup = false;
            self.metrics.cycles_skipped += 1;
            return Ok(());
        }

        let emergency = self.acquire()?;
        self.metrics.cycles_sampled += 1;

        if emergency {
            self.metrics.emergencies += 1;
            self.flush_fallback();
            self.state.count = 0;
        } else if self.count() + 1 >= self.protocol.samples_per_uplink() {
            self.flush_narrowband();
            self.state.count = 0;
        } else {
            self.state.count += 1;
        }
        Ok(())
    }

    /// Read every connected sensor into the current slot; returns the emergency flag
    fn acquire(&mut self) -> Result<bool> {
        let index = self.count();
        let state = &mut self.state;

        let connected: Vec<usize> = (0..self.sensors.len())
            .filter(|&i| !state.is_disconnected(self.sensors[i].kind()))
            .collect();
        let needs_power = connected
            .iter()
            .any(|&i| self.sensors[i].needs_accessory_power());
        let warmup = connected
            .iter()
            .map(|&i| self.sensors[i].warmup())
            .max()
            .unwrap_or(Duration::ZERO);

        if needs_power {
            self.power.on();
        }
        if !warmup.is_zero() {
            self.power.warm_up(warmup);
        }

        let mut emergency = false;
        let mut outcome = Ok(());
        for &i in &connected {
            let sensor = &mut self.sensors[i];
            let kind = sensor.kind();
            match sensor.read() {
                Ok(measurements) => {
                    for measurement in measurements {
                        match measurement {
                            Measurement::Reading(channel, value) => {
                                debug!("{} {}: {}", kind, channel, value);
                                if let Err(e) = state.buffer.write(index, channel, value) {
                                    outcome = Err(e);
                                }
                                if self.thresholds.exceeded(channel, value) {
                                    info!("Emergency: {} at {} crosses its threshold", channel, value);
                                    emergency = true;
                                }
                            }
                            other => {
                                state.location.apply(&other);
                            }
                        }
                    }
                    match sensor.calibration() {
                        Some(blob) if blob.len() > MAX_CALIBRATION_LEN => {
                            warn!(
                                "Calibration of {} is {} bytes, not retained",
                                kind,
                                blob.len()
                            );
                        }
                        Some(blob) => {
                            state.calibration.insert(kind, blob);
                        }
                        None => {}
                    }
                }
                Err(SensorError::NotConnected) => {
                    warn!("Sensor {} not connected, disabled for this session", kind);
                    state.mark_disconnected(kind);
                    self.metrics.record_disconnect(kind);
                }
                Err(SensorError::NotReady) => debug!("Sensor {} not ready, skipped", kind),
            }
        }

        if needs_power {
            self.power.off();
        }

        outcome?;
        state.location.write_into(&mut state.buffer, index)?;
        Ok(emergency)
    }

    fn flush_narrowband(&mut self) {
        let frame = self.codec.encode(&self.state.buffer);
        debug!("Frame: {}", format_frame(&frame));
        if frame.len() > self.payload_budget {
            warn!(
                "Frame of {} bytes exceeds the {} byte payload budget",
                frame.len(),
                self.payload_budget
            );
        }
        info!(
            "Narrowband flush: {} slots, {} bytes",
            self.state.buffer.written().len(),
            frame.len()
        );
        self.radio.send(&frame);
        self.metrics.record_narrowband(frame.len(), self.payload_budget);
        self.state.buffer.clear();
    }

    fn flush_fallback(&mut self) {
        let request = self.fallback_encoder.request(
            &self.state.buffer,
            &self.fallback_config.endpoint,
            &self.fallback_config.token,
        );
        debug!("Fallback body: {}", request.body);
        let delivered = self
            .fallback
            .post(&request, self.fallback_config.connect_timeout());
        if delivered {
            info!("Fallback flush: {} slots", self.state.buffer.written().len());
        } else {
            warn!("Fallback network unreachable, emergency data dropped");
        }
        self.metrics.record_fallback(delivered);
        self.state.buffer.clear();
    }

    fn save(&mut self) {
        let result = self
            .state
            .to_image()
            .and_then(|image| self.storage.store(&image));
        if let Err(e) = result {
            warn!("Failed to save retained state: {}", e);
        }
    }
}

fn restore<S: RetainedStorage>(storage: &mut S, capacity: usize) -> DeviceState {
    let image = match storage.load() {
        Ok(Some(image)) => image,
        Ok(None) => return DeviceState::cold_boot(capacity),
        Err(e) => {
            warn!("Retained state unreadable ({}), cold boot", e);
            return DeviceState::cold_boot(capacity);
        }
    };
    match DeviceState::from_image(&image) {
        Ok(state) if state.buffer.capacity() == capacity => state,
        Ok(state) => {
            warn!(
                "Retained buffer holds {} slots, configuration needs {}, cold boot",
                state.buffer.capacity(),
                capacity
            );
            DeviceState::cold_boot(capacity)
        }
        Err(e) => {
            warn!("Retained state corrupted ({}), cold boot", e);
            DeviceState::cold_boot(capacity)
        }
    }
}
