// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Egress channels and other collaborators
//!
//! The node core drives three external collaborators:
//! - [`RadioStack`]: the narrowband radio (join, send, duty cycle, sleep)
//! - [`FallbackNetwork`]: the higher-bandwidth network (location, POST)
//! - [`AccessoryPower`]: the switched power rail feeding the sensors
//!
//! In-memory implementations record every call for tests and simulation.

use crate::error::{NodeError, Result};
use crate::fallback::FallbackRequest;
use crate::location::LocationFix;
use std::collections::VecDeque;
use std::time::Duration;

/// Narrowband radio stack
///
/// Join retries, acknowledgements and data-rate adaptation belong to the
/// stack. After [`join`](Self::join) and after [`sleep`](Self::sleep) the
/// stack calls back into the node to resume sampling.
pub trait RadioStack {
    /// Initialize the stack
    fn init(&mut self) -> Result<()>;

    /// Start joining the network
    fn join(&mut self);

    /// Queue an uplink frame
    fn send(&mut self, frame: &[u8]);

    /// Schedule the next wake-up after `delay`
    fn schedule_cycle(&mut self, delay: Duration);

    /// Suspend until the scheduled wake-up
    fn sleep(&mut self);
}

/// Higher-bandwidth fallback network
pub trait FallbackNetwork {
    /// Best-effort approximate location; `None` when unavailable within `timeout`
    fn approximate_location(&mut self, timeout: Duration) -> Option<LocationFix>;

    /// Connect and POST; `false` when the connection did not come up within `timeout`
    fn post(&mut self, request: &FallbackRequest, timeout: Duration) -> bool;
}

/// Switched accessory power rail
pub trait AccessoryPower {
    /// Enable the rail
    fn on(&mut self);
    /// Disable the rail
    fn off(&mut self);
    /// Block while sensors warm up
    fn warm_up(&mut self, duration: Duration);
}

/// Radio stack that records every call
#[derive(Debug, Default)]
pub struct MemoryRadio {
    /// Frames handed to [`RadioStack::send`]
    pub frames: Vec<Vec<u8>>,
    /// Delays handed to [`RadioStack::schedule_cycle`]
    pub scheduled: Vec<Duration>,
    /// Number of init calls
    pub inits: u32,
    /// Number of join requests
    pub joins: u32,
    /// Number of sleep requests
    pub sleeps: u32,
    fail_init: bool,
}

impl MemoryRadio {
    /// Create a working radio
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a radio whose initialization fails
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    /// Take every frame sent so far
    pub fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.frames)
    }
}

impl RadioStack for MemoryRadio {
    fn init(&mut self) -> Result<()> {
        self.inits += 1;
        if self.fail_init {
            return Err(NodeError::Radio("radio init failed".to_string()));
        }
        Ok(())
    }

    fn join(&mut self) {
        self.joins += 1;
    }

    fn send(&mut self, frame: &[u8]) {
        self.frames.push(frame.to_vec());
    }

    fn schedule_cycle(&mut self, delay: Duration) {
        self.scheduled.push(delay);
    }

    fn sleep(&mut self) {
        self.sleeps += 1;
    }
}

/// Fallback network that records every request
#[derive(Debug, Default)]
pub struct MemoryFallback {
    /// Requests handed to [`FallbackNetwork::post`], delivered or not
    pub requests: Vec<FallbackRequest>,
    /// Number of location lookups
    pub location_lookups: u32,
    location: Option<LocationFix>,
    connect_results: VecDeque<bool>,
    offline: bool,
}

impl MemoryFallback {
    /// Create a reachable network with no location service
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network that never connects
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Answer location lookups with `fix`
    pub fn with_location(mut self, fix: LocationFix) -> Self {
        self.location = Some(fix);
        self
    }

    /// Queue the outcome of the next connection attempt
    pub fn push_connect_result(&mut self, connected: bool) {
        self.connect_results.push_back(connected);
    }

    fn connect(&mut self) -> bool {
        self.connect_results.pop_front().unwrap_or(!self.offline)
    }
}

impl FallbackNetwork for MemoryFallback {
    fn approximate_location(&mut self, _timeout: Duration) -> Option<LocationFix> {
        self.location_lookups += 1;
        if !self.connect() {
            return None;
        }
        self.location
    }

    fn post(&mut self, request: &FallbackRequest, _timeout: Duration) -> bool {
        self.requests.push(request.clone());
        self.connect()
    }
}

/// Power rail event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// Rail enabled
    On,
    /// Rail disabled
    Off,
    /// Warm-up wait
    WarmUp(Duration),
}

/// Power rail that records every switch
#[derive(Debug, Default)]
pub struct MemoryPower {
    /// Events in order
    pub events: Vec<PowerEvent>,
}

impl MemoryPower {
    /// Create an idle rail
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the rail is currently on
    pub fn is_on(&self) -> bool {
        self.events
            .iter()
            .rev()
            .find(|e| !matches!(e, PowerEvent::WarmUp(_)))
            .map_or(false, |e| *e == PowerEvent::On)
    }
}

impl AccessoryPower for MemoryPower {
    fn on(&mut self) {
        self.events.push(PowerEvent::On);
    }

    fn off(&mut self) {
        self.events.push(PowerEvent::Off);
    }

    fn warm_up(&mut self, duration: Duration) {
        self.events.push(PowerEvent::WarmUp(duration));
    }
}
