// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-boot node counters
//!
//! Counters are kept in RAM only and start from zero on every boot.

use crate::sensors::SensorKind;

/// Node activity counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetrics {
    /// Cycles that acquired readings
    pub cycles_sampled: u64,
    /// Post-join cycles skipped without sampling
    pub cycles_skipped: u64,
    /// Frames handed to the radio
    pub narrowband_frames: u64,
    /// Bytes handed to the radio
    pub narrowband_bytes: u64,
    /// Frames larger than the payload budget
    pub oversize_frames: u64,
    /// Fallback posts that connected
    pub fallback_sent: u64,
    /// Fallback posts that failed to connect
    pub fallback_failed: u64,
    /// Cycles with a threshold crossing
    pub emergencies: u64,
    /// Sensors that reported themselves absent
    pub sensors_disconnected: Vec<SensorKind>,
}

impl NodeMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a narrowband flush
    pub fn record_narrowband(&mut self, frame_len: usize, budget: usize) {
        self.narrowband_frames += 1;
        self.narrowband_bytes += frame_len as u64;
        if frame_len > budget {
            self.oversize_frames += 1;
        }
    }

    /// Record a fallback flush
    pub fn record_fallback(&mut self, delivered: bool) {
        if delivered {
            self.fallback_sent += 1;
        } else {
            self.fallback_failed += 1;
        }
    }

    /// Record a sensor disconnect
    pub fn record_disconnect(&mut self, kind: SensorKind) {
        if !self.sensors_disconnected.contains(&kind) {
            self.sensors_disconnected.push(kind);
        }
    }

    /// Average narrowband frame size in bytes
    pub fn average_frame_size(&self) -> f64 {
        if self.narrowband_frames == 0 {
            return 0.0;
        }
        self.narrowband_bytes as f64 / self.narrowband_frames as f64
    }

    /// Share of fallback posts that connected (0.0 - 1.0)
    pub fn fallback_delivery_rate(&self) -> f64 {
        let total = self.fallback_sent + self.fallback_failed;
        if total == 0 {
            return 0.0;
        }
        self.fallback_sent as f64 / total as f64
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Node Metrics ===\n\n");
        report.push_str(&format!("Cycles sampled: {}\n", self.cycles_sampled));
        report.push_str(&format!("Cycles skipped: {}\n", self.cycles_skipped));
        report.push_str(&format!(
            "Narrowband frames: {} ({} bytes, avg {:.1})\n",
            self.narrowband_frames,
            self.narrowband_bytes,
            self.average_frame_size()
        ));
        if self.oversize_frames > 0 {
            report.push_str(&format!("Oversize frames: {}\n", self.oversize_frames));
        }
        report.push_str(&format!("Emergencies: {}\n", self.emergencies));
        report.push_str(&format!(
            "Fallback posts: {} sent, {} failed\n",
            self.fallback_sent, self.fallback_failed
        ));

        if !self.sensors_disconnected.is_empty() {
            let names: Vec<&str> = self.sensors_disconnected.iter().map(|k| k.name()).collect();
            report.push_str(&format!("Disconnected sensors: {}\n", names.join(", ")));
        }

        report
    }
}
