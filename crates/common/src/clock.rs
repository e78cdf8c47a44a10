//! Clock and timing utilities for start alignment.
//!
//! A processing job anchors every stream it starts (playback, relayed
//! audio, encoder) to one monotonic epoch taken in the synchronous start
//! step. This module provides:
//! - Capturing the epoch
//! - Measuring per-stream start offsets against it
//! - Rate limiting of periodic notifications

use std::time::{Duration, Instant};

/// A monotonic clock anchored to the moment a job began recording.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Nanoseconds elapsed since the epoch.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Convert seconds to a [`Duration`], clamping negatives and NaN to zero.
    pub fn secs_to_duration(secs: f64) -> Duration {
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Start offset of one stream measured against a reference stream.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Offset of the reference stream from the epoch (ns).
    pub reference_ns: u64,
    /// Offset of the measured stream from the epoch (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured started later).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

/// Rate limiter for periodic notifications keyed on a media timestamp.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller firing at most once per `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            target_interval_ns: (interval.as_nanos() as u64).max(1),
            last_tick_ns: None,
        }
    }

    /// Check whether enough time has passed for the next tick.
    /// The first call always fires.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }
}
