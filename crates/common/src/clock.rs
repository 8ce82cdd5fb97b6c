//! Media timing utilities.
//!
//! Every export timestamp is an integer number of microseconds measured
//! from the start of the output. This module provides:
//! - Conversions between seconds, microseconds, frames and audio samples
//! - Drift measurement between the audio and video timelines
//! - A pacer deciding when long loops should yield to the runtime

use std::time::{Duration, Instant};

pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Convert seconds to whole microseconds (rounded).
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC as f64).round() as i64
}

/// Convert microseconds to seconds.
pub fn micros_to_secs(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SEC as f64
}

/// Offset of frame `index` from its scene start: `round(index * 10^6 / fps)`.
pub fn frame_offset_micros(index: u64, fps: u32) -> i64 {
    ((index as f64 * MICROS_PER_SEC as f64) / fps as f64).round() as i64
}

/// Nominal duration of one frame: `round(10^6 / fps)`.
pub fn frame_duration_micros(fps: u32) -> i64 {
    (MICROS_PER_SEC as f64 / fps as f64).round() as i64
}

/// Number of frames covering `duration_us`: `ceil(duration_us * fps / 10^6)`.
///
/// Computed with integer math so exact multiples never round up.
pub fn frames_for_duration(duration_us: i64, fps: u32) -> u64 {
    if duration_us <= 0 {
        return 0;
    }
    let numerator = duration_us as u128 * fps as u128;
    numerator.div_ceil(MICROS_PER_SEC as u128) as u64
}

/// Timestamp of sample `samples` at `sample_rate` (rounded microseconds).
pub fn samples_to_micros(samples: u64, sample_rate: u32) -> i64 {
    ((samples as u128 * MICROS_PER_SEC as u128 + sample_rate as u128 / 2) / sample_rate as u128)
        as i64
}

/// Sample index nearest to `micros` at `sample_rate`.
pub fn micros_to_samples(micros: i64, sample_rate: u32) -> u64 {
    if micros <= 0 {
        return 0;
    }
    ((micros as u128 * sample_rate as u128 + MICROS_PER_SEC as u128 / 2)
        / MICROS_PER_SEC as u128) as u64
}

/// Rescale a microsecond timestamp into another timescale (rounded).
pub fn rescale_micros(micros: i64, timescale: u32) -> u64 {
    if micros <= 0 {
        return 0;
    }
    ((micros as u128 * timescale as u128 + MICROS_PER_SEC as u128 / 2) / MICROS_PER_SEC as u128)
        as u64
}

/// Wall-clock timer for one export run.
#[derive(Debug, Clone)]
pub struct ExportTimer {
    started: Instant,
    started_wall: String,
}

impl ExportTimer {
    /// Start timing now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since start.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Wall-clock start time (RFC 3339).
    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (µs).
    pub reference_us: i64,
    /// Timestamp in the measured stream (µs).
    pub measured_us: i64,
}

impl DriftMeasurement {
    /// Drift in microseconds (positive = measured is ahead).
    pub fn drift_us(&self) -> i64 {
        self.measured_us - self.reference_us
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_us() as f64 / 1_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

/// Decides when a tight render loop should hand control back to the runtime.
///
/// Fires after `every_frames` ticks or once `max_interval` of wall time has
/// passed since the last yield, whichever comes first.
#[derive(Debug)]
pub struct YieldPacer {
    every_frames: u32,
    max_interval: Duration,
    ticks_since_yield: u32,
    last_yield: Instant,
}

impl YieldPacer {
    pub fn new(every_frames: u32, max_interval: Duration) -> Self {
        Self {
            every_frames: every_frames.max(1),
            max_interval,
            ticks_since_yield: 0,
            last_yield: Instant::now(),
        }
    }

    /// Record one unit of work. Returns true when the caller should yield;
    /// the pacer resets itself in that case.
    pub fn tick(&mut self) -> bool {
        self.ticks_since_yield += 1;
        if self.ticks_since_yield >= self.every_frames
            || self.last_yield.elapsed() >= self.max_interval
        {
            self.ticks_since_yield = 0;
            self.last_yield = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_math_at_30fps() {
        assert_eq!(frame_duration_micros(30), 33_333);
        assert_eq!(frame_offset_micros(1, 30), 33_333);
        assert_eq!(frame_offset_micros(2, 30), 66_667);
        assert_eq!(frame_offset_micros(30, 30), 1_000_000);
    }

    #[test]
    fn test_frames_for_duration_is_exact_on_multiples() {
        assert_eq!(frames_for_duration(5_000_000, 30), 150);
        assert_eq!(frames_for_duration(5_000_001, 30), 151);
        assert_eq!(frames_for_duration(2_500_000, 24), 60);
        assert_eq!(frames_for_duration(0, 30), 0);
    }

    #[test]
    fn test_sample_conversions() {
        assert_eq!(samples_to_micros(48_000, 48_000), 1_000_000);
        assert_eq!(samples_to_micros(1024, 48_000), 21_333);
        assert_eq!(micros_to_samples(3_000_000, 44_100), 132_300);
        assert_eq!(micros_to_samples(-5, 44_100), 0);
    }

    #[test]
    fn test_secs_roundtrip() {
        assert_eq!(secs_to_micros(3.0), 3_000_000);
        assert_eq!(secs_to_micros(0.0000004), 0);
        assert!((micros_to_secs(1_500_000) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale_micros(33_333, 90_000), 3_000);
        assert_eq!(rescale_micros(1_000_000, 1_000), 1_000);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            reference_us: 6_000_000,
            measured_us: 6_012_000,
        };
        assert_eq!(drift.drift_us(), 12_000);
        assert!((drift.drift_ms() - 12.0).abs() < 1e-9);
        assert!(!drift.exceeds_threshold_ms(20.0));
        assert!(drift.exceeds_threshold_ms(10.0));
    }

    #[test]
    fn test_pacer_fires_every_n_ticks() {
        let mut pacer = YieldPacer::new(3, Duration::from_secs(3600));
        assert!(!pacer.tick());
        assert!(!pacer.tick());
        assert!(pacer.tick());
        assert!(!pacer.tick());
    }

    #[test]
    fn test_pacer_fires_on_elapsed_time() {
        let mut pacer = YieldPacer::new(1_000, Duration::ZERO);
        assert!(pacer.tick());
    }
}
