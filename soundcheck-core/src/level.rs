//! # Level Estimator Module
//!
//! RMS level in dBFS with a peak-hold indicator.
//!
//! The instantaneous level is recomputed every cycle. The peak is carried
//! forward explicitly through the prior [`LevelReading`]: it is held for a
//! while after being raised, then falls linearly toward the current level.

use serde::Serialize;
use std::time::Duration;

/// Smallest RMS value converted to dB; keeps silence away from -inf.
const RMS_EPSILON: f64 = 1e-6;

/// Level of the full-scale ceiling.
pub const CEILING_DBFS: f32 = 0.0;

/// One cycle's level measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelReading {
    pub instantaneous_dbfs: f32,
    pub peak_dbfs: f32,
    /// Time since the peak was last raised.
    pub peak_age: Duration,
}

impl LevelReading {
    /// Reading for a meter that has heard nothing yet.
    pub fn silent(floor_db: f32) -> Self {
        Self {
            instantaneous_dbfs: floor_db,
            peak_dbfs: floor_db,
            peak_age: Duration::ZERO,
        }
    }
}

/// Computes [`LevelReading`]s with a fixed floor and peak-hold behaviour.
#[derive(Debug, Clone)]
pub struct LevelEstimator {
    floor_db: f32,
    peak_hold: Duration,
    /// dB per second.
    decay_rate: f32,
}

impl LevelEstimator {
    pub fn new(floor_db: f32, peak_hold: Duration, decay_rate: f32) -> Self {
        Self {
            floor_db,
            peak_hold,
            decay_rate: decay_rate.max(0.0),
        }
    }

    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }

    /// Measures `window` and advances the peak-hold state of `prior` by
    /// `elapsed`.
    ///
    /// # Arguments
    /// * `window` - Samples of this cycle
    /// * `prior` - Reading of the previous cycle, or [`LevelReading::silent`]
    /// * `elapsed` - Time since the previous cycle
    ///
    /// # Returns
    /// * `LevelReading` - Instantaneous level in `[floor, 0]` dBFS, and a peak
    ///   that is either raised to it or held and decayed from `prior`
    pub fn compute_level(
        &self,
        window: &[f32],
        prior: &LevelReading,
        elapsed: Duration,
    ) -> LevelReading {
        let instantaneous_dbfs = self.instantaneous_dbfs(window);

        let age = prior.peak_age + elapsed;
        // Only time spent past the hold period counts toward decay.
        let decaying = age.saturating_sub(self.peak_hold)
            - prior.peak_age.saturating_sub(self.peak_hold);
        let decayed_peak = (prior.peak_dbfs - self.decay_rate * decaying.as_secs_f32())
            .max(self.floor_db);

        if instantaneous_dbfs >= decayed_peak {
            LevelReading {
                instantaneous_dbfs,
                peak_dbfs: instantaneous_dbfs,
                peak_age: Duration::ZERO,
            }
        } else {
            LevelReading {
                instantaneous_dbfs,
                peak_dbfs: decayed_peak,
                peak_age: age,
            }
        }
    }

    /// RMS of `window` in dBFS, clamped to `[floor, 0]`.
    ///
    /// Empty, silent and non-finite windows all read as the floor.
    pub fn instantaneous_dbfs(&self, window: &[f32]) -> f32 {
        if window.is_empty() {
            return self.floor_db;
        }

        let mut sum_squares = 0.0f64;
        for &sample in window {
            if !sample.is_finite() {
                return self.floor_db;
            }
            sum_squares += sample as f64 * sample as f64;
        }

        let rms = (sum_squares / window.len() as f64).sqrt();
        let dbfs = 20.0 * rms.max(RMS_EPSILON).log10();
        (dbfs as f32).clamp(self.floor_db, CEILING_DBFS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    const FLOOR: f32 = -90.0;

    fn estimator() -> LevelEstimator {
        LevelEstimator::new(FLOOR, Duration::ZERO, 10.0)
    }

    fn sine(amplitude: f32, frequency: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn unit_sine_reads_minus_three_db() {
        let window = sine(1.0, 441.0, 44_100.0, 4410);
        let level = estimator().instantaneous_dbfs(&window);
        assert_abs_diff_eq!(level, -3.01, epsilon = 0.1);
    }

    #[test]
    fn half_scale_dc_reads_minus_six_db() {
        let level = estimator().instantaneous_dbfs(&[0.5; 64]);
        assert_abs_diff_eq!(level, -6.02, epsilon = 0.01);
    }

    #[test]
    fn silence_reads_the_floor() {
        let estimator = estimator();
        assert_eq!(estimator.instantaneous_dbfs(&[0.0; 512]), FLOOR);
        assert_eq!(estimator.instantaneous_dbfs(&[]), FLOOR);

        let reading = estimator.compute_level(
            &[0.0; 512],
            &LevelReading::silent(FLOOR),
            Duration::from_millis(100),
        );
        assert_eq!(reading.instantaneous_dbfs, FLOOR);
        assert_eq!(reading.peak_dbfs, FLOOR);
        assert!(reading.peak_dbfs.is_finite());
    }

    #[test]
    fn non_finite_samples_read_the_floor() {
        let estimator = estimator();
        assert_eq!(estimator.instantaneous_dbfs(&[0.5, f32::NAN, 0.5]), FLOOR);
        assert_eq!(estimator.instantaneous_dbfs(&[f32::INFINITY]), FLOOR);
    }

    #[test]
    fn tiny_signal_clamps_to_floor() {
        let estimator = LevelEstimator::new(-60.0, Duration::ZERO, 0.0);
        assert_eq!(estimator.instantaneous_dbfs(&[1e-5; 32]), -60.0);
    }

    fn window_at(dbfs: f32) -> Vec<f32> {
        vec![10f32.powf(dbfs / 20.0); 256]
    }

    #[test]
    fn peak_is_held_without_elapsed_time() {
        let estimator = estimator();
        let mut reading = LevelReading::silent(FLOOR);
        let mut peaks = Vec::new();
        for db in [-10.0, -40.0, -40.0, -40.0] {
            reading = estimator.compute_level(&window_at(db), &reading, Duration::ZERO);
            peaks.push(reading.peak_dbfs);
        }
        for peak in peaks {
            assert_abs_diff_eq!(peak, -10.0, epsilon = 0.01);
        }
        assert_abs_diff_eq!(reading.instantaneous_dbfs, -40.0, epsilon = 0.01);
    }

    #[test]
    fn peak_decays_linearly_toward_current_level() {
        let estimator = estimator();
        let step = Duration::from_secs(1);
        let mut reading =
            estimator.compute_level(&window_at(-10.0), &LevelReading::silent(FLOOR), step);
        assert_abs_diff_eq!(reading.peak_dbfs, -10.0, epsilon = 0.01);

        let mut previous = reading.peak_dbfs;
        for expected in [-20.0, -30.0, -40.0, -40.0] {
            reading = estimator.compute_level(&window_at(-40.0), &reading, step);
            assert_abs_diff_eq!(reading.peak_dbfs, expected, epsilon = 0.01);
            assert!(reading.peak_dbfs <= previous);
            assert!(reading.peak_dbfs >= reading.instantaneous_dbfs - 0.01);
            previous = reading.peak_dbfs;
        }
    }

    #[test]
    fn hold_time_delays_decay() {
        let estimator = LevelEstimator::new(FLOOR, Duration::from_millis(1500), 10.0);
        let step = Duration::from_millis(500);
        let mut reading =
            estimator.compute_level(&window_at(-10.0), &LevelReading::silent(FLOOR), step);

        // 0.5 s, 1.0 s, 1.5 s of age: still held.
        for _ in 0..3 {
            reading = estimator.compute_level(&window_at(-40.0), &reading, step);
            assert_abs_diff_eq!(reading.peak_dbfs, -10.0, epsilon = 0.01);
        }
        assert_eq!(reading.peak_age, Duration::from_millis(1500));

        // 2.0 s: half a second of decay.
        reading = estimator.compute_level(&window_at(-40.0), &reading, step);
        assert_abs_diff_eq!(reading.peak_dbfs, -15.0, epsilon = 0.01);
    }

    #[test]
    fn louder_input_raises_peak_and_resets_age() {
        let estimator = estimator();
        let prior = LevelReading {
            instantaneous_dbfs: -30.0,
            peak_dbfs: -20.0,
            peak_age: Duration::from_secs(3),
        };
        let reading = estimator.compute_level(&window_at(-6.0), &prior, Duration::from_millis(50));
        assert_abs_diff_eq!(reading.peak_dbfs, -6.0, epsilon = 0.01);
        assert_eq!(reading.peak_age, Duration::ZERO);
    }
}
