//! # Configuration Module
//!
//! Performance profiles and the tunable values of the metering pipeline.
//!
//! A [`PerformanceProfile`] fixes the sample rate and buffer sizing for a
//! whole run. [`MeterConfig`] carries the profile selection plus the tunables
//! (confidence gate, peak-hold behaviour, smoothing) and is loaded from and
//! saved to JSON.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{MeterError, Result};
use crate::pitch::{MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ, MIN_WINDOW_SIZE};
use crate::tuning::DEFAULT_TUNED_TOLERANCE_CENTS;

/// Sample rate, window and buffer sizing for one run. Immutable once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceProfile {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Number of samples analysed per cycle.
    pub analysis_window_size: usize,
    /// Capacity of the sample ring.
    pub buffer_capacity: usize,
    /// Default cadence of the analysis worker.
    pub refresh_interval: Duration,
}

impl PerformanceProfile {
    /// Tuned for constrained hardware (single-board computers).
    pub const ECO: PerformanceProfile = PerformanceProfile {
        sample_rate: 12_000,
        analysis_window_size: 2048,
        buffer_capacity: 8192,
        refresh_interval: Duration::from_millis(100),
    };

    /// For desktops and laptops.
    pub const FULL: PerformanceProfile = PerformanceProfile {
        sample_rate: 24_000,
        analysis_window_size: 4096,
        buffer_capacity: 16384,
        refresh_interval: Duration::from_millis(80),
    };

    /// Longest autocorrelation lag the pitch detector searches at this rate.
    pub fn max_lag(&self) -> usize {
        (self.sample_rate as f32 / MIN_FREQUENCY_HZ) as usize
    }

    /// Duration covered by one analysis window.
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs_f64(self.analysis_window_size as f64 / self.sample_rate as f64)
    }

    /// Rejects sample rate / window / capacity combinations the pipeline
    /// cannot analyse.
    pub fn validate(&self) -> Result<()> {
        let nyquist_floor = (2.0 * MAX_FREQUENCY_HZ) as u32;
        if self.sample_rate < nyquist_floor || self.sample_rate > 192_000 {
            return Err(MeterError::ConfigurationInvalid(format!(
                "sample rate {} Hz outside {}..=192000 Hz",
                self.sample_rate, nyquist_floor
            )));
        }
        if self.analysis_window_size < MIN_WINDOW_SIZE {
            return Err(MeterError::ConfigurationInvalid(format!(
                "analysis window of {} samples is below the minimum of {}",
                self.analysis_window_size, MIN_WINDOW_SIZE
            )));
        }
        // The lowest pitch needs at least two periods inside the window.
        if self.analysis_window_size < 2 * self.max_lag() {
            return Err(MeterError::ConfigurationInvalid(format!(
                "analysis window of {} samples cannot resolve {} Hz at {} Hz (needs {})",
                self.analysis_window_size,
                MIN_FREQUENCY_HZ,
                self.sample_rate,
                2 * self.max_lag()
            )));
        }
        if self.buffer_capacity < self.analysis_window_size {
            return Err(MeterError::ConfigurationInvalid(format!(
                "buffer capacity {} is smaller than the analysis window {}",
                self.buffer_capacity, self.analysis_window_size
            )));
        }
        if self.refresh_interval.is_zero() {
            return Err(MeterError::ConfigurationInvalid(
                "refresh interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which [`PerformanceProfile`] to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Eco,
    Full,
    /// ECO on ARM targets, FULL elsewhere.
    #[default]
    Auto,
}

impl ProfileKind {
    pub fn profile(self) -> PerformanceProfile {
        match self {
            ProfileKind::Eco => PerformanceProfile::ECO,
            ProfileKind::Full => PerformanceProfile::FULL,
            ProfileKind::Auto => {
                if is_constrained_target(std::env::consts::ARCH) {
                    PerformanceProfile::ECO
                } else {
                    PerformanceProfile::FULL
                }
            }
        }
    }
}

fn is_constrained_target(arch: &str) -> bool {
    arch.starts_with("arm") || arch == "aarch64"
}

/// User-facing configuration. Every field has a default so partial JSON
/// files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub profile: ProfileKind,
    /// Minimum autocorrelation peak for a pitch to be reported.
    pub confidence_threshold: f32,
    /// Peak-hold fall speed in dB per second once the hold time expires.
    pub peak_decay_rate: f32,
    /// How long a raised peak is held before it starts to decay.
    pub peak_hold_secs: f32,
    /// Lowest reported level in dBFS. Silence reads as this value.
    pub level_floor_db: f32,
    /// Width of the "in tune" zone. Only used by presentation layers.
    pub cents_tuned_tolerance: f32,
    /// EMA coefficient applied to successive cents offsets.
    pub cents_smoothing: f32,
    /// Time without captured samples after which the stream counts as idle.
    pub stall_timeout_ms: u64,
    /// Overrides the profile's analysis cadence.
    pub refresh_interval_ms: Option<u64>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            profile: ProfileKind::Auto,
            confidence_threshold: 0.3,
            peak_decay_rate: 20.0,
            peak_hold_secs: 1.5,
            level_floor_db: -90.0,
            cents_tuned_tolerance: DEFAULT_TUNED_TOLERANCE_CENTS,
            cents_smoothing: 0.15,
            stall_timeout_ms: 500,
            refresh_interval_ms: None,
        }
    }
}

impl MeterConfig {
    /// Resolves and validates the selected profile.
    pub fn performance_profile(&self) -> Result<PerformanceProfile> {
        let profile = self.profile.profile();
        profile.validate()?;
        Ok(profile)
    }

    /// Cadence of the analysis worker.
    pub fn refresh_interval(&self, profile: &PerformanceProfile) -> Duration {
        self.refresh_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(profile.refresh_interval)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn peak_hold(&self) -> Duration {
        Duration::try_from_secs_f32(self.peak_hold_secs).unwrap_or_default()
    }

    /// Fails fast on out-of-range tunables, before any stream is opened.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MeterError::ConfigurationInvalid(msg));

        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return invalid(format!(
                "confidence_threshold {} must be in (0, 1]",
                self.confidence_threshold
            ));
        }
        if !(self.peak_decay_rate.is_finite() && self.peak_decay_rate >= 0.0) {
            return invalid(format!(
                "peak_decay_rate {} must be a non-negative number",
                self.peak_decay_rate
            ));
        }
        if !(self.peak_hold_secs.is_finite() && self.peak_hold_secs >= 0.0) {
            return invalid(format!(
                "peak_hold_secs {} must be a non-negative number",
                self.peak_hold_secs
            ));
        }
        if !(self.level_floor_db.is_finite()
            && self.level_floor_db < 0.0
            && self.level_floor_db >= -200.0)
        {
            return invalid(format!(
                "level_floor_db {} must be in [-200, 0)",
                self.level_floor_db
            ));
        }
        if !(self.cents_tuned_tolerance.is_finite() && self.cents_tuned_tolerance >= 0.0) {
            return invalid(format!(
                "cents_tuned_tolerance {} must be a non-negative number",
                self.cents_tuned_tolerance
            ));
        }
        if !(self.cents_smoothing > 0.0 && self.cents_smoothing <= 1.0) {
            return invalid(format!(
                "cents_smoothing {} must be in (0, 1]",
                self.cents_smoothing
            ));
        }
        if self.stall_timeout_ms == 0 {
            return invalid("stall_timeout_ms must be non-zero".to_string());
        }
        if self.refresh_interval_ms == Some(0) {
            return invalid("refresh_interval_ms must be non-zero".to_string());
        }
        Ok(())
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: MeterConfig = serde_json::from_str(&data)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}
