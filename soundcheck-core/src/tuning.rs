//! # Musical Tuning Module
//!
//! Maps a detected frequency to the nearest open string of a guitar in
//! standard tuning and reports the offset in cents.
//!
//! - 100 cents = 1 semitone, 1200 cents = 1 octave
//! - Positive offsets are sharp, negative offsets are flat

use once_cell::sync::Lazy;
use serde::Serialize;

/// Default width of the "in tune" zone, in cents.
pub const DEFAULT_TUNED_TOLERANCE_CENTS: f32 = 5.0;

/// One open string of the reference tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceString {
    /// Note name (e.g., "E2", "A2")
    pub name: &'static str,
    /// Frequency in Hz
    pub frequency_hz: f32,
}

/// Standard tuning, low E to high E.
static STANDARD_TUNING: Lazy<Vec<ReferenceString>> = Lazy::new(|| {
    [
        ("E2", 82.41),
        ("A2", 110.00),
        ("D3", 146.83),
        ("G3", 196.00),
        ("B3", 246.94),
        ("E4", 329.63),
    ]
    .into_iter()
    .map(|(name, frequency_hz)| ReferenceString { name, frequency_hz })
    .collect()
});

/// The six reference strings, lowest first.
pub fn reference_strings() -> &'static [ReferenceString] {
    &STANDARD_TUNING
}

/// Nearest string and the signed distance to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningResult {
    pub string: ReferenceString,
    pub cents_offset: f32,
}

impl TuningResult {
    /// Whether the offset lies inside `±tolerance` cents. Presentation
    /// layers decide the tolerance; the matcher only reports the offset.
    pub fn is_in_tune(&self, tolerance_cents: f32) -> bool {
        self.cents_offset.abs() <= tolerance_cents
    }
}

/// Deviation of `freq` from `target_freq` in cents (positive = sharp).
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Finds the reference string closest to a frequency.
///
/// Distance is measured in cents, so a frequency between two strings goes to
/// the one that is fewer semitones away rather than fewer Hz.
///
/// # Arguments
/// * `frequency_hz` - Detected frequency in Hz
///
/// # Returns
/// * `Some(TuningResult)` - Nearest string and the signed offset in cents
/// * `None` - For non-finite or non-positive frequencies
pub fn match_string(frequency_hz: f32) -> Option<TuningResult> {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return None;
    }

    reference_strings()
        .iter()
        .map(|string| TuningResult {
            string: *string,
            cents_offset: calculate_cents_deviation(frequency_hz, string.frequency_hz),
        })
        .min_by(|a, b| a.cents_offset.abs().total_cmp(&b.cents_offset.abs()))
}
