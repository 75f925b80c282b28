//! # Pitch Detection Module
//!
//! Monophonic fundamental-frequency estimation by normalized
//! autocorrelation in the time domain.
//!
//! ## Steps
//! 1. DC offset removal
//! 2. Hann taper
//! 3. Normalized autocorrelation over the lags of 1000 Hz down to 65 Hz
//! 4. Parabolic interpolation of every local maximum for sub-sample lag
//!    accuracy
//! 5. Peak selection with an octave-error guard, then the confidence gate

use serde::Serialize;

/// Lowest detectable fundamental in Hz.
pub const MIN_FREQUENCY_HZ: f32 = 65.0;
/// Highest detectable fundamental in Hz.
pub const MAX_FREQUENCY_HZ: f32 = 1000.0;
/// Windows shorter than this never yield a pitch.
pub const MIN_WINDOW_SIZE: usize = 32;
/// A candidate period within this fraction of the strongest one is
/// preferred when it is shorter.
const SUBHARMONIC_RATIO: f64 = 0.9;

/// Result of one pitch analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PitchEstimate {
    /// Absent when no reliable periodicity was found.
    pub frequency_hz: Option<f32>,
    /// Height of the autocorrelation peak, in `[0, 1]`.
    pub confidence: f32,
}

impl PitchEstimate {
    pub const ABSENT: PitchEstimate = PitchEstimate {
        frequency_hz: None,
        confidence: 0.0,
    };

    fn absent_with(confidence: f32) -> Self {
        Self {
            frequency_hz: None,
            confidence: clamp_confidence(confidence),
        }
    }
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

/// Autocorrelation pitch detector with a configurable confidence gate.
#[derive(Debug, Clone)]
pub struct PitchDetector {
    confidence_threshold: f32,
}

impl PitchDetector {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Estimates the fundamental frequency of a mono window.
    ///
    /// Never fails: silence, noise, non-finite samples and windows too short
    /// for the lag range all produce an estimate without a frequency.
    ///
    /// # Arguments
    /// * `window` - Most recent samples, oldest first
    /// * `sample_rate` - Sample rate of `window` in Hz
    ///
    /// # Returns
    /// * `PitchEstimate` - Frequency in 65–1000 Hz when the autocorrelation
    ///   peak clears the confidence threshold, and the peak height in `[0, 1]`
    pub fn estimate_pitch(&self, window: &[f32], sample_rate: u32) -> PitchEstimate {
        if window.len() < MIN_WINDOW_SIZE || sample_rate == 0 {
            return PitchEstimate::ABSENT;
        }
        if window.iter().any(|s| !s.is_finite()) {
            return PitchEstimate::ABSENT;
        }

        let mut signal: Vec<f64> = window.iter().map(|&s| s as f64).collect();
        remove_dc_offset(&mut signal);
        apply_hann_window(&mut signal);

        let energy: f64 = signal.iter().map(|s| s * s).sum();
        if energy <= 1e-12 {
            return PitchEstimate::ABSENT;
        }

        let rate = sample_rate as f32;
        let min_lag = ((rate / MAX_FREQUENCY_HZ) as usize).max(1);
        let max_lag = ((rate / MIN_FREQUENCY_HZ) as usize).min(signal.len() - 1);
        if max_lag < min_lag + 2 {
            return PitchEstimate::ABSENT;
        }

        // r[lag] for lag in min_lag - 1 ..= max_lag + 1 where available, so
        // the interpolation has neighbours at both edges of the search range.
        let first_lag = min_lag - 1;
        let last_lag = (max_lag + 1).min(signal.len() - 1);
        let correlation: Vec<f64> = (first_lag..=last_lag)
            .map(|lag| autocorrelation(&signal, lag) / energy)
            .collect();
        let r = |lag: usize| correlation[lag - first_lag];

        // Skip what is left of the zero-lag lobe: a slope still falling
        // from lag zero is not a period.
        let mut search_start = min_lag;
        while search_start < max_lag && r(search_start - 1) > r(search_start) {
            search_start += 1;
        }

        // Every local maximum is a candidate period, compared at its
        // interpolated vertex. Raw values would undersample a period that
        // falls between two lags and let one of its multiples win.
        let candidates: Vec<PeakCandidate> = (search_start..=max_lag)
            .filter(|&lag| r(lag) >= r(lag - 1) && (lag == last_lag || r(lag) > r(lag + 1)))
            .map(|lag| {
                let raw = r(lag);
                let (refined_lag, value) = if lag < last_lag {
                    parabolic_peak(r(lag - 1), raw, r(lag + 1))
                        .map(|(shift, value)| (lag as f64 + shift, value))
                        .unwrap_or((lag as f64, raw))
                } else {
                    (lag as f64, raw)
                };
                PeakCandidate {
                    raw,
                    refined_lag,
                    value,
                }
            })
            .collect();

        let Some(strongest) = candidates.iter().max_by(|a, b| a.value.total_cmp(&b.value)) else {
            // Still rising at the end of the range: the period is longer.
            let highest = (search_start..=max_lag).map(r).fold(f64::MIN, f64::max);
            return PitchEstimate::absent_with(highest as f32);
        };
        // Multiples of the period peak almost as high as the period itself,
        // so the shortest lag close to the strongest one is the fundamental.
        let peak = candidates
            .iter()
            .find(|c| c.value >= SUBHARMONIC_RATIO * strongest.value)
            .unwrap_or(strongest);

        if peak.raw < self.confidence_threshold as f64 {
            return PitchEstimate::absent_with(peak.raw as f32);
        }

        let (refined_lag, refined_peak) = (peak.refined_lag, peak.value);
        let frequency = (sample_rate as f64 / refined_lag) as f32;
        if !frequency.is_finite() || !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency) {
            return PitchEstimate::absent_with(refined_peak as f32);
        }

        PitchEstimate {
            frequency_hz: Some(frequency),
            confidence: clamp_confidence(refined_peak as f32),
        }
    }
}

/// A local maximum of the autocorrelation.
#[derive(Debug, Clone, Copy)]
struct PeakCandidate {
    /// Correlation at the integer lag.
    raw: f64,
    refined_lag: f64,
    /// Correlation at the interpolated vertex.
    value: f64,
}

/// Centers the signal around zero.
fn remove_dc_offset(signal: &mut [f64]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f64>() / len as f64;
    for sample in signal.iter_mut() {
        *sample -= avg;
    }
}

/// Tapers the edges to zero to reduce boundary artifacts.
fn apply_hann_window(buffer: &mut [f64]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f64;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

fn autocorrelation(signal: &[f64], lag: usize) -> f64 {
    signal[..signal.len() - lag]
        .iter()
        .zip(&signal[lag..])
        .map(|(a, b)| a * b)
        .sum()
}

/// Vertex of the parabola through three equally spaced points, as
/// (offset from the middle point, value at the vertex).
///
/// Returns `None` for flat or degenerate neighbourhoods.
fn parabolic_peak(y0: f64, y1: f64, y2: f64) -> Option<(f64, f64)> {
    let denominator = y0 - 2.0 * y1 + y2;
    if denominator.abs() < 1e-12 {
        return None;
    }
    let shift = 0.5 * (y0 - y2) / denominator;
    if !shift.is_finite() || shift.abs() > 1.0 {
        return None;
    }
    let value = y1 - 0.25 * (y0 - y2) * shift;
    Some((shift, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f32::consts::PI;

    fn sine(frequency: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn detector() -> PitchDetector {
        PitchDetector::new(0.3)
    }

    #[test]
    fn detects_a2_slightly_sharp_at_full_rate() {
        let window = sine(110.2, 24_000, 4096, 0.8);
        let estimate = detector().estimate_pitch(&window, 24_000);

        let frequency = estimate.frequency_hz.expect("pitch should be detected");
        assert!((frequency - 110.2).abs() / 110.2 < 0.01, "got {frequency}");
        assert!(estimate.confidence > 0.3);
        assert!(estimate.confidence <= 1.0);
    }

    #[test]
    fn detects_every_open_string_at_eco_rate() {
        for target in [82.41, 110.0, 146.83, 196.0, 246.94, 329.63] {
            let window = sine(target, 12_000, 2048, 0.5);
            let frequency = detector()
                .estimate_pitch(&window, 12_000)
                .frequency_hz
                .expect("pitch should be detected");
            assert!((frequency - target).abs() / target < 0.01, "{target} -> {frequency}");
        }
    }

    #[test]
    fn harmonic_rich_tone_reports_the_fundamental() {
        let sample_rate = 24_000;
        let window: Vec<f32> = (0..4096)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (1..=4)
                    .map(|h| (2.0 * PI * 146.83 * h as f32 * t).sin() / h as f32)
                    .sum::<f32>()
                    * 0.3
            })
            .collect();
        let frequency = detector()
            .estimate_pitch(&window, sample_rate)
            .frequency_hz
            .expect("pitch should be detected");
        assert!((frequency - 146.83).abs() / 146.83 < 0.01, "got {frequency}");
    }

    /// Sum of `partials` harmonics of `fundamental`, the n-th at 1/n
    /// amplitude, like a plucked string.
    fn harmonic_tone(fundamental: f64, partials: u32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                let sum: f64 = (1..=partials)
                    .map(|h| {
                        let h = h as f64;
                        (2.0 * std::f64::consts::PI * fundamental * h * t).sin() / h
                    })
                    .sum();
                (0.3 * sum) as f32
            })
            .collect()
    }

    #[test]
    fn period_between_two_lags_is_not_reported_an_octave_low() {
        // 12000 / 452.2 = 26.54 samples; lag 53 sits almost on two periods.
        let window = sine(452.2, 12_000, 2048, 0.5);
        let frequency = detector()
            .estimate_pitch(&window, 12_000)
            .frequency_hz
            .expect("pitch should be detected");
        assert!((frequency - 452.2).abs() / 452.2 < 0.01, "got {frequency}");
    }

    #[test]
    fn upper_range_sines_at_eco_rate_keep_their_octave() {
        for step in 0..=112 {
            let target = 435.0 + 5.0 * step as f32;
            let window = sine(target, 12_000, 2048, 0.5);
            let frequency = detector()
                .estimate_pitch(&window, 12_000)
                .frequency_hz
                .expect("pitch should be detected");
            assert!((frequency - target).abs() / target < 0.01, "{target} -> {frequency}");
        }
    }

    #[test]
    fn harmonic_high_e_at_eco_rate_matches_e4() {
        let window = harmonic_tone(329.63, 6, 12_000, 2048);
        let frequency = detector()
            .estimate_pitch(&window, 12_000)
            .frequency_hz
            .expect("pitch should be detected");
        assert!((frequency - 329.63).abs() / 329.63 < 0.01, "got {frequency}");

        let tuning = crate::tuning::match_string(frequency).expect("string should be matched");
        assert_eq!(tuning.string.name, "E4");
    }

    #[test]
    fn harmonic_strings_at_eco_rate_report_the_fundamental() {
        for target in [82.41, 110.0, 146.83, 196.0, 246.94, 329.63] {
            let window = harmonic_tone(target, 6, 12_000, 2048);
            let frequency = detector()
                .estimate_pitch(&window, 12_000)
                .frequency_hz
                .expect("pitch should be detected");
            let target = target as f32;
            assert!((frequency - target).abs() / target < 0.01, "{target} -> {frequency}");
        }
    }

    #[test]
    fn harmonic_sweep_at_full_rate_has_no_octave_errors() {
        for step in 0..=125 {
            let target = 400.0 + 4.0 * step as f64;
            let window = harmonic_tone(target, 6, 24_000, 4096);
            let frequency = detector()
                .estimate_pitch(&window, 24_000)
                .frequency_hz
                .expect("pitch should be detected") as f64;
            assert!((frequency - target).abs() / target < 0.01, "{target} -> {frequency}");
        }
    }

    #[test]
    fn dc_offset_does_not_change_the_result() {
        let clean = sine(196.0, 24_000, 4096, 0.4);
        let shifted: Vec<f32> = clean.iter().map(|s| s + 0.3).collect();
        let a = detector().estimate_pitch(&clean, 24_000).frequency_hz.unwrap();
        let b = detector().estimate_pitch(&shifted, 24_000).frequency_hz.unwrap();
        assert_abs_diff_eq!(a, b, epsilon = 0.01);
    }

    #[test]
    fn white_noise_has_no_pitch() {
        let mut rng = StdRng::seed_from_u64(7);
        let window: Vec<f32> = (0..4096).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let estimate = detector().estimate_pitch(&window, 24_000);
        assert_eq!(estimate.frequency_hz, None);
        assert!(estimate.confidence < 0.3);
    }

    #[test]
    fn silence_and_constant_input_have_no_pitch() {
        assert_eq!(detector().estimate_pitch(&[0.0; 4096], 24_000), PitchEstimate::ABSENT);
        assert_eq!(detector().estimate_pitch(&[0.7; 4096], 24_000), PitchEstimate::ABSENT);
    }

    #[test]
    fn degenerate_windows_have_no_pitch() {
        assert_eq!(detector().estimate_pitch(&[0.1; 8], 24_000), PitchEstimate::ABSENT);

        let mut window = sine(110.0, 24_000, 4096, 0.5);
        window[100] = f32::NAN;
        assert_eq!(detector().estimate_pitch(&window, 24_000), PitchEstimate::ABSENT);

        // Too short to contain the lag range at this rate.
        let short = sine(440.0, 24_000, 40, 0.5);
        assert!(detector().estimate_pitch(&short, 24_000).frequency_hz.is_none());
    }

    #[test]
    fn tones_outside_the_range_are_rejected() {
        let low = sine(40.0, 24_000, 4096, 0.5);
        let estimate = detector().estimate_pitch(&low, 24_000);
        assert_eq!(estimate.frequency_hz, None);
        assert!((0.0..=1.0).contains(&estimate.confidence));
    }

    #[test]
    fn tone_near_the_upper_limit_is_detected() {
        let window = sine(990.0, 24_000, 4096, 0.5);
        let frequency = detector().estimate_pitch(&window, 24_000).frequency_hz.unwrap();
        assert!((frequency - 990.0).abs() / 990.0 < 0.01, "got {frequency}");
    }

    #[test]
    fn lowest_supported_pitch_at_eco_rate() {
        let window = sine(65.5, 12_000, 2048, 0.5);
        let frequency = detector().estimate_pitch(&window, 12_000).frequency_hz.unwrap();
        assert!((frequency - 65.5).abs() / 65.5 < 0.01, "got {frequency}");
    }

    #[test]
    fn threshold_gates_weak_periodicity() {
        let window = sine(110.0, 24_000, 4096, 0.5);
        let strict = PitchDetector::new(1.0).estimate_pitch(&window, 24_000);
        assert_eq!(strict.frequency_hz, None);
        assert!(strict.confidence > 0.5);
    }

    #[test]
    fn parabola_vertex_is_exact_for_quadratics() {
        // y = 1 - (x - 0.25)^2 sampled at x = -1, 0, 1
        let f = |x: f64| 1.0 - (x - 0.25) * (x - 0.25);
        let (shift, value) = parabolic_peak(f(-1.0), f(0.0), f(1.0)).unwrap();
        assert_abs_diff_eq!(shift, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(value, 1.0, epsilon = 1e-12);
        assert!(parabolic_peak(0.5, 0.5, 0.5).is_none());
    }
}
