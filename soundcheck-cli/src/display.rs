//! Terminal rendering of a [`MeterSnapshot`].

use soundcheck_core::{MeterSnapshot, StreamHealth};

/// Width of the cents needle, in characters, for ±50 cents.
const NEEDLE_WIDTH: usize = 21;

/// One status line: level, peak, nearest string and a needle.
pub fn format_snapshot(snapshot: &MeterSnapshot, tuned_tolerance: f32) -> String {
    let level = &snapshot.level;
    let mut line = format!(
        "{:>6.1} dBFS  peak {:>6.1}",
        level.instantaneous_dbfs, level.peak_dbfs
    );

    match snapshot.health {
        StreamHealth::Live => {}
        StreamHealth::Idle => return format!("{line}  | no input (microphone disconnected?)"),
        StreamHealth::Unavailable => return format!("{line}  | audio device unavailable"),
        StreamHealth::Stopped => return format!("{line}  | stopped"),
    }

    match (&snapshot.tuning, snapshot.pitch.frequency_hz) {
        (Some(tuning), Some(frequency)) => {
            let cents = snapshot.smoothed_cents.unwrap_or(tuning.cents_offset);
            let verdict = if cents.abs() <= tuned_tolerance {
                "in tune"
            } else if cents < 0.0 {
                "flat"
            } else {
                "sharp"
            };
            line.push_str(&format!(
                "  | {:<2} {:>7.2} Hz {:>+6.1} cents {} {}",
                tuning.string.name,
                frequency,
                cents,
                needle(cents),
                verdict
            ));
        }
        _ => line.push_str("  | --"),
    }
    line
}

/// `[----|----]` style needle with the marker placed by `cents`.
fn needle(cents: f32) -> String {
    let half = (NEEDLE_WIDTH / 2) as f32;
    let offset = (cents / 50.0).clamp(-1.0, 1.0) * half;
    let position = (half + offset).round() as usize;
    let mut bar: Vec<char> = vec!['-'; NEEDLE_WIDTH];
    bar[NEEDLE_WIDTH / 2] = '|';
    bar[position.min(NEEDLE_WIDTH - 1)] = '*';
    format!("[{}]", bar.into_iter().collect::<String>())
}
