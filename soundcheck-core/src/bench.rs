//! # Bench Recording Module
//!
//! Records the instantaneous level over a bounded session and summarises it
//! (extremes with their times, mean, median, standard deviation). Rendering
//! the report is up to the caller.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::Result;

/// Default upper bound on a recording session.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);

/// Summary of one bench recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchReport {
    /// Seconds since the Unix epoch when the report was produced.
    pub recorded_at_unix: u64,
    pub duration_secs: f32,
    /// (seconds since start, dBFS) pairs in recording order.
    pub samples: Vec<(f32, f32)>,
    pub max_db: f32,
    pub peak_time: f32,
    pub min_db: f32,
    pub min_time: f32,
    pub mean_db: f32,
    pub median_db: f32,
    pub std_db: f32,
}

impl BenchReport {
    /// Saves the report as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}

/// Collects level readings for at most `max_duration`.
#[derive(Debug, Clone)]
pub struct BenchRecorder {
    max_duration: Duration,
    samples: Vec<(f32, f32)>,
    full: bool,
}

impl BenchRecorder {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            max_duration,
            samples: Vec::new(),
            full: false,
        }
    }

    /// Adds a reading taken `elapsed` after the session started.
    ///
    /// Non-finite levels are skipped. Returns `false` once the session has
    /// reached its maximum duration; later readings are ignored.
    pub fn record(&mut self, elapsed: Duration, dbfs: f32) -> bool {
        if self.full {
            return false;
        }
        if dbfs.is_finite() {
            self.samples.push((elapsed.as_secs_f32(), dbfs));
        }
        if elapsed >= self.max_duration {
            debug!("Bench recording reached {:?}", self.max_duration);
            self.full = true;
        }
        !self.full
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Ends the session. Returns `None` when nothing was recorded.
    pub fn finish(self) -> Option<BenchReport> {
        if self.is_empty() {
            return None;
        }
        let samples = self.samples;

        // Strict comparisons keep the first occurrence of each extreme.
        let mut max = samples[0];
        let mut min = samples[0];
        for &(time, db) in &samples[1..] {
            if db > max.1 {
                max = (time, db);
            }
            if db < min.1 {
                min = (time, db);
            }
        }

        let count = samples.len() as f64;
        let mean = samples.iter().map(|&(_, db)| db as f64).sum::<f64>() / count;
        let variance = samples
            .iter()
            .map(|&(_, db)| (db as f64 - mean).powi(2))
            .sum::<f64>()
            / count;

        let mut sorted: Vec<f32> = samples.iter().map(|&(_, db)| db).collect();
        sorted.sort_by(f32::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let recorded_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let duration_secs = samples.last().map(|&(time, _)| time).unwrap_or(0.0);

        info!(
            "Bench report: {} readings over {:.1} s, max {:.1} dBFS, mean {:.1} dBFS",
            samples.len(),
            duration_secs,
            max.1,
            mean
        );

        Some(BenchReport {
            recorded_at_unix,
            duration_secs,
            max_db: max.1,
            peak_time: max.0,
            min_db: min.1,
            min_time: min.0,
            mean_db: mean as f32,
            median_db: median,
            std_db: variance.sqrt() as f32,
            samples,
        })
    }
}

impl Default for BenchRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DURATION)
    }
}
