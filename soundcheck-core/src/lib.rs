// soundcheck-core/src/lib.rs

//! The core logic for the soundcheck level meter and guitar tuner.
//! This crate is responsible for audio capture, the sample ring shared with
//! the analysis thread, level metering, pitch detection and string matching.
//! It is completely headless and contains no rendering code.

pub mod analysis;
pub mod audio;
pub mod bench;
pub mod config;
pub mod error;
pub mod level;
pub mod pitch;
pub mod ring_buffer;
pub mod tuning;

use serde::Serialize;

pub use analysis::{AnalysisWorker, Analyzer, SnapshotCell};
pub use audio::{AudioStream, StreamHealth, StreamMonitor};
pub use config::{MeterConfig, PerformanceProfile, ProfileKind};
pub use error::{MeterError, Result};
pub use level::LevelReading;
pub use pitch::PitchEstimate;
pub use ring_buffer::{AnalysisWindow, SampleRing};
pub use tuning::{ReferenceString, TuningResult};

/// Everything one analysis cycle produced, published for renderers and
/// telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterSnapshot {
    /// Increments once per analysis cycle; 0 before the first one.
    pub sequence: u64,
    pub level: LevelReading,
    pub pitch: PitchEstimate,
    /// Nearest string, present whenever the pitch estimate has a frequency.
    pub tuning: Option<TuningResult>,
    /// Cents offset smoothed across cycles on the same string.
    pub smoothed_cents: Option<f32>,
    pub health: StreamHealth,
}

impl MeterSnapshot {
    /// Snapshot for a meter that has not analysed anything yet.
    pub fn initial(floor_db: f32) -> Self {
        Self {
            sequence: 0,
            level: LevelReading::silent(floor_db),
            pitch: PitchEstimate::ABSENT,
            tuning: None,
            smoothed_cents: None,
            health: StreamHealth::Stopped,
        }
    }
}
