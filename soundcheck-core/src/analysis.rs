//! # Analysis Module
//!
//! The periodic analysis step and the worker thread that drives it.
//!
//! ## Architecture
//! - **Capture callback**: pushes into the [`SampleRing`] (see `audio`)
//! - **Analysis worker**: dedicated thread ticking at a fixed cadence;
//!   snapshots the ring, runs level, pitch and string matching, publishes
//! - **Consumers**: read the latest [`MeterSnapshot`] from a [`SnapshotCell`]
//!   at any time without blocking the worker

use crossbeam_channel::{Sender, TryRecvError, select};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::MeterSnapshot;
use crate::audio::{StreamHealth, StreamMonitor};
use crate::config::{MeterConfig, PerformanceProfile};
use crate::error::Result;
use crate::level::{LevelEstimator, LevelReading};
use crate::pitch::PitchDetector;
use crate::ring_buffer::{AnalysisWindow, SampleRing};
use crate::tuning::{self, TuningResult};

/// Exponential moving average of the cents offset, restarted whenever the
/// matched string changes or the pitch drops out.
#[derive(Debug, Clone)]
struct CentsSmoother {
    alpha: f32,
    current: Option<(&'static str, f32)>,
}

impl CentsSmoother {
    fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            current: None,
        }
    }

    fn update(&mut self, tuning: Option<&TuningResult>) -> Option<f32> {
        self.current = match (tuning, self.current) {
            (Some(result), Some((name, smoothed))) if name == result.string.name => Some((
                name,
                smoothed + self.alpha * (result.cents_offset - smoothed),
            )),
            (Some(result), _) => Some((result.string.name, result.cents_offset)),
            (None, _) => None,
        };
        self.current.map(|(_, cents)| cents)
    }
}

/// One analysis cycle's worth of DSP plus the state carried between cycles
/// (peak-hold and cents smoothing). Owned by a single worker.
#[derive(Debug, Clone)]
pub struct Analyzer {
    sample_rate: u32,
    window_size: usize,
    level: LevelEstimator,
    pitch: PitchDetector,
    smoother: CentsSmoother,
    prior: LevelReading,
    sequence: u64,
}

impl Analyzer {
    pub fn new(config: &MeterConfig, profile: &PerformanceProfile) -> Self {
        Self {
            sample_rate: profile.sample_rate,
            window_size: profile.analysis_window_size,
            level: LevelEstimator::new(
                config.level_floor_db,
                config.peak_hold(),
                config.peak_decay_rate,
            ),
            pitch: PitchDetector::new(config.confidence_threshold),
            smoother: CentsSmoother::new(config.cents_smoothing),
            prior: LevelReading::silent(config.level_floor_db),
            sequence: 0,
        }
    }

    /// Number of samples each cycle wants from the ring.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Snapshot published before the first cycle completes.
    pub fn initial_snapshot(&self) -> MeterSnapshot {
        MeterSnapshot::initial(self.level.floor_db())
    }

    /// Runs one cycle over `window`, `elapsed` after the previous one.
    ///
    /// A window from a stream that is not live holds stale audio, so it is
    /// analysed as silence: the level falls to the floor and no pitch is
    /// reported.
    pub fn process(
        &mut self,
        window: &AnalysisWindow,
        elapsed: Duration,
        health: StreamHealth,
    ) -> MeterSnapshot {
        let samples: &[f32] = if health == StreamHealth::Live {
            window.samples()
        } else {
            &[]
        };

        let level = self.level.compute_level(samples, &self.prior, elapsed);
        self.prior = level;

        let pitch = self.pitch.estimate_pitch(samples, self.sample_rate);
        let tuning = pitch.frequency_hz.and_then(tuning::match_string);
        let smoothed_cents = self.smoother.update(tuning.as_ref());

        self.sequence += 1;
        MeterSnapshot {
            sequence: self.sequence,
            level,
            pitch,
            tuning,
            smoothed_cents,
            health,
        }
    }
}

/// Latest published [`MeterSnapshot`]. Readers and the writer only hold the
/// lock for an `Arc` clone or swap.
pub struct SnapshotCell {
    latest: RwLock<Arc<MeterSnapshot>>,
}

impl SnapshotCell {
    pub fn new(initial: MeterSnapshot) -> Self {
        Self {
            latest: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn publish(&self, snapshot: MeterSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.latest.write() = snapshot;
    }

    pub fn load(&self) -> Arc<MeterSnapshot> {
        Arc::clone(&self.latest.read())
    }
}

/// Handle to the analysis thread. Dropping it stops the thread.
pub struct AnalysisWorker {
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    /// Spawns the worker. Every `interval` it snapshots `ring`, runs
    /// `analyzer` and publishes the result into `cell`.
    pub fn spawn(
        ring: Arc<SampleRing>,
        monitor: StreamMonitor,
        cell: Arc<SnapshotCell>,
        mut analyzer: Analyzer,
        interval: Duration,
        stall_timeout: Duration,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("analysis".into())
            .spawn(move || {
                debug!("Analysis worker started, cycle every {:?}", interval);
                let ticker = crossbeam_channel::tick(interval);
                let mut last_cycle = Instant::now();
                let mut last_health = StreamHealth::Live;

                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> tick => {
                            let Ok(now) = tick else { break };
                            // Cancellation is honoured at every cycle boundary.
                            match shutdown_rx.try_recv() {
                                Err(TryRecvError::Empty) => {}
                                _ => break,
                            }

                            let health = monitor.health(stall_timeout);
                            if health != last_health {
                                match health {
                                    StreamHealth::Live => info!("Audio input is live"),
                                    StreamHealth::Idle => {
                                        warn!("No audio received for {:?}", stall_timeout)
                                    }
                                    StreamHealth::Unavailable => warn!("Audio device unavailable"),
                                    StreamHealth::Stopped => debug!("Audio stream stopped"),
                                }
                                last_health = health;
                            }

                            let window = ring.snapshot(analyzer.window_size());
                            let elapsed = now.saturating_duration_since(last_cycle);
                            last_cycle = now;

                            let snapshot = analyzer.process(&window, elapsed, health);
                            trace!(
                                sequence = snapshot.sequence,
                                position = window.end_position(),
                                dbfs = snapshot.level.instantaneous_dbfs,
                                frequency = ?snapshot.pitch.frequency_hz,
                                "analysis cycle"
                            );
                            cell.publish(snapshot);
                        },
                    }
                }
                debug!("Analysis worker finished");
            })?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
        })
    }

    /// Signals the thread and waits for its current cycle to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // The worker stops on either the message or the disconnect.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Analysis worker panicked");
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn sine(frequency: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(&MeterConfig::default(), &PerformanceProfile::FULL)
    }

    #[test]
    fn cycle_reports_level_pitch_and_string() {
        let mut analyzer = analyzer();
        let window = AnalysisWindow::from_samples(sine(110.2, 24_000, 4096, 1.0));
        let snapshot = analyzer.process(&window, Duration::from_millis(80), StreamHealth::Live);

        assert_eq!(snapshot.sequence, 1);
        assert_abs_diff_eq!(snapshot.level.instantaneous_dbfs, -3.01, epsilon = 0.1);
        let tuning = snapshot.tuning.expect("string should be matched");
        assert_eq!(tuning.string.name, "A2");
        assert!(tuning.cents_offset.abs() < 20.0);
        assert_eq!(snapshot.smoothed_cents, Some(tuning.cents_offset));
        assert_eq!(snapshot.health, StreamHealth::Live);
    }

    #[test]
    fn silence_has_floor_level_and_no_tuning() {
        let mut analyzer = analyzer();
        let window = AnalysisWindow::from_samples(vec![0.0; 4096]);
        let snapshot = analyzer.process(&window, Duration::from_millis(80), StreamHealth::Live);

        assert_eq!(snapshot.level.instantaneous_dbfs, -90.0);
        assert_eq!(snapshot.pitch.frequency_hz, None);
        assert!(snapshot.tuning.is_none());
        assert!(snapshot.smoothed_cents.is_none());
    }

    #[test]
    fn stale_window_is_treated_as_silence() {
        let mut analyzer = analyzer();
        let window = AnalysisWindow::from_samples(sine(196.0, 24_000, 4096, 0.5));
        let snapshot = analyzer.process(&window, Duration::from_millis(80), StreamHealth::Idle);

        assert_eq!(snapshot.level.instantaneous_dbfs, -90.0);
        assert!(snapshot.tuning.is_none());
        assert_eq!(snapshot.health, StreamHealth::Idle);
    }

    #[test]
    fn peak_hold_carries_across_cycles() {
        let mut analyzer = analyzer();
        let loud = AnalysisWindow::from_samples(sine(110.0, 24_000, 4096, 1.0));
        let quiet = AnalysisWindow::from_samples(vec![0.0; 4096]);
        let step = Duration::from_millis(100);

        let first = analyzer.process(&loud, step, StreamHealth::Live);
        let second = analyzer.process(&quiet, step, StreamHealth::Live);

        assert_eq!(second.level.instantaneous_dbfs, -90.0);
        assert_abs_diff_eq!(second.level.peak_dbfs, first.level.peak_dbfs, epsilon = 1e-6);
        assert_eq!(second.level.peak_age, step);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn smoothing_follows_the_same_string_and_resets_on_change() {
        let mut smoother = CentsSmoother::new(0.5);
        let a = |cents| TuningResult {
            string: tuning::reference_strings()[1],
            cents_offset: cents,
        };
        let d = TuningResult {
            string: tuning::reference_strings()[2],
            cents_offset: -4.0,
        };

        assert_eq!(smoother.update(Some(&a(10.0))), Some(10.0));
        assert_eq!(smoother.update(Some(&a(0.0))), Some(5.0));
        assert_eq!(smoother.update(Some(&d)), Some(-4.0));
        assert_eq!(smoother.update(None), None);
        assert_eq!(smoother.update(Some(&a(2.0))), Some(2.0));
    }

    #[test]
    fn snapshot_cell_returns_latest() {
        let cell = SnapshotCell::new(MeterSnapshot::initial(-90.0));
        assert_eq!(cell.load().sequence, 0);

        let mut next = MeterSnapshot::initial(-90.0);
        next.sequence = 7;
        cell.publish(next);
        assert_eq!(cell.load().sequence, 7);
    }
}
