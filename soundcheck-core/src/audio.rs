//! # Audio Capture Module
//!
//! Real-time capture from the default input device through CPAL, feeding
//! the [`SampleRing`].
//!
//! ## Features
//! - Input format selection for the profile's sample rate (mono preferred,
//!   multichannel input downmixed in the callback)
//! - Idempotent start/stop, safe to call after a device error
//! - Liveness tracking so a vanished microphone can be told apart from a
//!   quiet room

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, SupportedStreamConfigRange};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PerformanceProfile;
use crate::error::{MeterError, Result};
use crate::ring_buffer::SampleRing;

/// Liveness of the capture source as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamHealth {
    /// Samples are arriving.
    Live,
    /// Running, but nothing was delivered within the stall timeout.
    /// Usually a disconnected device that did not report an error.
    Idle,
    /// The device reported an error. Restart the stream to recover.
    Unavailable,
    /// Not started, or stopped by the owner.
    Stopped,
}

/// Cloneable, thread-safe view of a stream's liveness.
#[derive(Clone)]
pub struct StreamMonitor {
    ring: Arc<SampleRing>,
    running: Arc<AtomicBool>,
    device_failed: Arc<AtomicBool>,
}

impl StreamMonitor {
    /// Monitor for a ring fed by something other than [`AudioStream`].
    /// It reports as running until [`StreamMonitor::mark_stopped`].
    pub fn detached(ring: Arc<SampleRing>) -> Self {
        Self {
            ring,
            running: Arc::new(AtomicBool::new(true)),
            device_failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn health(&self, stall_timeout: Duration) -> StreamHealth {
        if self.device_failed.load(Ordering::Acquire) {
            StreamHealth::Unavailable
        } else if !self.running.load(Ordering::Acquire) {
            StreamHealth::Stopped
        } else if self.ring.last_write_age() > stall_timeout {
            StreamHealth::Idle
        } else {
            StreamHealth::Live
        }
    }

    /// Flags the capture source as failed. Called from the device error
    /// callback.
    pub fn mark_failed(&self) {
        self.device_failed.store(true, Ordering::Release);
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Forgets an earlier device failure. Only valid while no stream exists,
    /// so that a failure of the next stream cannot be overwritten.
    fn rearm(&self) {
        self.device_failed.store(false, Ordering::Release);
    }

    fn open_gate(&self) {
        self.running.store(true, Ordering::Release);
    }
}

/// Capture stream bound to one [`PerformanceProfile`].
pub struct AudioStream {
    profile: PerformanceProfile,
    ring: Arc<SampleRing>,
    monitor: StreamMonitor,
    stream: Option<cpal::Stream>,
}

impl AudioStream {
    /// Validates the profile and allocates the ring. No device is opened yet.
    pub fn new(profile: PerformanceProfile) -> Result<Self> {
        profile.validate()?;
        let ring = Arc::new(SampleRing::new(profile.buffer_capacity));
        let monitor = StreamMonitor {
            ring: Arc::clone(&ring),
            running: Arc::new(AtomicBool::new(false)),
            device_failed: Arc::new(AtomicBool::new(false)),
        };
        Ok(Self {
            profile,
            ring,
            monitor,
            stream: None,
        })
    }

    pub fn profile(&self) -> &PerformanceProfile {
        &self.profile
    }

    /// Shared handle to the ring for the analysis worker.
    pub fn ring(&self) -> Arc<SampleRing> {
        Arc::clone(&self.ring)
    }

    pub fn monitor(&self) -> StreamMonitor {
        self.monitor.clone()
    }

    pub fn health(&self, stall_timeout: Duration) -> StreamHealth {
        self.monitor.health(stall_timeout)
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some() && self.monitor.running.load(Ordering::Acquire)
    }

    /// Opens the default input device and starts capturing into the ring.
    ///
    /// This function:
    /// 1. Tears down a stream whose device reported an error
    /// 2. Selects an f32 input format at the profile's sample rate
    /// 3. Builds a stream whose callback downmixes into the ring while the
    ///    running gate is open, and flags the monitor on device errors
    ///
    /// Does nothing if already running with a healthy device.
    ///
    /// # Returns
    /// * `Ok(())` - Capture is running
    /// * `Err(MeterError::DeviceUnavailable)` - No usable device or format, or
    ///   the stream could not be built or played. The monitor then reports
    ///   `Unavailable` and `start` may be retried.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            if !self.monitor.device_failed.load(Ordering::Acquire) {
                return Ok(());
            }
            // Restarting after a device error.
            self.stop();
        }

        // A failed device stays flagged until a new stream is being built.
        self.ring.clear();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MeterError::DeviceUnavailable("No input device available".into()))?;

        info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, self.profile.sample_rate)
            .ok_or_else(|| {
                MeterError::DeviceUnavailable(format!(
                    "No f32 input format at {} Hz",
                    self.profile.sample_rate
                ))
            })?;

        let config: cpal::StreamConfig = supported_config
            .with_sample_rate(SampleRate(self.profile.sample_rate))
            .into();
        let channels = config.channels as usize;
        info!(
            "Audio config: {} Hz, {} channel(s), ring of {} samples",
            config.sample_rate.0, channels, self.profile.buffer_capacity
        );

        let ring = Arc::clone(&self.ring);
        let running = Arc::clone(&self.monitor.running);
        let error_monitor = self.monitor.clone();

        self.monitor.rearm();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if running.load(Ordering::Relaxed) {
                        ring.push_interleaved(data, channels);
                    }
                },
                move |err| {
                    error!("An error occurred on the audio stream: {}", err);
                    error_monitor.mark_failed();
                },
                None,
            )
            .inspect_err(|_| self.monitor.mark_failed())?;

        // The gate must be open before playback or the first callbacks are lost.
        self.monitor.open_gate();
        if let Err(e) = stream.play() {
            self.monitor.mark_stopped();
            self.monitor.mark_failed();
            return Err(e.into());
        }

        self.stream = Some(stream);
        debug!("Capture started");
        Ok(())
    }

    /// Stops capturing. Idempotent and safe after a device error.
    ///
    /// The callback gate closes before the device stream is torn down, so no
    /// push happens after this returns.
    pub fn stop(&mut self) {
        self.monitor.running.store(false, Ordering::Release);

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                // Expected when the device is already gone.
                warn!("Error pausing stream: {}", e);
            }
            drop(stream);
            debug!("Capture stopped");
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Finds an f32 input configuration that can run at `target_rate`,
/// preferring the fewest channels.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.channels() > 0
                && c.min_sample_rate().0 <= target_rate
                && c.max_sample_rate().0 >= target_rate
        })
        .min_by_key(|c| c.channels())
}
