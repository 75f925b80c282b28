//! # Sample Ring Module
//!
//! Fixed-capacity circular buffer bridging the capture callback (producer)
//! and the analysis worker (consumer).
//!
//! - The producer never waits for the consumer: when a chunk does not fit,
//!   the oldest samples are overwritten.
//! - Storage is allocated once in [`SampleRing::new`]; pushing never allocates.
//! - The lock is held only while samples are copied in or out, never while
//!   DSP runs, so a [`AnalysisWindow`] is always an untorn snapshot.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Single-producer / single-consumer circular sample buffer.
pub struct SampleRing {
    inner: Mutex<RingState>,
    capacity: usize,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last push (or clear).
    last_write_ms: AtomicU64,
}

struct RingState {
    samples: Box<[f32]>,
    write_pos: usize,
    total_written: u64,
}

impl RingState {
    fn write(&mut self, samples: impl ExactSizeIterator<Item = f32>) {
        let capacity = self.samples.len();
        let len = samples.len();
        // Only the tail of an oversized chunk survives anyway.
        for sample in samples.skip(len.saturating_sub(capacity)) {
            self.samples[self.write_pos] = sample.clamp(-1.0, 1.0);
            self.write_pos += 1;
            if self.write_pos == capacity {
                self.write_pos = 0;
            }
        }
        self.total_written += len as u64;
    }
}

impl SampleRing {
    /// Creates a zero-filled ring. A zero capacity is bumped to one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingState {
                samples: vec![0.0; capacity].into_boxed_slice(),
                write_pos: 0,
                total_written: 0,
            }),
            capacity,
            epoch: Instant::now(),
            last_write_ms: AtomicU64::new(0),
        }
    }

    /// Writes a mono chunk, overwriting the oldest samples on overflow.
    /// Called from the capture callback.
    pub fn push(&self, chunk: &[f32]) {
        if chunk.is_empty() {
            return;
        }
        self.inner.lock().write(chunk.iter().copied());
        self.touch();
    }

    /// Downmixes interleaved frames to mono while writing them.
    /// A trailing partial frame is dropped.
    pub fn push_interleaved(&self, data: &[f32], channels: usize) {
        match channels {
            0 => {}
            1 => self.push(data),
            _ => {
                if data.len() < channels {
                    return;
                }
                let scale = 1.0 / channels as f32;
                let frames = data
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale);
                self.inner.lock().write(frames);
                self.touch();
            }
        }
    }

    /// Copies the most recent `n` samples, oldest first.
    ///
    /// `n` is capped at the capacity. When fewer than `n` samples have been
    /// written since the last clear, the leading entries are silence.
    pub fn snapshot(&self, n: usize) -> AnalysisWindow {
        let n = n.min(self.capacity);
        let mut out = vec![0.0; n];

        let state = self.inner.lock();
        let available = state.total_written.min(self.capacity as u64) as usize;
        let take = available.min(n);
        let lead = n - take;
        let start = (state.write_pos + self.capacity - take) % self.capacity;
        let first = take.min(self.capacity - start);
        out[lead..lead + first].copy_from_slice(&state.samples[start..start + first]);
        out[lead + first..].copy_from_slice(&state.samples[..take - first]);
        let end_position = state.total_written;
        drop(state);

        AnalysisWindow {
            samples: out,
            end_position,
        }
    }

    /// Discards all samples and restarts the liveness clock.
    pub fn clear(&self) {
        {
            let mut state = self.inner.lock();
            state.samples.fill(0.0);
            state.write_pos = 0;
            state.total_written = 0;
        }
        self.touch();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples pushed since the last clear, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.inner.lock().total_written
    }

    /// Time since the producer last delivered samples.
    pub fn last_write_age(&self) -> Duration {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let last_ms = self.last_write_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms.saturating_sub(last_ms))
    }

    fn touch(&self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_write_ms.store(now_ms, Ordering::Release);
    }
}

/// Read-only copy of the most recent samples, taken in one locked step.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisWindow {
    samples: Vec<f32>,
    end_position: u64,
}

impl AnalysisWindow {
    /// Wraps samples that did not come from a ring (files, tests).
    pub fn from_samples(samples: Vec<f32>) -> Self {
        let end_position = samples.len() as u64;
        Self {
            samples,
            end_position,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Ring write counter at the moment of the copy. Equal values across
    /// cycles mean no new audio arrived.
    pub fn end_position(&self) -> u64 {
        self.end_position
    }
}
