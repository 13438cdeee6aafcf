//! Monotonic runtime counters.
//!
//! Every recoverable condition in the pipeline increments one of these;
//! nothing in the real-time path ever reports an error any other way. Any
//! thread may take a [`StatusSnapshot`] at any time.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineId {
    Additive = 0,
    Polyphonic = 1,
    Photowave = 2,
}

pub const ENGINE_COUNT: usize = 3;

#[derive(Default)]
pub struct StatusCounters {
    frames_dropped: AtomicU64,
    buffer_misses: [AtomicU64; ENGINE_COUNT],
    voices_starved: AtomicU64,
    numeric_anomalies: AtomicU64,
    underruns: AtomicU64,
}

impl StatusCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_buffer_miss(&self, engine: EngineId) {
        self.buffer_misses[engine as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_voice_starved(&self) {
        self.voices_starved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_numeric_anomaly(&self) {
        self.numeric_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            buffer_misses: [
                self.buffer_misses[0].load(Ordering::Relaxed),
                self.buffer_misses[1].load(Ordering::Relaxed),
                self.buffer_misses[2].load(Ordering::Relaxed),
            ],
            voices_starved: self.voices_starved.load(Ordering::Relaxed),
            numeric_anomalies: self.numeric_anomalies.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub frames_dropped: u64,
    pub buffer_misses: [u64; ENGINE_COUNT],
    pub voices_starved: u64,
    pub numeric_anomalies: u64,
    pub underruns: u64,
}

impl StatusSnapshot {
    pub fn buffer_misses_for(&self, engine: EngineId) -> u64 {
        self.buffer_misses[engine as usize]
    }
}
