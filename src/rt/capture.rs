//! Real-time-safe volume capture ring.
//!
//! The mixer taps one mono sample per frame into this ring so an observer
//! thread can build meters or debug imagery without touching the callback.
//! Writes are wait-free and drop silently when the observer lags; the
//! sample payload travels as raw `f32` bits through atomics so the ring
//! needs no unsafe code.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub struct CaptureRing {
    cells: Box<[AtomicU32]>,
    write: AtomicUsize,
    read: AtomicUsize,
}

impl CaptureRing {
    pub fn new(capacity: usize) -> Self {
        let cells = (0..capacity.max(1)).map(|_| AtomicU32::new(0)).collect();
        Self {
            cells,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Push one sample from the audio callback. Returns `false` (and drops
    /// the sample) when the ring is full.
    pub fn push(&self, sample: f32) -> bool {
        let w = self.write.load(Ordering::Relaxed);
        let r = self.read.load(Ordering::Acquire);
        if w.wrapping_sub(r) >= self.cells.len() {
            return false;
        }
        self.cells[w % self.cells.len()].store(sample.to_bits(), Ordering::Relaxed);
        self.write.store(w.wrapping_add(1), Ordering::Release);
        true
    }

    /// Drain everything currently buffered into `out`; single consumer.
    /// Returns the number of samples appended.
    pub fn drain(&self, out: &mut Vec<f32>) -> usize {
        let mut r = self.read.load(Ordering::Relaxed);
        let w = self.write.load(Ordering::Acquire);
        let n = w.wrapping_sub(r);
        for _ in 0..n {
            let bits = self.cells[r % self.cells.len()].load(Ordering::Relaxed);
            out.push(f32::from_bits(bits));
            r = r.wrapping_add(1);
        }
        self.read.store(r, Ordering::Release);
        n
    }
}
