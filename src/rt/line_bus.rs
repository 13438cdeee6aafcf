//! Fan-out of the latest preprocessed sensor line.
//!
//! One writer (the preprocess thread) publishes into a ring of three
//! preallocated payload slots guarded by a release-ordered sequence counter;
//! any number of engine threads copy the published slot into their own
//! buffer. With three slots the slot a reader copies is at least two
//! publications away from the writer's next target, so a copy that raced a
//! publish is detected by re-reading the counter and retried. No payload
//! memory is allocated or reclaimed after construction.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::image::PreprocessedLine;

const SLOTS: u64 = 3;

pub struct LineBus {
    slots: [UnsafeCell<PreprocessedLine>; 3],
    /// Count of publications so far; 0 means nothing published yet.
    /// Publication `s` lives in slot `s % 3`.
    published: AtomicU64,
}

// Readers only copy out of slots the sequence protocol proves stable, and
// the single writer never touches a slot a validated reader can be in.
unsafe impl Send for LineBus {}
unsafe impl Sync for LineBus {}

impl LineBus {
    /// Allocate the bus and hand back the unique publishing handle next to
    /// the shared reader side.
    pub fn new(n_pixels: usize, n_notes: usize) -> (LinePublisher, Arc<LineBus>) {
        let bus = Arc::new(LineBus {
            slots: [
                UnsafeCell::new(PreprocessedLine::new(n_pixels, n_notes)),
                UnsafeCell::new(PreprocessedLine::new(n_pixels, n_notes)),
                UnsafeCell::new(PreprocessedLine::new(n_pixels, n_notes)),
            ],
            published: AtomicU64::new(0),
        });
        (LinePublisher { bus: Arc::clone(&bus) }, bus)
    }

    /// Sequence number of the latest published line, 0 before the first.
    pub fn latest_seq(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Copy the latest published line into `dst` and return its sequence
    /// number. Returns 0 and leaves `dst` untouched when nothing has been
    /// published yet. Never blocks the writer; retries only if the writer
    /// lapped the whole ring mid-copy.
    pub fn snapshot_into(&self, dst: &mut PreprocessedLine) -> u64 {
        loop {
            let s1 = self.published.load(Ordering::Acquire);
            if s1 == 0 {
                return 0;
            }
            let idx = (s1 % SLOTS) as usize;
            unsafe { dst.copy_from(&*self.slots[idx].get()) };
            std::sync::atomic::fence(Ordering::Acquire);
            let s2 = self.published.load(Ordering::Relaxed);
            // Slot s1 % 3 is rewritten only once publication s1 + 2 is
            // visible (the writer then starts on s1 + 3, which wraps onto
            // this slot), so up to one missed publication is harmless.
            if s2 <= s1 + 1 {
                return s1;
            }
            std::hint::spin_loop();
        }
    }
}

/// Unique write side of a [`LineBus`].
pub struct LinePublisher {
    bus: Arc<LineBus>,
}

impl LinePublisher {
    /// Fill the next free slot through `fill`, then make it the latest
    /// published line with release ordering.
    pub fn publish_with(&mut self, fill: impl FnOnce(&mut PreprocessedLine)) {
        let next = self.bus.published.load(Ordering::Relaxed) + 1;
        let idx = (next % SLOTS) as usize;
        unsafe { fill(&mut *self.bus.slots[idx].get()) };
        self.bus.published.store(next, Ordering::Release);
    }
}
