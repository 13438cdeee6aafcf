//! Two-slot PCM scratch handoff between one producer and the mixer.
//!
//! Each synthesis producer owns the write side of a [`BlockRing`]; the audio
//! callback owns the read side. A slot is filled while its `ready` flag is
//! clear, released with a release store, acquired by the consumer with the
//! matching load, and cleared again once mixed. Slots alternate, so the pair
//! behaves as a bounded FIFO of depth two and neither side ever waits on the
//! other — a full ring fails the fill, an empty ring fails the consume.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One stereo PCM block, planar layout.
pub struct AudioBlock {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl AudioBlock {
    pub fn new(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn silence(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }
}

struct BlockRing {
    slots: [UnsafeCell<AudioBlock>; 2],
    ready: [AtomicBool; 2],
}

// Single-producer/single-consumer discipline: a slot is written only while
// `ready` is false (producer side) and read only while true (consumer side),
// with acquire/release pairs ordering the payload accesses.
unsafe impl Send for BlockRing {}
unsafe impl Sync for BlockRing {}

/// Build one scratch pair of `frames`-sized stereo blocks.
pub fn block_ring(frames: usize) -> (BlockProducer, BlockConsumer) {
    let ring = Arc::new(BlockRing {
        slots: [
            UnsafeCell::new(AudioBlock::new(frames)),
            UnsafeCell::new(AudioBlock::new(frames)),
        ],
        ready: [AtomicBool::new(false), AtomicBool::new(false)],
    });
    (
        BlockProducer {
            ring: Arc::clone(&ring),
            next: 0,
        },
        BlockConsumer { ring, next: 0 },
    )
}

pub struct BlockProducer {
    ring: Arc<BlockRing>,
    next: usize,
}

impl BlockProducer {
    /// Fill the next free slot and publish it. Returns `false` without
    /// calling `fill` when the consumer has not drained that slot yet.
    pub fn try_fill(&mut self, fill: impl FnOnce(&mut AudioBlock)) -> bool {
        let i = self.next;
        if self.ring.ready[i].load(Ordering::Acquire) {
            return false;
        }
        fill(unsafe { &mut *self.ring.slots[i].get() });
        self.ring.ready[i].store(true, Ordering::Release);
        self.next = 1 - i;
        true
    }
}

pub struct BlockConsumer {
    ring: Arc<BlockRing>,
    next: usize,
}

impl BlockConsumer {
    /// Consume the oldest published slot. Returns `false` without calling
    /// `consume` when no block is ready — the caller substitutes silence.
    pub fn try_consume(&mut self, consume: impl FnOnce(&AudioBlock)) -> bool {
        let i = self.next;
        if !self.ring.ready[i].load(Ordering::Acquire) {
            return false;
        }
        consume(unsafe { &*self.ring.slots[i].get() });
        self.ring.ready[i].store(false, Ordering::Release);
        self.next = 1 - i;
        true
    }
}
