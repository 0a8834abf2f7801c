//! Bounded buffer for deltas that arrive while a resync is in flight.

use std::collections::VecDeque;

use model::DeltaBatch;

/// Holds deltas in arrival order while a fresh snapshot is fetched.
///
/// Bounded with a drop-oldest eviction policy: if resyncs cannot keep up
/// with delta volume, the oldest buffered batches are sacrificed. Dropped
/// batches at the front of the run surface as a gap on replay, which
/// restarts the resync, so correctness is preserved at the cost of
/// another snapshot.
#[derive(Debug)]
pub struct ResyncBuffer {
    capacity: usize,
    batches: VecDeque<DeltaBatch>,
    dropped: u64,
}

impl ResyncBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            batches: VecDeque::with_capacity(capacity.min(64)),
            dropped: 0,
        }
    }

    /// Append a batch, evicting the oldest if the buffer is full.
    pub fn push(&mut self, batch: DeltaBatch) {
        if self.batches.len() >= self.capacity {
            self.batches.pop_front();
            self.dropped += 1;
        }
        self.batches.push_back(batch);
    }

    /// Take the oldest buffered batch for replay.
    pub fn pop(&mut self) -> Option<DeltaBatch> {
        self.batches.pop_front()
    }

    /// Put a batch back at the front, undoing a `pop` whose replay could
    /// not proceed.
    pub fn requeue(&mut self, batch: DeltaBatch) {
        self.batches.push_front(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of batches evicted since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
