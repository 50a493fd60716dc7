//! Bounded FIFO of the most recent samples.

use std::collections::VecDeque;

use crate::types::Sample;

/// Default ring capacity in samples.
pub const DEFAULT_CAPACITY: usize = 512;

/// Keeps the last `capacity` samples; pushing at capacity evicts the oldest.
///
/// Not synchronized on its own. The capture core keeps it behind the same
/// lock as the rest of its state.
#[derive(Debug, Clone)]
pub struct SampleRing {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// The newest `n` samples, oldest first.
    pub fn latest(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<Sample> {
        self.samples.drain(..).collect()
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
