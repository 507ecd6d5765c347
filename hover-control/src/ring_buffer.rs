//! Fixed-capacity sample history that evicts the oldest entry when full.

use std::collections::VecDeque;

/// Bounded, insertion-ordered history of samples.
///
/// Pushing into a full buffer evicts exactly one entry, the oldest. The
/// capacity is fixed at construction. Most consumers only look at the tail,
/// so [`recent`](Self::recent) indexes from the newest end (`recent(0)` is the
/// most recent sample, `recent(1)` the one before it).
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> SampleBuffer<T> {
    /// Create an empty buffer holding at most `capacity` samples.
    ///
    /// # Panics
    /// Panics if capacity is 0. [`LoopConfig::validate`](crate::LoopConfig::validate)
    /// rejects a zero history capacity before any buffer is built.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SampleBuffer capacity must be > 0");
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, value: T) {
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.data.iter()
    }

    /// Sample `offset` positions back from the newest.
    ///
    /// `recent(0)` is the most recent sample, `recent(1)` the second most
    /// recent. Returns `None` when fewer than `offset + 1` samples exist.
    pub fn recent(&self, offset: usize) -> Option<&T> {
        let len = self.data.len();
        if offset >= len {
            return None;
        }
        self.data.get(len - 1 - offset)
    }

    /// The newest sample, if any.
    pub fn back(&self) -> Option<&T> {
        self.data.back()
    }

    /// The `k` most recent samples in chronological order.
    ///
    /// Yields fewer than `k` when the buffer holds fewer.
    pub fn last(&self, k: usize) -> impl Iterator<Item = &T> {
        let start = self.data.len().saturating_sub(k);
        self.data.range(start..)
    }
}

impl<T: Clone> SampleBuffer<T> {
    /// Copy the contents out, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

impl<'a, T> IntoIterator for &'a SampleBuffer<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}
