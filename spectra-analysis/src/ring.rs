//! Fixed-capacity history ring that is always full
//!
//! Every slot holds a valid value from construction on: the ring is seeded
//! with a fill value and each push overwrites the oldest entry.

use std::num::NonZeroUsize;

/// Circular history of the last `capacity` values
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    slots: Vec<T>,
    /// Index of the oldest value, which is also the next write position
    head: usize,
}

impl<T: Copy> HistoryRing<T> {
    /// Create a ring with every slot set to `fill`
    pub fn new(capacity: NonZeroUsize, fill: T) -> Self {
        Self {
            slots: vec![fill; capacity.get()],
            head: 0,
        }
    }

    /// Number of retained values
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Overwrite the oldest value
    #[inline]
    pub fn push(&mut self, value: T) {
        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.slots.len();
    }

    /// Values from oldest to newest
    pub fn snapshot(&self) -> impl Iterator<Item = T> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter()).copied()
    }

    /// Set every slot to `value`
    pub fn fill(&mut self, value: T) {
        self.slots.fill(value);
        self.head = 0;
    }

    /// Change capacity, keeping the newest values and padding older slots
    pub fn resize(&mut self, capacity: NonZeroUsize, pad: T) {
        let capacity = capacity.get();
        let keep = capacity.min(self.slots.len());
        let skip = self.slots.len() - keep;

        let mut slots = Vec::with_capacity(capacity);
        slots.resize(capacity - keep, pad);
        slots.extend(self.snapshot().skip(skip));

        self.slots = slots;
        self.head = 0;
    }
}
