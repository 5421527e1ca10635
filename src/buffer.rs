//! Fixed-capacity ring buffer.
//!
//! Semantics:
//! - `add` never fails; when full, the single oldest entry is evicted first.
//! - `get` removes entries oldest-first, so a flush consumes what it formats.
//! - `resize` keeps the newest entries that fit.
//!
//! Invariants:
//! - `len() <= capacity()` at all times.
//! - Iteration order is insertion order among the entries still held.

use std::collections::VecDeque;

/// Bounded FIFO that overwrites its oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct CyclicBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> CyclicBuffer<T> {
    /// Create a buffer holding at most `capacity` items (clamped to at least 1; the owning
    /// appender rejects zero before it gets here).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity), capacity, evicted: 0 }
    }

    /// Append `item`, evicting the oldest entry if the buffer is full.
    pub fn add(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.evicted += 1;
        }
        self.items.push_back(item);
    }

    /// Remove and return the oldest entry.
    pub fn get(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove every entry, oldest first.
    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, T> {
        self.items.drain(..)
    }

    /// Borrow the held entries oldest-first without consuming them.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped by overflow or by shrinking since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Change the capacity. Shrinking keeps the newest `new_capacity` entries.
    pub fn resize(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1);
        while self.items.len() > new_capacity {
            self.items.pop_front();
            self.evicted += 1;
        }
        if new_capacity > self.capacity {
            self.items.reserve(new_capacity - self.items.len());
        } else {
            self.items.shrink_to(new_capacity);
        }
        self.capacity = new_capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, n: usize) -> CyclicBuffer<usize> {
        let mut buf = CyclicBuffer::new(capacity);
        for i in 0..n {
            buf.add(i);
        }
        buf
    }

    #[test]
    fn holds_most_recent_min_n_c_in_order() {
        for capacity in 1..6 {
            for n in 0..12 {
                let buf = filled(capacity, n);
                let kept = n.min(capacity);
                assert_eq!(buf.len(), kept, "capacity {capacity}, n {n}");
                let held: Vec<usize> = buf.iter().copied().collect();
                let expected: Vec<usize> = (n - kept..n).collect();
                assert_eq!(held, expected, "capacity {capacity}, n {n}");
            }
        }
    }

    #[test]
    fn get_consumes_oldest_first() {
        let mut buf = filled(3, 5);
        assert_eq!(buf.get(), Some(2));
        assert_eq!(buf.get(), Some(3));
        assert_eq!(buf.get(), Some(4));
        assert_eq!(buf.get(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn eviction_is_counted() {
        let buf = filled(2, 5);
        assert_eq!(buf.evicted(), 3);
    }

    #[test]
    fn shrinking_keeps_newest() {
        let mut buf = filled(5, 5);
        buf.resize(2);
        assert_eq!(buf.capacity(), 2);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![3, 4]);

        let mut short = filled(5, 1);
        short.resize(3);
        assert_eq!(short.iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn growing_keeps_everything_and_raises_the_bound() {
        let mut buf = filled(3, 3);
        buf.resize(5);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        buf.add(3);
        buf.add(4);
        assert_eq!(buf.len(), 5);
        buf.add(5);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn drain_empties_in_order() {
        let mut buf = filled(4, 6);
        let drained: Vec<usize> = buf.drain().collect();
        assert_eq!(drained, vec![2, 3, 4, 5]);
        assert!(buf.is_empty());
    }
}
