//! A bounded wait list ordered by priority, then arrival.
//!
//! Holds the identities of waiters parked on a primitive. The best waiter is
//! the one with the highest priority; among equal priorities the one that
//! arrived first wins. Arrival order is carried by a caller-supplied
//! monotonically increasing sequence number, so the list itself stays free
//! of any clock or scheduler knowledge.
//!
//! The list is not synchronized; callers mutate it inside their own critical
//! sections.

use heapless::Vec;

#[derive(Debug, Clone, Copy)]
struct Waiter<I> {
    id: I,
    priority: u8,
    seq: u64,
}

/// An ordered collection of waiter ids, capacity `N`.
///
/// Kept sorted best-first: descending priority, ascending sequence.
#[derive(Debug)]
pub struct WaitList<I, const N: usize> {
    entries: Vec<Waiter<I>, N>,
}

impl<I: Copy + PartialEq, const N: usize> WaitList<I, N> {
    /// Create an empty wait list.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a waiter. `seq` must be unique and increase with arrival time.
    ///
    /// Returns the id back if the list is full.
    pub fn insert(&mut self, id: I, priority: u8, seq: u64) -> Result<(), I> {
        let at = self
            .entries
            .iter()
            .position(|w| w.priority < priority || (w.priority == priority && w.seq > seq))
            .unwrap_or(self.entries.len());

        self.entries
            .insert(at, Waiter { id, priority, seq })
            .map_err(|w| w.id)
    }

    /// Remove and return the best waiter, if any.
    pub fn pop(&mut self) -> Option<I> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).id)
        }
    }

    /// Remove a specific waiter. Returns whether it was present.
    pub fn remove(&mut self, id: &I) -> bool {
        match self.entries.iter().position(|w| w.id == *id) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Whether a specific waiter is present.
    pub fn contains(&self, id: &I) -> bool {
        self.entries.iter().any(|w| w.id == *id)
    }

    /// Number of waiters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list holds no waiters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<I: Copy + PartialEq, const N: usize> Default for WaitList<I, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_highest_priority_first() {
        let mut wl: WaitList<u8, 8> = WaitList::new();

        wl.insert(1, 1, 10).unwrap();
        wl.insert(2, 3, 11).unwrap();
        wl.insert(3, 2, 12).unwrap();

        assert_eq!(wl.pop(), Some(2));
        assert_eq!(wl.pop(), Some(3));
        assert_eq!(wl.pop(), Some(1));
        assert_eq!(wl.pop(), None);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut wl: WaitList<u8, 8> = WaitList::new();

        wl.insert(1, 2, 10).unwrap();
        wl.insert(2, 2, 11).unwrap();
        wl.insert(3, 2, 12).unwrap();

        assert_eq!(wl.pop(), Some(1));
        assert_eq!(wl.pop(), Some(2));
        assert_eq!(wl.pop(), Some(3));
    }

    #[test]
    fn remove_by_id() {
        let mut wl: WaitList<u8, 8> = WaitList::new();

        wl.insert(1, 2, 10).unwrap();
        wl.insert(2, 2, 11).unwrap();

        assert!(wl.contains(&2));
        assert!(wl.remove(&2));
        assert!(!wl.remove(&2));
        assert_eq!(wl.len(), 1);
        assert_eq!(wl.pop(), Some(1));
    }

    #[test]
    fn rejects_when_full() {
        let mut wl: WaitList<u8, 2> = WaitList::new();

        wl.insert(1, 0, 1).unwrap();
        wl.insert(2, 0, 2).unwrap();
        assert_eq!(wl.insert(3, 0, 3), Err(3));
    }
}
