//! A fixed-capacity ring buffer of fixed-size byte items.
//!
//! Items are stored by copy. The buffer never reallocates after
//! construction; `push` and `pop` are index arithmetic plus one `memcpy`
//! each, so they are safe to run inside a critical section.

use alloc::boxed::Box;
use alloc::vec;

/// Ring buffer holding up to `capacity` items of exactly `item_size` bytes.
#[derive(Debug)]
pub struct ItemRing {
    storage: Box<[u8]>,
    item_size: usize,
    capacity: usize,
    head: usize,
    count: usize,
}

impl ItemRing {
    /// Allocate a ring for `capacity` items of `item_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero; callers validate first.
    pub fn new(capacity: usize, item_size: usize) -> Self {
        assert!(
            capacity > 0 && item_size > 0,
            "ring dimensions must be non-zero"
        );
        Self {
            storage: vec![0u8; capacity * item_size].into_boxed_slice(),
            item_size,
            capacity,
            head: 0,
            count: 0,
        }
    }

    /// Copy an item in at the tail. Returns `false` if the ring is full.
    ///
    /// # Panics
    ///
    /// Panics if `item.len() != item_size`.
    pub fn push(&mut self, item: &[u8]) -> bool {
        assert_eq!(
            item.len(),
            self.item_size,
            "item length must equal the ring's item size"
        );
        if self.count == self.capacity {
            return false;
        }
        let tail = (self.head + self.count) % self.capacity;
        let at = tail * self.item_size;
        self.storage[at..at + self.item_size].copy_from_slice(item);
        self.count += 1;
        true
    }

    /// Copy the head item out into `buf`. Returns `false` if the ring is empty.
    ///
    /// # Panics
    ///
    /// Panics if `buf.len() != item_size`.
    pub fn pop(&mut self, buf: &mut [u8]) -> bool {
        assert_eq!(
            buf.len(),
            self.item_size,
            "buffer length must equal the ring's item size"
        );
        if self.count == 0 {
            return false;
        }
        let at = self.head * self.item_size;
        buf.copy_from_slice(&self.storage[at..at + self.item_size]);
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        true
    }

    /// Number of items currently held.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the ring holds no items.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the ring is at capacity.
    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Item capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of each item in bytes.
    pub fn item_size(&self) -> usize {
        self.item_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo() {
        let mut ring = ItemRing::new(3, 2);
        let mut buf = [0u8; 2];

        assert!(ring.push(&[1, 2]));
        assert!(ring.push(&[3, 4]));
        assert_eq!(ring.len(), 2);

        assert!(ring.pop(&mut buf));
        assert_eq!(buf, [1, 2]);
        assert!(ring.pop(&mut buf));
        assert_eq!(buf, [3, 4]);
        assert!(!ring.pop(&mut buf));
    }

    #[test]
    fn full_rejects_push() {
        let mut ring = ItemRing::new(2, 1);

        assert!(ring.push(&[1]));
        assert!(ring.push(&[2]));
        assert!(ring.is_full());
        assert!(!ring.push(&[3]));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn wraps_around() {
        let mut ring = ItemRing::new(2, 1);
        let mut buf = [0u8; 1];

        for i in 0..10u8 {
            assert!(ring.push(&[i]));
            assert!(ring.pop(&mut buf));
            assert_eq!(buf, [i]);
        }
        assert!(ring.is_empty());
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        let _ = ItemRing::new(0, 4);
    }

    #[test]
    #[should_panic]
    fn wrong_item_length_panics() {
        let mut ring = ItemRing::new(2, 4);
        let _ = ring.push(&[1, 2]);
    }
}
