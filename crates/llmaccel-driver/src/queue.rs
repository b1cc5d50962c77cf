//! Fixed-capacity FIFO queues between submitters and the scheduler
//!
//! [`BoundedQueue`] is a plain ring buffer: no allocation after construction,
//! no blocking, and a full queue rejects the push without mutating anything.
//! [`QueueHandle`] shares one across threads; its lock is held only for the
//! O(1) ring operation, which also serializes concurrent producers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fixed-capacity ring buffer
#[derive(Debug)]
pub struct BoundedQueue<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Append at the tail
    ///
    /// # Errors
    ///
    /// Returns the item back, leaving the queue untouched, when full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the head
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    /// Items currently queued
    pub const fn len(&self) -> usize {
        self.len
    }

    /// No items queued
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `len() == capacity()`
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity()
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Cloneable, thread-safe handle to a [`BoundedQueue`]
#[derive(Debug)]
pub struct QueueHandle<T> {
    inner: Arc<Mutex<BoundedQueue<T>>>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> QueueHandle<T> {
    /// Create a shared queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BoundedQueue::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoundedQueue<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking push; see [`BoundedQueue::push`]
    ///
    /// # Errors
    ///
    /// Returns the item back when the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.lock().push(item)
    }

    /// Non-blocking pop
    pub fn pop(&self) -> Option<T> {
        self.lock().pop()
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// No items queued
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn overflow_rejects_without_mutation() {
        let mut q = BoundedQueue::new(100);
        for i in 0..100 {
            assert!(q.push(i).is_ok());
        }
        assert_eq!(q.push(100), Err(100));
        assert_eq!(q.len(), 100);
        assert_eq!(q.pop(), Some(0));
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut q: BoundedQueue<u8> = BoundedQueue::new(2);
        assert_eq!(q.pop(), None);
        q.push(1).unwrap();
        q.pop();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn wraps_around_the_ring() {
        let mut q = BoundedQueue::new(3);
        for round in 0..10 {
            q.push(round).unwrap();
            q.push(round + 100).unwrap();
            assert_eq!(q.pop(), Some(round));
            assert_eq!(q.pop(), Some(round + 100));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let mut q = BoundedQueue::new(0);
        assert!(q.is_full());
        assert_eq!(q.push('x'), Err('x'));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn handle_is_shared_between_threads() {
        let q = QueueHandle::new(64);
        let producer = q.clone();
        let t = std::thread::spawn(move || {
            for i in 0..64 {
                producer.push(i).unwrap();
            }
        });
        t.join().unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, (0..64).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn prop_fifo_order_preserved(items in proptest::collection::vec(any::<u32>(), 0..64), cap in 1usize..64) {
            let mut q = BoundedQueue::new(cap);
            let accepted: Vec<u32> = items.iter().copied().filter(|&i| q.push(i).is_ok()).collect();
            prop_assert_eq!(accepted.len(), items.len().min(cap));
            prop_assert_eq!(&accepted[..], &items[..accepted.len()]);
            let popped: Vec<u32> = std::iter::from_fn(|| q.pop()).collect();
            prop_assert_eq!(popped, accepted);
        }
    }
}
