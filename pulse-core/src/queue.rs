//! Bounded blocking FIFO
//!
//! Fixed capacity ring (a pre-sized `VecDeque`) guarded by a mutex, with two
//! counting semaphores:
//! - `empty_slots`: seeded to capacity, taken by producers
//! - `full_slots`: seeded to zero, taken by consumers
//!
//! Every successful push posts `full_slots` and every pop posts `empty_slots`,
//! so blocked threads park instead of spinning.
//!
//! Peeks never take a semaphore permit, so they cannot make a concurrent
//! `try_pop` miss a queued item. Blocking peeks park on `pushed`, a condvar
//! tied to the item mutex.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{PulseError, Result};
use crate::sync::Semaphore;

/// Bounded multi-producer / multi-consumer FIFO.
///
/// # Examples
///
/// ```
/// use pulse_core::queue::BoundedQueue;
///
/// # fn main() -> pulse_core::error::Result<()> {
/// let q = BoundedQueue::new(2)?;
/// q.push(1);
/// q.push(2);
/// assert!(q.try_push(3).is_err());
/// assert_eq!(q.pop(), 1);
/// # Ok(())
/// # }
/// ```
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    empty_slots: Semaphore,
    full_slots: Semaphore,
    /// Signalled after every push, for blocking peeks.
    pushed: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PulseError::invalid_argument("queue capacity must be > 0"));
        }
        Ok(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            empty_slots: Semaphore::new(capacity),
            full_slots: Semaphore::new(0),
            pushed: Condvar::new(),
        })
    }

    // Caller holds an `empty_slots` permit.
    fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
        self.pushed.notify_all();
        self.full_slots.release();
    }

    // Caller holds a `full_slots` permit.
    fn dequeue(&self) -> T {
        let item = self.items.lock().pop_front();
        self.empty_slots.release();
        // A full_slots permit is only handed out after the matching push_back.
        match item {
            Some(item) => item,
            None => unreachable!("full_slots permit without a queued item"),
        }
    }

    /// Append `item`, blocking while the queue is full.
    pub fn push(&self, item: T) {
        self.empty_slots.acquire();
        self.enqueue(item);
    }

    /// Append `item` if there is room right now.
    ///
    /// # Errors
    ///
    /// Hands `item` back if the queue is full.
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        if !self.empty_slots.try_acquire() {
            return Err(item);
        }
        self.enqueue(item);
        Ok(())
    }

    /// Append `item`, waiting at most `timeout` for room.
    ///
    /// # Errors
    ///
    /// Hands `item` back if the timeout elapsed first.
    pub fn timed_push(&self, item: T, timeout: Duration) -> std::result::Result<(), T> {
        if !self.empty_slots.acquire_timeout(timeout) {
            return Err(item);
        }
        self.enqueue(item);
        Ok(())
    }

    /// Remove the front item, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        self.full_slots.acquire();
        self.dequeue()
    }

    /// Remove the front item if there is one.
    ///
    /// # Errors
    ///
    /// Returns `Empty` if the queue is empty.
    pub fn try_pop(&self) -> Result<T> {
        if !self.full_slots.try_acquire() {
            return Err(PulseError::Empty);
        }
        Ok(self.dequeue())
    }

    /// Remove the front item, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if nothing arrived in time.
    pub fn timed_pop(&self, timeout: Duration) -> Result<T> {
        if !self.full_slots.acquire_timeout(timeout) {
            return Err(PulseError::Timeout(timeout));
        }
        Ok(self.dequeue())
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Returns `true` if no more items fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Remaining room.
    #[must_use]
    pub fn n_free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Maximum number of items.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Clone the front item without removing it.
    ///
    /// # Errors
    ///
    /// Returns `Empty` if the queue is empty.
    pub fn peek(&self) -> Result<T> {
        self.items.lock().front().cloned().ok_or(PulseError::Empty)
    }

    /// Clone the front item, blocking until there is one.
    ///
    /// The item stays queued. With several consumers on one queue, a later
    /// `pop` may return a different item.
    pub fn wait_front(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(front) = items.front() {
                return front.clone();
            }
            self.pushed.wait(&mut items);
        }
    }

    /// Clone the front item, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if nothing arrived in time.
    pub fn timed_wait_front(&self, timeout: Duration) -> Result<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.wait_front());
        };
        let mut items = self.items.lock();
        loop {
            if let Some(front) = items.front() {
                return Ok(front.clone());
            }
            if self.pushed.wait_until(&mut items, deadline).timed_out() {
                // A push may have raced the deadline.
                return items
                    .front()
                    .cloned()
                    .ok_or(PulseError::Timeout(timeout));
            }
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
