//! Counting semaphore.
//!
//! Blocking primitive shared by the memory pool (free slots) and the bounded
//! queue (empty / full slots). Waiters park on a `parking_lot::Condvar`; they
//! never spin.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore.
///
/// `acquire` blocks while the count is zero; `release` increments the count
/// and wakes one waiter.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Create a semaphore seeded with `permits`.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cond: Condvar::new(),
        }
    }

    /// Take one permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take one permit if one is available right now.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Take one permit, waiting at most `timeout`.
    ///
    /// Returns `false` if the timeout elapsed first. A timeout too large to
    /// express as a deadline waits like [`acquire`](Self::acquire).
    #[must_use]
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.acquire();
            return true;
        };
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.cond.wait_until(&mut permits, deadline).timed_out() {
                // A release may have raced the deadline.
                break;
            }
        }
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Return one permit and wake a waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.cond.notify_one();
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        *self.permits.lock()
    }
}
