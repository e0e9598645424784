//! Subscription list
//!
//! Design:
//! - Keep (packet id, queue) pairs in a Vec sorted by packet id, then queue.
//! - subscribe/unsubscribe: O(log N) search + O(N) insert/remove shift.
//! - `fan_out` hot path: binary search to the first pair for the id, then a
//!   contiguous forward scan. No allocation for typical subscriber counts.
//! - The list never grows past its configured maximum.

use smallvec::SmallVec;
use std::fmt;

use crate::error::{PulseError, Result};

/// Application-defined packet identifier.
pub type PacketId = u32;

/// Handle of a receive queue on a bus.
///
/// Queue ids are dense indices handed out in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RxQueueId(pub(crate) usize);

impl RxQueueId {
    /// Position of the queue on its bus.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RxQueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rxq#{}", self.0)
    }
}

/// Sorted set of (packet id, queue) subscriptions with a fixed upper bound.
#[derive(Debug)]
pub struct SubscriptionList {
    subs: Vec<(PacketId, RxQueueId)>,
    max: usize,
}

impl SubscriptionList {
    /// Empty list accepting at most `max` subscriptions.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            subs: Vec::with_capacity(max),
            max,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Configured upper bound.
    #[inline]
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Adds a subscription of `queue` to `packet_id`.
    ///
    /// # Errors
    ///
    /// - `Duplicate` if the pair is already present
    /// - `Exhausted` if the list is at its maximum
    pub fn subscribe(&mut self, packet_id: PacketId, queue: RxQueueId) -> Result<()> {
        match self.subs.binary_search(&(packet_id, queue)) {
            Ok(_) => Err(PulseError::Duplicate {
                packet_id,
                queue: queue.index(),
            }),
            Err(_) if self.subs.len() >= self.max => {
                Err(PulseError::Exhausted("subscription list"))
            }
            Err(idx) => {
                self.subs.insert(idx, (packet_id, queue));
                Ok(())
            }
        }
    }

    /// Removes the subscription of `queue` to `packet_id`.
    ///
    /// Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, packet_id: PacketId, queue: RxQueueId) -> bool {
        match self.subs.binary_search(&(packet_id, queue)) {
            Ok(idx) => {
                self.subs.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Queues subscribed to `packet_id`, in queue order.
    pub fn fan_out(&self, packet_id: PacketId) -> impl Iterator<Item = RxQueueId> + '_ {
        let start = self.subs.partition_point(|&(id, _)| id < packet_id);
        self.subs[start..]
            .iter()
            .take_while(move |&&(id, _)| id == packet_id)
            .map(|&(_, queue)| queue)
    }

    /// Collected form of [`fan_out`](Self::fan_out).
    #[must_use]
    pub fn subscribers(&self, packet_id: PacketId) -> SmallVec<[RxQueueId; 8]> {
        self.fan_out(packet_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: RxQueueId = RxQueueId(0);
    const B: RxQueueId = RxQueueId(1);
    const C: RxQueueId = RxQueueId(2);

    #[test]
    fn subscribe_and_fan_out() {
        let mut list = SubscriptionList::new(8);
        list.subscribe(3, B).unwrap();
        list.subscribe(7, A).unwrap();
        list.subscribe(3, A).unwrap();
        list.subscribe(1, C).unwrap();

        assert_eq!(list.subscribers(3).as_slice(), &[A, B]);
        assert_eq!(list.subscribers(1).as_slice(), &[C]);
        assert!(list.subscribers(2).is_empty());
        assert!(list.subscribers(u32::MAX).is_empty());
    }

    #[test]
    fn duplicate_rejected() {
        let mut list = SubscriptionList::new(8);
        list.subscribe(3, A).unwrap();
        assert_eq!(
            list.subscribe(3, A),
            Err(PulseError::Duplicate {
                packet_id: 3,
                queue: 0
            })
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn full_list_rejects_new_pairs() {
        let mut list = SubscriptionList::new(2);
        list.subscribe(1, A).unwrap();
        list.subscribe(2, A).unwrap();
        assert_eq!(
            list.subscribe(3, A),
            Err(PulseError::Exhausted("subscription list"))
        );
        // Duplicates are still reported as duplicates when full.
        assert!(matches!(list.subscribe(1, A), Err(PulseError::Duplicate { .. })));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut list = SubscriptionList::new(4);
        list.subscribe(5, A).unwrap();
        list.subscribe(5, B).unwrap();

        assert!(list.unsubscribe(5, A));
        assert!(!list.unsubscribe(5, A));
        assert!(!list.unsubscribe(9, C));
        assert_eq!(list.subscribers(5).as_slice(), &[B]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn freed_capacity_is_reusable() {
        let mut list = SubscriptionList::new(1);
        list.subscribe(1, A).unwrap();
        list.unsubscribe(1, A);
        list.subscribe(2, B).unwrap();
        assert_eq!(list.subscribers(2).as_slice(), &[B]);
    }
}
