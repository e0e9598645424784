//! PULSE bus
//!
//! Responsibilities:
//! - Own the buffer pools, the receive queues and the subscription list.
//! - Reserve a buffer for a publish, then fan it out zero-copy: every
//!   subscriber queue gets a `Delivery` holding its own reference on the same
//!   pool slot.
//! - Drop the publisher's reference once fan-out is done. The slot returns to
//!   its pool when the last subscriber releases its delivery.
//!
//! Concurrency model:
//! - The bus mutex guards the subscription list and serializes fan-outs.
//! - Each pool has a service lock. With `FanOutStrategy::Atomic` the publisher
//!   holds it for the whole fan-out and consumers take it before touching a
//!   delivery from that pool, so nobody services a packet until every
//!   subscriber has it.
//! - Reservation never holds the bus mutex and never blocks on a pool.
//!
//! Lock order: bus mutex, then pool service lock, then queue mutex, then pool
//! slot table. Consumers never hold a queue mutex while waiting on a service
//! lock.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::alloc::{Buffer, BufferMut, MemoryPool};
use crate::error::{PulseError, Result};
use crate::options::{BusOptions, FanOutStrategy};
use crate::pubsub::index::SubscriptionList;
use crate::queue::BoundedQueue;

pub use crate::pubsub::index::{PacketId, RxQueueId};

/// One packet as seen by one subscriber.
///
/// Holds a reference on the payload's pool slot. Dropping it (or calling
/// [`release`](Self::release)) gives that reference back.
#[derive(Debug, Clone)]
pub struct Delivery {
    packet_id: PacketId,
    pool: usize,
    buffer: Buffer,
}

impl Delivery {
    /// Packet id the payload was published under.
    #[inline]
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Index of the bus pool that served the payload.
    #[inline]
    #[must_use]
    pub const fn pool_index(&self) -> usize {
        self.pool
    }

    /// Published bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Always `false` for a delivery; empty payloads are never published.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Address of the payload. Every subscriber of one publish sees the same
    /// address.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    /// Current reference count of the payload's slot.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> i32 {
        self.buffer.ref_count()
    }

    /// Shared handle on the payload.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Give the reference back, reporting bookkeeping failures.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the slot was no longer allocated.
    pub fn release(self) -> Result<()> {
        self.buffer.release()
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose queue accepted the packet.
    pub delivered: usize,
    /// Subscribers skipped because their queue was full.
    pub dropped: usize,
    /// Index of the pool that served the payload.
    pub pool: usize,
}

/// Snapshot of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Successful publishes, including ones with no subscriber.
    pub published: u64,
    /// Deliveries accepted by a subscriber queue.
    pub delivered: u64,
    /// Deliveries lost to a full subscriber queue.
    pub dropped: u64,
    /// Publishes that found no buffer.
    pub reserve_failures: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    reserve_failures: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reserve_failures: self.reserve_failures.load(Ordering::Relaxed),
        }
    }
}

struct BusPool {
    pool: MemoryPool,
    /// Held by an atomic fan-out; taken briefly by consumers.
    service: Mutex<()>,
}

struct BusState {
    subs: SubscriptionList,
    n_queues: usize,
}

/// In-process publish/subscribe bus over pooled, reference-counted buffers.
///
/// # Examples
///
/// ```
/// use pulse_core::options::BusOptions;
/// use pulse_core::pubsub::bus::PulseBus;
///
/// # fn main() -> pulse_core::error::Result<()> {
/// let bus = PulseBus::new(BusOptions::new().with_pool(64, 4))?;
/// let rxq = bus.rxq_init(8)?;
/// bus.subscribe(rxq, 7)?;
///
/// let report = bus.publish(7, b"hello")?;
/// assert_eq!(report.delivered, 1);
///
/// let front = bus.wait_front(rxq)?;
/// assert_eq!(front.payload(), b"hello");
/// drop(front);
/// bus.pop_front(rxq)?;
/// assert_eq!(bus.pool_n_free(0)?, 4);
/// # Ok(())
/// # }
/// ```
pub struct PulseBus {
    queues: Box<[OnceCell<BoundedQueue<Delivery>>]>,
    pools: Vec<BusPool>,
    max_element_size: usize,
    state: Mutex<BusState>,
    fan_out: FanOutStrategy,
    stats: StatCounters,
}

impl PulseBus {
    /// Build a bus.
    ///
    /// Every pool gets reference counting regardless of its options. A bus
    /// with no pools is valid; every publish on it fails.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a limit is out of range or a pool's
    /// options fail validation.
    pub fn new(options: BusOptions) -> Result<Self> {
        options.validate()?;
        let max_element_size = options.max_element_size();

        let BusOptions {
            pools,
            max_queues,
            max_subscriptions,
            fan_out,
        } = options;

        let pools = pools
            .into_iter()
            .map(|opts| {
                Ok(BusPool {
                    pool: MemoryPool::new(opts.with_ref_counting(true))?,
                    service: Mutex::new(()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "[BUS] Created bus: pools={:?}, max_queues={}, max_subscriptions={}, fan_out={:?}",
            pools
                .iter()
                .map(|p| (p.pool.element_size(), p.pool.capacity()))
                .collect::<Vec<_>>(),
            max_queues,
            max_subscriptions,
            fan_out
        );

        Ok(Self {
            queues: (0..max_queues).map(|_| OnceCell::new()).collect(),
            pools,
            max_element_size,
            state: Mutex::new(BusState {
                subs: SubscriptionList::new(max_subscriptions),
                n_queues: 0,
            }),
            fan_out,
            stats: StatCounters::default(),
        })
    }

    /// Create the next receive queue.
    ///
    /// Queues live until the bus is dropped.
    ///
    /// # Errors
    ///
    /// - `Exhausted` if `max_queues` queues already exist
    /// - `InvalidArgument` if `capacity` is zero
    pub fn rxq_init(&self, capacity: usize) -> Result<RxQueueId> {
        let mut state = self.state.lock();
        let index = state.n_queues;
        let cell = self
            .queues
            .get(index)
            .ok_or(PulseError::Exhausted("receive queues"))?;
        cell.set(BoundedQueue::new(capacity)?).map_err(|_| {
            PulseError::internal(format!("receive queue {index} already initialized"))
        })?;
        state.n_queues += 1;
        drop(state);

        debug!("[BUS] Created receive queue {} (capacity={})", index, capacity);
        Ok(RxQueueId(index))
    }

    fn queue(&self, id: RxQueueId) -> Result<&BoundedQueue<Delivery>> {
        self.queues
            .get(id.index())
            .and_then(OnceCell::get)
            .ok_or_else(|| PulseError::invalid_argument(format!("unknown receive queue {id}")))
    }

    /// Subscribe `queue` to `packet_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown queue
    /// - `Duplicate` if already subscribed
    /// - `Exhausted` at `max_subscriptions`
    pub fn subscribe(&self, queue: RxQueueId, packet_id: PacketId) -> Result<()> {
        self.queue(queue)?;
        self.state.lock().subs.subscribe(packet_id, queue)?;
        debug!("[BUS] {} subscribed to packet {}", queue, packet_id);
        Ok(())
    }

    /// Unsubscribe `queue` from `packet_id`. Absent pairs are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown queue.
    pub fn unsubscribe(&self, queue: RxQueueId, packet_id: PacketId) -> Result<()> {
        self.queue(queue)?;
        if self.state.lock().subs.unsubscribe(packet_id, queue) {
            debug!("[BUS] {} unsubscribed from packet {}", queue, packet_id);
        }
        Ok(())
    }

    /// Reserve a buffer of at least `size` bytes for a zero-copy publish.
    ///
    /// Pools are scanned in declaration order; the first one large enough
    /// with a free slot serves the request. Never blocks.
    ///
    /// The returned buffer's length is `size`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuitableBuffer` if `size` is zero, larger than every pool,
    /// or every large enough pool is full.
    pub fn reserve(&self, size: usize) -> Result<BufferMut> {
        if size > 0 && size <= self.max_element_size {
            for bp in &self.pools {
                if bp.pool.element_size() < size || bp.pool.is_full() {
                    continue;
                }
                match bp.pool.try_request() {
                    Ok(mut buf) => {
                        buf.set_len(size)?;
                        return Ok(buf);
                    }
                    // Lost a race for the last slot; keep scanning.
                    Err(e) if e.is_exhausted() => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        self.stats.reserve_failures.fetch_add(1, Ordering::Relaxed);
        debug!("[BUS] No suitable buffer for {} bytes", size);
        Err(PulseError::NoSuitableBuffer { size })
    }

    /// Copy `payload` into a pooled buffer and fan it out to every
    /// subscriber of `packet_id`.
    ///
    /// # Errors
    ///
    /// - `NoSuitableBuffer` if no buffer could be reserved
    /// - `Internal` if releasing the publisher's reference failed
    pub fn publish(&self, packet_id: PacketId, payload: &[u8]) -> Result<PublishReport> {
        let mut buf = self.reserve(payload.len())?;
        buf.copy_from_slice(payload);
        self.publish_release(packet_id, buf, payload.len())
    }

    /// Fan out a buffer obtained from [`reserve`](Self::reserve) and filled
    /// by the caller, then drop the publisher's reference.
    ///
    /// A full subscriber queue is skipped and counted in
    /// [`PublishReport::dropped`]; it does not fail the publish.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `buffer` did not come from this bus, or `size`
    ///   is zero or larger than the buffer's slot
    /// - `Internal` if releasing the publisher's reference failed, after
    ///   fan-out completed
    pub fn publish_release(
        &self,
        packet_id: PacketId,
        mut buffer: BufferMut,
        size: usize,
    ) -> Result<PublishReport> {
        let pool = self
            .pools
            .iter()
            .position(|bp| bp.pool.owns_mut(&buffer))
            .ok_or_else(|| PulseError::invalid_argument("buffer does not belong to this bus"))?;
        if size == 0 {
            return Err(PulseError::invalid_argument("cannot publish an empty payload"));
        }
        buffer.set_len(size)?;
        let buffer = buffer.freeze()?;

        let mut report = PublishReport {
            delivered: 0,
            dropped: 0,
            pool,
        };

        let state = self.state.lock();
        let service = match self.fan_out {
            FanOutStrategy::Atomic => Some(self.pools[pool].service.lock()),
            FanOutStrategy::Streaming => None,
        };

        for rxq in state.subs.fan_out(packet_id) {
            let Some(queue) = self.queues.get(rxq.index()).and_then(OnceCell::get) else {
                error!("[BUS] Subscription to missing queue {}", rxq);
                continue;
            };
            let delivery = Delivery {
                packet_id,
                pool,
                buffer: buffer.clone(),
            };
            match queue.try_push(delivery) {
                Ok(()) => report.delivered += 1,
                Err(rejected) => {
                    // Hands the subscriber's reference straight back.
                    drop(rejected);
                    report.dropped += 1;
                    warn!("[BUS] {} full, packet {} dropped", rxq, packet_id);
                }
            }
        }

        let released = buffer.release();
        drop(service);
        drop(state);

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        trace!(
            "[BUS] Published packet {} ({} bytes, pool {}): delivered={}, dropped={}",
            packet_id,
            size,
            pool,
            report.delivered,
            report.dropped
        );

        if let Err(e) = released {
            error!("[BUS] Publisher release failed for packet {}: {}", packet_id, e);
            return Err(e);
        }
        Ok(report)
    }

    /// Wait until an atomic fan-out touching this delivery's pool finishes.
    fn serviced(&self, delivery: Delivery) -> Delivery {
        if self.fan_out == FanOutStrategy::Atomic {
            if let Some(bp) = self.pools.get(delivery.pool) {
                drop(bp.service.lock());
            }
        }
        delivery
    }

    /// Return the front delivery of `queue` without removing it, blocking
    /// until there is one.
    ///
    /// The returned handle carries its own reference; the queued entry keeps
    /// the subscriber's reference until [`pop_front`](Self::pop_front).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown queue.
    pub fn wait_front(&self, queue: RxQueueId) -> Result<Delivery> {
        let front = self.queue(queue)?.wait_front();
        Ok(self.serviced(front))
    }

    /// Like [`wait_front`](Self::wait_front), waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown queue
    /// - `Timeout` if nothing arrived in time
    pub fn timed_wait_front(&self, queue: RxQueueId, timeout: Duration) -> Result<Delivery> {
        let front = self.queue(queue)?.timed_wait_front(timeout)?;
        Ok(self.serviced(front))
    }

    /// Remove the front delivery of `queue` and release its reference.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown queue
    /// - `Empty` if the queue is empty
    /// - `Internal` if the release found corrupted pool state
    pub fn pop_front(&self, queue: RxQueueId) -> Result<()> {
        let front = self.queue(queue)?.try_pop()?;
        self.serviced(front).release()
    }

    /// Remove and return the front delivery, blocking until there is one.
    ///
    /// The caller owns the subscriber's reference until it drops the
    /// delivery.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown queue.
    pub fn recv(&self, queue: RxQueueId) -> Result<Delivery> {
        let front = self.queue(queue)?.pop();
        Ok(self.serviced(front))
    }

    /// Remove and return the front delivery if there is one.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown queue
    /// - `Empty` if the queue is empty
    pub fn try_recv(&self, queue: RxQueueId) -> Result<Delivery> {
        let front = self.queue(queue)?.try_pop()?;
        Ok(self.serviced(front))
    }

    /// Remove and return the front delivery, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown queue
    /// - `Timeout` if nothing arrived in time
    pub fn timed_recv(&self, queue: RxQueueId, timeout: Duration) -> Result<Delivery> {
        let front = self.queue(queue)?.timed_pop(timeout)?;
        Ok(self.serviced(front))
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subs.len()
    }

    /// Queues currently subscribed to `packet_id`.
    #[must_use]
    pub fn subscribers(&self, packet_id: PacketId) -> SmallVec<[RxQueueId; 8]> {
        self.state.lock().subs.subscribers(packet_id)
    }

    /// Number of deliveries waiting on `queue`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown queue.
    pub fn queue_len(&self, queue: RxQueueId) -> Result<usize> {
        Ok(self.queue(queue)?.len())
    }

    /// Number of receive queues created so far.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.state.lock().n_queues
    }

    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Bus pool at `index`, in declaration order.
    #[must_use]
    pub fn pool(&self, index: usize) -> Option<&MemoryPool> {
        self.pools.get(index).map(|bp| &bp.pool)
    }

    /// Free slot count of the pool at `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there is no such pool.
    pub fn pool_n_free(&self, index: usize) -> Result<usize> {
        self.pool(index)
            .map(MemoryPool::n_free)
            .ok_or_else(|| PulseError::invalid_argument(format!("unknown pool {index}")))
    }

    #[must_use]
    pub const fn fan_out(&self) -> FanOutStrategy {
        self.fan_out
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for PulseBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PulseBus")
            .field("pools", &self.pools.len())
            .field("queues", &state.n_queues)
            .field("subscriptions", &state.subs.len())
            .field("max_subscriptions", &state.subs.max())
            .field("fan_out", &self.fan_out)
            .finish()
    }
}

impl Drop for PulseBus {
    fn drop(&mut self) {
        // Queues are declared before pools, so pending deliveries release
        // their references before the pool handles go away.
        debug!(
            "[BUS] Teardown: {} queues, {} pools, stats={:?}",
            self.state.get_mut().n_queues,
            self.pools.len(),
            self.stats.snapshot()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(fan_out: FanOutStrategy) -> PulseBus {
        PulseBus::new(
            BusOptions::new()
                .with_pool(64, 4)
                .with_pool(256, 2)
                .with_fan_out(fan_out),
        )
        .unwrap()
    }

    #[test]
    fn reserve_picks_first_pool_that_fits() {
        let bus = bus(FanOutStrategy::Atomic);
        let small = bus.reserve(10).unwrap();
        assert_eq!(small.capacity(), 64);
        assert_eq!(small.len(), 10);

        let large = bus.reserve(100).unwrap();
        assert_eq!(large.capacity(), 256);
    }

    #[test]
    fn reserve_spills_into_larger_pool() {
        let bus = bus(FanOutStrategy::Atomic);
        let held: Vec<_> = (0..4).map(|_| bus.reserve(8).unwrap()).collect();
        assert_eq!(bus.pool_n_free(0).unwrap(), 0);

        let spilled = bus.reserve(8).unwrap();
        assert_eq!(spilled.capacity(), 256);
        drop(held);
    }

    #[test]
    fn reserve_rejects_zero_and_oversized() {
        let bus = bus(FanOutStrategy::Atomic);
        assert_eq!(
            bus.reserve(0).unwrap_err(),
            PulseError::NoSuitableBuffer { size: 0 }
        );
        assert_eq!(
            bus.reserve(257).unwrap_err(),
            PulseError::NoSuitableBuffer { size: 257 }
        );
        assert_eq!(bus.stats().reserve_failures, 2);
    }

    #[test]
    fn bus_without_pools_never_publishes() {
        let bus = PulseBus::new(BusOptions::new()).unwrap();
        assert_eq!(bus.pool_count(), 0);
        assert!(matches!(
            bus.publish(1, b"x"),
            Err(PulseError::NoSuitableBuffer { size: 1 })
        ));
    }

    #[test]
    fn publish_without_subscribers_frees_slot() {
        let bus = bus(FanOutStrategy::Atomic);
        let report = bus.publish(5, b"nobody listens").unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(bus.pool_n_free(0).unwrap(), 4);
        assert_eq!(bus.stats().published, 1);
    }

    #[test]
    fn rxq_init_respects_max_queues() {
        let bus = PulseBus::new(BusOptions::new().with_pool(16, 1).with_max_queues(2)).unwrap();
        assert_eq!(bus.rxq_init(1).unwrap().index(), 0);
        assert_eq!(bus.rxq_init(1).unwrap().index(), 1);
        assert_eq!(
            bus.rxq_init(1).unwrap_err(),
            PulseError::Exhausted("receive queues")
        );
        assert_eq!(bus.queue_count(), 2);
    }

    #[test]
    fn debug_reports_limits() {
        let bus =
            PulseBus::new(BusOptions::new().with_pool(16, 1).with_max_subscriptions(5)).unwrap();
        bus.rxq_init(1).unwrap();
        let shown = format!("{bus:?}");
        assert!(shown.contains("queues: 1"));
        assert!(shown.contains("max_subscriptions: 5"));
    }

    #[test]
    fn rxq_init_rejects_zero_capacity() {
        let bus = bus(FanOutStrategy::Atomic);
        assert!(matches!(bus.rxq_init(0), Err(PulseError::InvalidArgument(_))));
        // The failed call must not consume a queue slot.
        assert_eq!(bus.rxq_init(1).unwrap().index(), 0);
    }

    #[test]
    fn subscribe_validates_queue() {
        let bus = bus(FanOutStrategy::Atomic);
        assert!(matches!(
            bus.subscribe(RxQueueId(3), 1),
            Err(PulseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn publish_release_rejects_foreign_buffer() {
        let bus = bus(FanOutStrategy::Atomic);
        let other = bus_with_one_pool();
        let foreign = other.reserve(4).unwrap();
        assert!(matches!(
            bus.publish_release(1, foreign, 4),
            Err(PulseError::InvalidArgument(_))
        ));
        assert_eq!(other.pool_n_free(0).unwrap(), 1);
    }

    fn bus_with_one_pool() -> PulseBus {
        PulseBus::new(BusOptions::new().with_pool(16, 1)).unwrap()
    }

    #[test]
    fn full_queue_drops_only_that_subscriber() {
        let bus = bus(FanOutStrategy::Streaming);
        let tight = bus.rxq_init(1).unwrap();
        let roomy = bus.rxq_init(4).unwrap();
        bus.subscribe(tight, 9).unwrap();
        bus.subscribe(roomy, 9).unwrap();

        bus.publish(9, b"one").unwrap();
        let report = bus.publish(9, b"two").unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);

        assert_eq!(bus.queue_len(tight).unwrap(), 1);
        assert_eq!(bus.queue_len(roomy).unwrap(), 2);
        assert_eq!(bus.stats().dropped, 1);
    }

    #[test]
    fn pop_front_on_empty_queue() {
        let bus = bus(FanOutStrategy::Atomic);
        let rxq = bus.rxq_init(2).unwrap();
        assert_eq!(bus.pop_front(rxq), Err(PulseError::Empty));
        assert_eq!(bus.try_recv(rxq).unwrap_err(), PulseError::Empty);
    }

    #[test]
    fn teardown_releases_pending_deliveries() {
        let bus = bus(FanOutStrategy::Atomic);
        let rxq = bus.rxq_init(4).unwrap();
        bus.subscribe(rxq, 1).unwrap();
        bus.publish(1, b"pending").unwrap();

        let pool = bus.pool(0).unwrap().clone();
        assert_eq!(pool.n_free(), 3);
        drop(bus);
        assert_eq!(pool.n_free(), 4);
    }
}
