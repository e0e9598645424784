//! Allocation primitives for Pulse
//!
//! This module is the ONLY place where unsafe memory manipulation is allowed.
//! All invariants are enforced here so the rest of the system can remain 100% safe.
//!
//! A [`MemoryPool`] owns `capacity` fixed-size slots carved out of one flat
//! allocation. Slot bookkeeping is index based: a free stack of slot indices
//! plus an "allocated" flag per slot, both behind the pool mutex. A counting
//! semaphore seeded to `capacity` makes [`MemoryPool::request`] block while
//! every slot is out.
//!
//! Handles:
//! - [`BufferMut`]: exclusive, writable access to a freshly requested slot.
//! - [`Buffer`]: shared, read-only access. `Clone` adds a reference, `Drop`
//!   releases one. The slot returns to the free list when the last reference
//!   is released.

#![allow(unsafe_code)]

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::error::{PulseError, Result};
use crate::options::{PoolOptions, PoolStorage};
use crate::sync::Semaphore;

/// Index of a slot inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// Position of the slot in the pool's storage.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Free / allocated bookkeeping, protected by the pool mutex.
///
/// Invariant: every slot is either on `free` or flagged in `allocated`,
/// never both, so `free.len() + n_allocated == capacity`.
struct SlotTable {
    /// LIFO stack of free slot indices. Pre-sized to capacity, never grows.
    free: Vec<u32>,
    allocated: Box<[bool]>,
}

/// Pool internals shared by the pool handle and every buffer handle.
struct PoolShared {
    element_size: usize,
    capacity: usize,
    ref_counting: bool,

    /// Whole storage allocation, reclaimed in `Drop`.
    storage: NonNull<[u8]>,

    table: Mutex<SlotTable>,

    /// Per-slot reference counts; -1 while the slot is free.
    refs: Box<[AtomicI32]>,

    /// One permit per free slot.
    free_slots: Semaphore,

    /// Lock-free snapshot of `table.free.len()`.
    n_free: AtomicUsize,
}

// SAFETY: `storage` is only reached through slot pointers. A slot is written
// through a `BufferMut` while it is exclusively owned, and only read through
// `Buffer` handles after that writer has been consumed. The table and counts
// are synchronized by the mutex and atomics.
unsafe impl Send for PoolShared {}
unsafe impl Sync for PoolShared {}

impl Drop for PoolShared {
    fn drop(&mut self) {
        // SAFETY: `storage` came from `Box::leak` in `PoolShared::new` and is
        // reclaimed exactly once, here. No handle outlives the pool because
        // every handle holds an `Arc<PoolShared>`.
        drop(unsafe { Box::from_raw(self.storage.as_ptr()) });
    }
}

impl PoolShared {
    fn new(options: PoolOptions) -> Result<Self> {
        options.validate()?;
        let storage_len = options.storage_len();

        let PoolOptions {
            element_size,
            capacity,
            ref_counting,
            storage,
        } = options;

        let storage = match storage {
            PoolStorage::Heap => vec![0u8; storage_len].into_boxed_slice(),
            PoolStorage::Provided(buf) => buf,
        };

        // validate() bounds capacity to u32.
        let free = (0..capacity as u32).rev().collect();

        Ok(Self {
            element_size,
            capacity,
            ref_counting,
            storage: NonNull::from(Box::leak(storage)),
            table: Mutex::new(SlotTable {
                free,
                allocated: vec![false; capacity].into_boxed_slice(),
            }),
            refs: (0..capacity).map(|_| AtomicI32::new(-1)).collect(),
            free_slots: Semaphore::new(capacity),
            n_free: AtomicUsize::new(capacity),
        })
    }

    #[inline]
    fn slot_ptr(&self, slot: SlotId) -> *mut u8 {
        debug_assert!(slot.index() < self.capacity);
        // SAFETY: slot < capacity and storage holds capacity * element_size
        // bytes, so the offset stays inside the allocation.
        unsafe {
            self.storage
                .cast::<u8>()
                .as_ptr()
                .add(slot.index() * self.element_size)
        }
    }

    /// Move one slot from free to allocated. Caller holds a semaphore permit.
    fn take_slot(&self) -> Result<SlotId> {
        let mut table = self.table.lock();
        let Some(index) = table.free.pop() else {
            drop(table);
            // Hand the permit back; the counts disagree with the list.
            self.free_slots.release();
            return Err(PulseError::internal("free list empty with a permit held"));
        };
        table.allocated[index as usize] = true;
        self.refs[index as usize].store(1, Ordering::Release);
        self.n_free.fetch_sub(1, Ordering::Relaxed);
        Ok(SlotId(index))
    }

    fn ref_add(&self, slot: SlotId) -> Result<i32> {
        let table = self.table.lock();
        if !table.allocated.get(slot.index()).copied().unwrap_or(false) {
            return Err(PulseError::not_found(format!(
                "slot {} is not allocated",
                slot.index()
            )));
        }
        Ok(self.refs[slot.index()].fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Decrement a slot's count, floored at zero. Caller holds the table lock.
    fn ref_remove(&self, table: &SlotTable, slot: SlotId) -> Result<i32> {
        if !table.allocated.get(slot.index()).copied().unwrap_or(false) {
            return Err(PulseError::not_found(format!(
                "slot {} is not allocated",
                slot.index()
            )));
        }
        let count = &self.refs[slot.index()];
        let remaining = (count.load(Ordering::Acquire) - 1).max(0);
        count.store(remaining, Ordering::Release);
        Ok(remaining)
    }

    fn release(&self, slot: SlotId) -> Result<()> {
        let mut table = self.table.lock();
        if self.ref_counting {
            let remaining = self.ref_remove(&table, slot).map_err(|_| {
                PulseError::internal(format!("release of free slot {}", slot.index()))
            })?;
            if remaining > 0 {
                return Ok(());
            }
        } else if !table.allocated.get(slot.index()).copied().unwrap_or(false) {
            return Err(PulseError::internal(format!(
                "release of free slot {}",
                slot.index()
            )));
        }

        table.allocated[slot.index()] = false;
        table.free.push(slot.0);
        self.refs[slot.index()].store(-1, Ordering::Release);
        self.n_free.fetch_add(1, Ordering::Relaxed);
        drop(table);

        self.free_slots.release();
        Ok(())
    }
}

/// Fixed-capacity pool of fixed-size buffers.
///
/// Cloning the pool handle is cheap and shares the same slots.
///
/// # Examples
///
/// ```
/// use pulse_core::alloc::MemoryPool;
/// use pulse_core::options::PoolOptions;
///
/// # fn main() -> pulse_core::error::Result<()> {
/// let pool = MemoryPool::new(PoolOptions::new(64, 4))?;
///
/// let mut buf = pool.request()?;
/// buf[..5].copy_from_slice(b"hello");
///
/// let shared = buf.freeze()?;
/// let reader = shared.clone();
/// assert_eq!(shared.ref_count(), 2);
///
/// drop(shared);
/// drop(reader);
/// assert_eq!(pool.n_free(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryPool {
    shared: Arc<PoolShared>,
}

impl MemoryPool {
    /// Create a pool.
    ///
    /// Every slot starts on the free list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options fail validation.
    pub fn new(options: PoolOptions) -> Result<Self> {
        let shared = PoolShared::new(options)?;
        debug!(
            "[POOL] Created pool: {} x {} bytes (ref_counting={})",
            shared.capacity, shared.element_size, shared.ref_counting
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Reserve a slot, blocking until one is free.
    ///
    /// This waits indefinitely if no slot is ever released. Use
    /// [`try_request`](Self::try_request) for bounded latency.
    ///
    /// # Errors
    ///
    /// Returns `Internal` only if the pool bookkeeping is corrupted.
    pub fn request(&self) -> Result<BufferMut> {
        self.shared.free_slots.acquire();
        self.shared.take_slot().map(|slot| BufferMut::new(self.clone(), slot))
    }

    /// Reserve a slot without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` if every slot is allocated.
    pub fn try_request(&self) -> Result<BufferMut> {
        if !self.shared.free_slots.try_acquire() {
            trace!("[POOL] Exhausted ({} x {} bytes)", self.capacity(), self.element_size());
            return Err(PulseError::Exhausted("memory pool"));
        }
        self.shared.take_slot().map(|slot| BufferMut::new(self.clone(), slot))
    }

    /// Current reference count of `slot`, or -1 if it is not allocated.
    ///
    /// The count is an atomic, so the read itself is consistent. It can still
    /// be stale by the time the caller acts on it.
    #[must_use]
    pub fn ref_query(&self, slot: SlotId) -> i32 {
        self.shared
            .refs
            .get(slot.index())
            .map_or(-1, |count| count.load(Ordering::Acquire))
    }

    /// `true` when no slot is free.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.n_free() == 0
    }

    /// `true` when no slot is allocated.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_free() == self.shared.capacity
    }

    /// Snapshot of the free slot count.
    #[inline]
    #[must_use]
    pub fn n_free(&self) -> usize {
        self.shared.n_free.load(Ordering::Relaxed)
    }

    /// Snapshot of the allocated slot count.
    #[inline]
    #[must_use]
    pub fn n_allocated(&self) -> usize {
        self.shared.capacity - self.n_free()
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Size of every slot in bytes.
    #[inline]
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.shared.element_size
    }

    /// Whether slots are reference counted.
    #[inline]
    #[must_use]
    pub fn ref_counting(&self) -> bool {
        self.shared.ref_counting
    }

    /// Whether `buffer` was handed out by this pool.
    #[inline]
    pub(crate) fn owns_mut(&self, buffer: &BufferMut) -> bool {
        Arc::ptr_eq(&self.shared, &buffer.slot.pool.shared)
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("element_size", &self.shared.element_size)
            .field("capacity", &self.shared.capacity)
            .field("ref_counting", &self.shared.ref_counting)
            .field("n_free", &self.n_free())
            .finish()
    }
}

/// One held reference on an allocated slot.
///
/// Dropping it releases the reference unless it was released explicitly.
struct SlotRef {
    pool: MemoryPool,
    slot: SlotId,
    len: usize,
    armed: bool,
}

impl SlotRef {
    fn release(&mut self) -> Result<()> {
        self.armed = false;
        self.pool.shared.release(self.slot)
    }
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.pool.shared.release(self.slot) {
            error!("[POOL] Release on drop failed: {}", e);
        }
    }
}

/// Exclusive, writable access to a freshly requested slot.
///
/// Its length starts at the pool's element size and can be shortened with
/// [`set_len`](Self::set_len). Dropping it returns the slot to the pool.
pub struct BufferMut {
    slot: SlotRef,
}

impl BufferMut {
    fn new(pool: MemoryPool, slot: SlotId) -> Self {
        let len = pool.element_size();
        Self {
            slot: SlotRef {
                pool,
                slot,
                len,
                armed: true,
            },
        }
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.slot.len
    }

    /// Returns `true` if the payload length is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slot.len == 0
    }

    /// Slot size in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slot.pool.element_size()
    }

    /// Set the payload length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `len` exceeds the slot size.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(PulseError::invalid_argument(format!(
                "length {len} exceeds slot size {}",
                self.capacity()
            )));
        }
        self.slot.len = len;
        Ok(())
    }

    /// Slot this buffer occupies.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> SlotId {
        self.slot.slot
    }

    /// Pool this buffer belongs to.
    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &MemoryPool {
        &self.slot.pool
    }

    /// Returns the payload as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the slot is allocated and exclusively owned by this handle;
        // len <= element_size keeps the slice inside the slot.
        unsafe {
            std::slice::from_raw_parts(
                self.slot.pool.shared.slot_ptr(self.slot.slot),
                self.slot.len,
            )
        }
    }

    /// Returns the payload as a mutable byte slice.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees no other borrow of
        // this slot exists.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.slot.pool.shared.slot_ptr(self.slot.slot),
                self.slot.len,
            )
        }
    }

    /// Convert into a shared handle holding the slot's single reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the pool does not count references; the
    /// slot is released in that case.
    pub fn freeze(self) -> Result<Buffer> {
        if !self.slot.pool.ref_counting() {
            return Err(PulseError::invalid_argument(
                "cannot share a buffer from a pool without reference counting",
            ));
        }
        Ok(Buffer { slot: self.slot })
    }
}

impl Deref for BufferMut {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for BufferMut {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl fmt::Debug for BufferMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferMut")
            .field("slot", &self.slot.slot)
            .field("len", &self.slot.len)
            .finish_non_exhaustive()
    }
}

/// Shared, read-only, reference-counted access to a slot.
///
/// `clone()` adds a reference and `drop()` releases one; the slot returns to
/// its pool when the count reaches zero.
pub struct Buffer {
    slot: SlotRef,
}

impl Buffer {
    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.slot.len
    }

    /// Returns `true` if the payload length is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slot.len == 0
    }

    /// Slot this buffer occupies.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> SlotId {
        self.slot.slot
    }

    /// Pool this buffer belongs to.
    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &MemoryPool {
        &self.slot.pool
    }

    /// Current reference count of the slot.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> i32 {
        self.slot.pool.ref_query(self.slot.slot)
    }

    /// Address of the payload.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.slot.pool.shared.slot_ptr(self.slot.slot)
    }

    /// Returns the payload as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the slot stays allocated while this reference is held and
        // no writer exists once a `BufferMut` has been frozen.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.slot.len) }
    }

    /// Release this reference, reporting bookkeeping failures.
    ///
    /// Dropping the handle does the same but can only log a failure.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the slot was no longer allocated.
    pub fn release(mut self) -> Result<()> {
        self.slot.release()
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        // A live handle keeps the slot allocated, so this cannot miss.
        let added = self.slot.pool.shared.ref_add(self.slot.slot);
        debug_assert!(added.is_ok(), "live buffer handle on a free slot");
        Self {
            slot: SlotRef {
                pool: self.slot.pool.clone(),
                slot: self.slot.slot,
                len: self.slot.len,
                armed: true,
            },
        }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Buffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("slot", &self.slot.slot)
            .field("len", &self.slot.len)
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn pool(element_size: usize, capacity: usize) -> MemoryPool {
        MemoryPool::new(PoolOptions::new(element_size, capacity)).unwrap()
    }

    #[test]
    fn request_and_drop_cycles_slots() {
        let pool = pool(32, 2);
        assert!(pool.is_empty());

        let a = pool.request().unwrap();
        let b = pool.request().unwrap();
        assert_ne!(a.slot(), b.slot());
        assert!(pool.is_full());
        assert_eq!(pool.n_allocated(), 2);

        drop(a);
        assert_eq!(pool.n_free(), 1);
        drop(b);
        assert!(pool.is_empty());
    }

    #[test]
    fn try_request_reports_exhaustion() {
        let pool = pool(8, 1);
        let _held = pool.try_request().unwrap();
        assert_eq!(
            pool.try_request().unwrap_err(),
            PulseError::Exhausted("memory pool")
        );
    }

    #[test]
    fn buffer_len_defaults_to_slot_size() {
        let pool = pool(48, 1);
        let mut buf = pool.request().unwrap();
        assert_eq!(buf.len(), 48);
        buf.set_len(10).unwrap();
        assert_eq!(buf.as_slice().len(), 10);
        assert!(buf.set_len(49).is_err());
    }

    #[test]
    fn write_then_read_through_shared_handle() {
        let pool = pool(16, 1);
        let mut buf = pool.request().unwrap();
        buf.set_len(4).unwrap();
        buf.copy_from_slice(b"ping");

        let shared = buf.freeze().unwrap();
        assert_eq!(&shared[..], b"ping");
        assert_eq!(shared.ref_count(), 1);
    }

    #[test]
    fn slot_reclaimed_after_n_plus_one_releases() {
        let pool = pool(16, 1);
        let publisher = pool.request().unwrap().freeze().unwrap();
        let slot = publisher.slot();

        let readers: Vec<Buffer> = (0..3).map(|_| publisher.clone()).collect();
        assert_eq!(pool.ref_query(slot), 4);

        publisher.release().unwrap();
        assert_eq!(pool.n_free(), 0);

        let mut readers = readers.into_iter();
        readers.next().unwrap().release().unwrap();
        readers.next().unwrap().release().unwrap();
        assert_eq!(pool.ref_query(slot), 1);
        assert_eq!(pool.n_free(), 0);

        drop(readers);
        assert_eq!(pool.n_free(), 1);
        assert_eq!(pool.ref_query(slot), -1);
    }

    #[test]
    fn ref_add_on_free_slot_is_not_found() {
        let pool = pool(16, 2);
        let slot = pool.request().unwrap().slot();
        assert!(matches!(
            pool.shared.ref_add(slot),
            Err(PulseError::NotFound(_))
        ));
    }

    #[test]
    fn release_of_free_slot_is_internal_error() {
        let pool = pool(16, 1);
        let slot = pool.request().unwrap().slot();
        assert!(matches!(
            pool.shared.release(slot),
            Err(PulseError::Internal(_))
        ));
        // The failed release must not have pushed a duplicate free entry.
        assert_eq!(pool.n_free(), 1);
    }

    #[test]
    fn ref_query_out_of_range_is_negative() {
        let pool = pool(16, 1);
        assert_eq!(pool.ref_query(SlotId(5)), -1);
    }

    #[test]
    fn without_ref_counting_release_frees_immediately() {
        let pool = MemoryPool::new(PoolOptions::new(16, 1).with_ref_counting(false)).unwrap();
        let buf = pool.request().unwrap();
        assert_eq!(pool.ref_query(buf.slot()), 1);
        assert!(buf.freeze().is_err());
        assert_eq!(pool.n_free(), 1);
    }

    #[test]
    fn provided_storage_backs_the_slots() {
        let storage = vec![0u8; 64].into_boxed_slice();
        let base = storage.as_ptr() as usize;
        let pool = MemoryPool::new(PoolOptions::new(16, 4).with_storage(storage)).unwrap();

        let buf = pool.request().unwrap().freeze().unwrap();
        let addr = buf.as_ptr() as usize;
        assert!(addr >= base && addr < base + 64);
        assert_eq!((addr - base) % 16, 0);
    }

    #[test]
    fn request_blocks_until_release() {
        let pool = pool(16, 1);
        let held = pool.request().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.request().map(|b| b.slot()))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        let slot = held.slot();
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), slot);
    }

    #[test]
    fn concurrent_requests_never_share_a_slot() {
        let pool = pool(8, 8);
        let (tx, rx) = flume::unbounded();

        thread::scope(|s| {
            for _ in 0..8 {
                let pool = pool.clone();
                let tx = tx.clone();
                s.spawn(move || {
                    let buf = pool.request().unwrap();
                    tx.send(buf.slot()).unwrap();
                    // Keep it allocated until every thread has reported.
                    thread::sleep(Duration::from_millis(20));
                    drop(buf);
                });
            }
        });
        drop(tx);

        let slots: HashSet<SlotId> = rx.iter().collect();
        assert_eq!(slots.len(), 8);
        assert!(pool.is_empty());
    }
}
