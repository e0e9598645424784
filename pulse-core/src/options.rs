//! Pool and bus configuration
//!
//! Everything here is fixed at construction time: pool count, per-pool
//! element size and count, queue and subscription limits never change for the
//! lifetime of a bus.

use crate::error::{PulseError, Result};

/// Upper bound for [`BusOptions::max_queues`].
pub const MAX_QUEUES: usize = 1 << 16;

/// Upper bound for [`BusOptions::max_subscriptions`].
pub const MAX_SUBSCRIPTIONS: usize = 1 << 20;

/// Where a pool's element storage comes from.
#[derive(Debug, Clone, Default)]
pub enum PoolStorage {
    /// Allocate `capacity * element_size` bytes on the heap (default).
    #[default]
    Heap,
    /// Use caller-supplied storage.
    ///
    /// Must hold at least `capacity * element_size` bytes; any excess is
    /// left untouched.
    Provided(Box<[u8]>),
}

/// Memory pool configuration.
///
/// # Examples
///
/// ```
/// use pulse_core::options::PoolOptions;
///
/// let opts = PoolOptions::new(64, 16).with_ref_counting(true);
/// assert_eq!(opts.element_size, 64);
/// assert_eq!(opts.capacity, 16);
/// ```
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Size of every element in bytes. Must be > 0.
    pub element_size: usize,

    /// Number of elements. Must be > 0.
    pub capacity: usize,

    /// Track per-slot reference counts.
    ///
    /// - `false`: the first release returns the slot to the free list
    /// - `true` (default): the slot is freed when its count drains to zero
    pub ref_counting: bool,

    /// Element storage source
    pub storage: PoolStorage,
}

impl PoolOptions {
    /// Heap-backed, reference-counted pool of `capacity` elements of
    /// `element_size` bytes.
    #[must_use]
    pub const fn new(element_size: usize, capacity: usize) -> Self {
        Self {
            element_size,
            capacity,
            ref_counting: true,
            storage: PoolStorage::Heap,
        }
    }

    /// Enable or disable reference counting.
    #[must_use]
    pub fn with_ref_counting(mut self, enabled: bool) -> Self {
        self.ref_counting = enabled;
        self
    }

    /// Use caller-supplied element storage.
    #[must_use]
    pub fn with_storage(mut self, storage: Box<[u8]>) -> Self {
        self.storage = PoolStorage::Provided(storage);
        self
    }

    /// Bytes of element storage this pool needs.
    #[must_use]
    pub const fn storage_len(&self) -> usize {
        self.element_size.saturating_mul(self.capacity)
    }

    /// Check sizes and provided storage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a size is zero, the storage size
    /// overflows, or provided storage is too small.
    pub fn validate(&self) -> Result<()> {
        if self.element_size == 0 {
            return Err(PulseError::invalid_argument("element_size must be > 0"));
        }
        if self.capacity == 0 {
            return Err(PulseError::invalid_argument("capacity must be > 0"));
        }
        if u32::try_from(self.capacity).is_err() {
            return Err(PulseError::invalid_argument(format!(
                "capacity {} exceeds the slot index range",
                self.capacity
            )));
        }
        let needed = self
            .element_size
            .checked_mul(self.capacity)
            .ok_or_else(|| PulseError::invalid_argument("pool storage size overflows"))?;
        if let PoolStorage::Provided(buf) = &self.storage {
            if buf.len() < needed {
                return Err(PulseError::invalid_argument(format!(
                    "provided storage holds {} bytes, pool needs {needed}",
                    buf.len()
                )));
            }
        }
        Ok(())
    }
}

/// How a publish hands one packet to all of its subscribers.
///
/// Both strategies serialize fan-outs against each other through the bus
/// lock. They differ in when a subscriber may start servicing an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FanOutStrategy {
    /// Hold the owning pool's service lock for the whole fan-out.
    ///
    /// No subscriber can inspect or release the packet until every
    /// subscriber has been notified.
    #[default]
    Atomic,

    /// Release each entry to its subscriber as soon as it is queued.
    ///
    /// A subscriber may drain the packet before later subscribers have been
    /// notified.
    Streaming,
}

/// Bus configuration.
///
/// # Examples
///
/// ```
/// use pulse_core::options::{BusOptions, FanOutStrategy};
///
/// let opts = BusOptions::new()
///     .with_pool(64, 32)
///     .with_pool(1024, 8)
///     .with_max_queues(4)
///     .with_max_subscriptions(16)
///     .with_fan_out(FanOutStrategy::Streaming);
/// assert_eq!(opts.pools.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Buffer pools, scanned in declaration order when reserving.
    pub pools: Vec<PoolOptions>,

    /// Maximum number of receive queues
    ///
    /// - Default: 8
    /// - At most [`MAX_QUEUES`]
    pub max_queues: usize,

    /// Maximum number of (packet id, queue) subscriptions
    ///
    /// - Default: 64
    /// - At most [`MAX_SUBSCRIPTIONS`]
    pub max_subscriptions: usize,

    /// Fan-out strategy
    ///
    /// - Default: `FanOutStrategy::Atomic`
    pub fan_out: FanOutStrategy,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            max_queues: 8,
            max_subscriptions: 64,
            fan_out: FanOutStrategy::Atomic,
        }
    }
}

impl BusOptions {
    /// Create options with no pools and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a heap-backed pool of `count` buffers of `element_size` bytes.
    #[must_use]
    pub fn with_pool(mut self, element_size: usize, count: usize) -> Self {
        self.pools.push(PoolOptions::new(element_size, count));
        self
    }

    /// Append a pool with explicit options.
    ///
    /// Reference counting is forced on when the bus is built.
    #[must_use]
    pub fn with_pool_options(mut self, pool: PoolOptions) -> Self {
        self.pools.push(pool);
        self
    }

    /// Set the maximum number of receive queues.
    #[must_use]
    pub fn with_max_queues(mut self, max_queues: usize) -> Self {
        self.max_queues = max_queues;
        self
    }

    /// Set the maximum number of subscriptions.
    #[must_use]
    pub fn with_max_subscriptions(mut self, max_subscriptions: usize) -> Self {
        self.max_subscriptions = max_subscriptions;
        self
    }

    /// Select the fan-out strategy.
    #[must_use]
    pub fn with_fan_out(mut self, fan_out: FanOutStrategy) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Largest element size across all pools, or 0 with no pools.
    #[must_use]
    pub fn max_element_size(&self) -> usize {
        self.pools.iter().map(|p| p.element_size).max().unwrap_or(0)
    }

    /// Check the bus limits and every pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a limit is above [`MAX_QUEUES`] or
    /// [`MAX_SUBSCRIPTIONS`], or the first pool validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.max_queues > MAX_QUEUES {
            return Err(PulseError::invalid_argument(format!(
                "max_queues {} exceeds {MAX_QUEUES}",
                self.max_queues
            )));
        }
        if self.max_subscriptions > MAX_SUBSCRIPTIONS {
            return Err(PulseError::invalid_argument(format!(
                "max_subscriptions {} exceeds {MAX_SUBSCRIPTIONS}",
                self.max_subscriptions
            )));
        }
        for (index, pool) in self.pools.iter().enumerate() {
            pool.validate().map_err(|e| match e {
                PulseError::InvalidArgument(msg) => {
                    PulseError::InvalidArgument(format!("pool {index}: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
