//! Pulse Core
//!
//! This crate contains the building blocks of the PULSE bus:
//! - Fixed-size, reference-counted buffer pools (`alloc`)
//! - Bounded blocking FIFO (`queue`)
//! - Counting semaphore (`sync`)
//! - PUB/SUB core (subscription list + bus) (`pubsub`)
//! - Pool and bus configuration (`options`)
//! - Error types (`error`)

// alloc is the only module that opts back into unsafe code
#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
pub mod alloc;
pub mod error;
pub mod options;
pub mod queue;
pub mod sync;

pub mod pubsub {
    pub mod bus;
    pub mod index;
}

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::alloc::{Buffer, BufferMut, MemoryPool, SlotId};
    pub use crate::error::{PulseError, Result};
    pub use crate::options::{
        BusOptions, FanOutStrategy, PoolOptions, PoolStorage, MAX_QUEUES, MAX_SUBSCRIPTIONS,
    };
    pub use crate::pubsub::bus::{BusStats, Delivery, PublishReport, PulseBus};
    pub use crate::pubsub::index::{PacketId, RxQueueId, SubscriptionList};
    pub use crate::queue::BoundedQueue;
}
