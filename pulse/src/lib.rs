//! # Pulse
//!
//! An in-process publish/subscribe bus for programs that cannot lean on OS
//! IPC or a heap-heavy runtime. All memory is reserved up front; at steady
//! state nothing is allocated.
//!
//! ## Architecture
//!
//! - **`MemoryPool`**: fixed-size, reference-counted buffer slots
//! - **`BoundedQueue`**: per-subscriber blocking mailbox
//! - **`SubscriptionList`**: sorted (packet id, queue) pairs
//! - **`PulseBus`**: owns all of the above and runs publish / fan-out
//!
//! A publish reserves one buffer, copies the payload in once, and hands every
//! subscriber a reference to that same buffer. The slot goes back to its pool
//! when the last subscriber lets go.
//!
//! ## Quick Start
//!
//! ```rust
//! use pulse::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let bus = PulseBus::new(
//!     BusOptions::new()
//!         .with_pool(64, 32)
//!         .with_pool(1024, 8),
//! )?;
//!
//! let telemetry = bus.rxq_init(16)?;
//! let logger = bus.rxq_init(16)?;
//! bus.subscribe(telemetry, 0x10)?;
//! bus.subscribe(logger, 0x10)?;
//!
//! let report = bus.publish(0x10, b"altitude=1200")?;
//! assert_eq!(report.delivered, 2);
//!
//! let a = bus.recv(telemetry)?;
//! let b = bus.recv(logger)?;
//! assert_eq!(a.as_ptr(), b.as_ptr());
//! # Ok(())
//! # }
//! ```
//!
//! ## Zero-copy publish
//!
//! ```rust
//! use pulse::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let bus = PulseBus::new(BusOptions::new().with_pool(4096, 4))?;
//! let rxq = bus.rxq_init(4)?;
//! bus.subscribe(rxq, 1)?;
//!
//! let mut frame = bus.reserve(3000)?;
//! frame.fill(0xAB);
//! bus.publish_release(1, frame, 3000)?;
//!
//! let front = bus.wait_front(rxq)?;
//! assert_eq!(front.len(), 3000);
//! drop(front);
//! bus.pop_front(rxq)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! - `unsafe` code is isolated to `pulse-core/src/alloc.rs` (buffer pool)
//! - Queue, subscription and bus layers are 100% safe Rust

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use pulse_core::alloc::{Buffer, BufferMut, MemoryPool, SlotId};
pub use pulse_core::error::{PulseError, Result};
pub use pulse_core::options::{
    BusOptions, FanOutStrategy, PoolOptions, PoolStorage, MAX_QUEUES, MAX_SUBSCRIPTIONS,
};
pub use pulse_core::pubsub::bus::{BusStats, Delivery, PacketId, PublishReport, PulseBus, RxQueueId};
pub use pulse_core::pubsub::index::SubscriptionList;
pub use pulse_core::queue::BoundedQueue;

/// Tracing setup for tests and benches.
pub mod dev_tracing;

/// Everything needed to build a bus and talk to it.
pub mod prelude {
    pub use pulse_core::prelude::*;
}
