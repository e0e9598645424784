//! Pulse Error Types
//!
//! One error enum for every pool, queue and bus operation.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Pulse operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PulseError {
    /// Null/zero-sized input, foreign buffer, or unknown handle
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Pool or queue full on a non-blocking path
    #[error("Resource exhausted: {0}")]
    Exhausted(&'static str),

    /// No configured pool is large enough, or every eligible pool is full
    #[error("No suitable buffer for {size} bytes")]
    NoSuitableBuffer { size: usize },

    /// The (packet id, queue) pair is already subscribed
    #[error("Duplicate subscription: packet {packet_id} -> queue {queue}")]
    Duplicate { packet_id: u32, queue: usize },

    /// Slot or queue is not tracked
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timed wait expired
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Non-blocking receive on an empty queue
    #[error("Queue empty")]
    Empty,

    /// A structural invariant was violated
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Pulse operations
pub type Result<T> = std::result::Result<T, PulseError>;

impl PulseError {
    /// Create an invalid argument error with a message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not found error with a message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error reports a full pool or queue
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_) | Self::NoSuitableBuffer { .. })
    }

    /// Check if this error is an expired timed wait
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if retrying the same call later can succeed
    ///
    /// Exhaustion, timeouts and empty queues clear once consumers catch up.
    /// Malformed requests and invariant violations never do.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Exhausted(_) | Self::NoSuitableBuffer { .. } | Self::Timeout(_) | Self::Empty => {
                true
            }
            Self::InvalidArgument(_)
            | Self::Duplicate { .. }
            | Self::NotFound(_)
            | Self::Internal(_) => false,
        }
    }
}
