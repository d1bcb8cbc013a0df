//! Error types for the message pipe.

use thiserror::Error;

/// Errors returned by [`MessagePipe`](crate::MessagePipe) and
/// [`MessageBus`](crate::MessageBus).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    /// The bus has no room for another subscription.
    #[error("message bus capacity of {capacity} exhausted subscribing '{topic}'")]
    BusCapacity {
        /// Total number of subscriptions the bus accepts.
        capacity: usize,
        /// Topic whose subscription was rejected.
        topic: String,
    },

    /// `run` was called on a pipe that already ran.
    #[error("message pipe is already running")]
    AlreadyRunning,

    /// The pipe was cancelled and no longer accepts plugins.
    #[error("message pipe is stopped")]
    Stopped,
}

/// Result type for pipe operations.
pub type PipeResult<T> = Result<T, PipeError>;
