//! Event sink error types.

use thiserror::Error;

/// Result type alias for event sink operations.
pub type EventsResult<T> = Result<T, EventsError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventsError {
    #[error("buffer or queue capacity must be greater than zero")]
    ZeroCapacity,

    #[error("streaming sink requires a transport")]
    MissingTransport,

    #[error("span transport closed")]
    TransportClosed,

    #[error("span transport queue is full")]
    QueueFull,
}

/// A batch handed to the sink stopped partway through.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("sink stopped after {forwarded} events ({dropped} dropped): {source}")]
pub struct BatchError {
    pub forwarded: usize,
    pub dropped: usize,
    pub source: EventsError,
}
