//! Transaction recorder error types.

use apm_events::EventsError;
use apm_stats::StatsError;
use thiserror::Error;

/// Result type alias for recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("transaction already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("transaction no longer accumulating: {0}")]
    NotAccumulating(String),

    #[error("metric error: {0}")]
    Stats(#[from] StatsError),

    #[error("event sink error: {0}")]
    Events(#[from] EventsError),

    #[error("span forwarding stopped after {forwarded} events ({dropped} dropped): {source}")]
    Forward {
        forwarded: usize,
        dropped: usize,
        source: EventsError,
    },
}
