//! Error types for metric aggregation.

use thiserror::Error;

/// Result type alias for metric aggregation operations.
pub type StatsResult<T> = Result<T, StatsError>;

/// Caller-contract violations. Absence of a metric is never an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("negative duration: {0}")]
    NegativeDuration(f64),

    #[error("non-finite duration: {0}")]
    NonFiniteDuration(f64),

    #[error("metric name must not be empty")]
    EmptyMetricName,
}
