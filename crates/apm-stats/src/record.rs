//! Per-metric call statistics.

use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};

/// Accumulated statistics for one metric key. Times are in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub call_count: u64,
    pub total_call_time: f64,
    pub total_exclusive_call_time: f64,
    pub min_call_time: f64,
    pub max_call_time: f64,
    pub sum_of_squares: f64,
}

/// Reject durations a caller should never produce.
pub fn check_duration(value: f64) -> StatsResult<()> {
    if !value.is_finite() {
        return Err(StatsError::NonFiniteDuration(value));
    }
    if value < 0.0 {
        return Err(StatsError::NegativeDuration(value));
    }
    Ok(())
}

impl MetricRecord {
    /// A record holding a single observation.
    pub fn from_observation(duration: f64, exclusive_duration: f64) -> StatsResult<Self> {
        let mut record = Self::default();
        record.observe(duration, exclusive_duration)?;
        Ok(record)
    }

    /// A count-only record, used for supportability counters.
    pub fn from_count(count: u64) -> Self {
        Self {
            call_count: count,
            ..Self::default()
        }
    }

    /// Fold one observation into the record.
    pub fn observe(&mut self, duration: f64, exclusive_duration: f64) -> StatsResult<()> {
        check_duration(duration)?;
        check_duration(exclusive_duration)?;

        if self.call_count == 0 {
            *self = Self {
                call_count: 1,
                total_call_time: duration,
                total_exclusive_call_time: exclusive_duration,
                min_call_time: duration,
                max_call_time: duration,
                sum_of_squares: duration * duration,
            };
            return Ok(());
        }

        self.call_count += 1;
        self.total_call_time += duration;
        self.total_exclusive_call_time += exclusive_duration;
        self.min_call_time = self.min_call_time.min(duration);
        self.max_call_time = self.max_call_time.max(duration);
        self.sum_of_squares += duration * duration;
        Ok(())
    }

    /// Combine another record into this one.
    ///
    /// An empty side contributes nothing, so its zeroed min does not
    /// drag the merged min down.
    pub fn merge(&mut self, other: &MetricRecord) {
        if other.call_count == 0 && other.total_call_time == 0.0 {
            return;
        }
        if self.call_count == 0 && self.total_call_time == 0.0 {
            *self = *other;
            return;
        }

        self.call_count += other.call_count;
        self.total_call_time += other.total_call_time;
        self.total_exclusive_call_time += other.total_exclusive_call_time;
        self.min_call_time = self.min_call_time.min(other.min_call_time);
        self.max_call_time = self.max_call_time.max(other.max_call_time);
        self.sum_of_squares += other.sum_of_squares;
    }

    /// Mean call time, or `None` before the first observation.
    pub fn mean_call_time(&self) -> Option<f64> {
        (self.call_count > 0).then(|| self.total_call_time / self.call_count as f64)
    }
}
