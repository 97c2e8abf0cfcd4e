//! apm-stats: metric aggregation for the APM agent.
//!
//! Accumulates per-name call statistics during a transaction and rolls
//! them up into a process-wide table that the harvest cycle snapshots.
//!
//! # Architecture
//!
//! ```text
//! Transaction (private)            Process-wide
//!   MetricsTable                     SharedMetricsTable (Mutex<MetricsTable>)
//!     ├── record()                     ├── merge_from() ← transaction finalize
//!     ├── record_dimensional()         ├── record()     ← custom metrics
//!     └── merge_into() ───────────────>└── harvest()    → snapshot + reset
//! ```
//!
//! [`MetricRecord::merge`] is commutative and associative, so the order in
//! which transactions finish has no effect on the harvested values.

pub mod error;
pub mod key;
pub mod record;
pub mod shared;
pub mod table;

pub use error::{StatsError, StatsResult};
pub use key::{DimensionalKey, MetricKey, TagSet};
pub use record::{check_duration, MetricRecord};
pub use shared::SharedMetricsTable;
pub use table::{MetricEntry, MetricsTable};
