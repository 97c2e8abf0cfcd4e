//! apm-recorder: glue between transactions and the process-wide
//! telemetry state.
//!
//! # Architecture
//!
//! ```text
//! Transaction (one per unit of work, private)
//!   ├── record_segment() / record_custom_metric() → local MetricsTable
//!   └── add_span_event()                          → local Vec<SpanEvent>
//!
//! TransactionRecorder::finalize()   ACCUMULATING → FINALIZING → MERGED
//!   ├── transaction rollups (WebTransaction, OtherTransaction/all, ...)
//!   ├── SharedMetricsTable::merge_from()
//!   └── EventSink::put_all()  (priority buffer or stream)
//!
//! Harvester
//!   ├── harvest_once() → snapshot-and-reset, drain, Reporter::report()
//!   └── run()          → periodic loop until shutdown
//! ```

pub mod error;
pub mod harvest;
pub mod recorder;
pub mod transaction;

pub use error::{RecorderError, RecorderResult};
pub use harvest::{HarvestPayload, HarvestSummary, Harvester, LogReporter, Reporter};
pub use recorder::{FinalizeReport, TransactionRecorder};
pub use transaction::{Transaction, TransactionKind, TransactionState};
