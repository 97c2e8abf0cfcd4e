//! Transaction recorder: folds finished transactions into process-wide
//! state.
//!
//! Finalize runs once per transaction: it adds the transaction-level
//! rollups to the local table, merges that table into the shared one under
//! a single lock, then hands every collected span to the active sink. A
//! failure in one transaction is counted and logged; it never reaches the
//! shared structures or other transactions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use apm_core::{AgentConfig, SpanEvent};
use apm_events::{EventSink, SpanTransport};
use apm_stats::{check_duration, MetricsTable, SharedMetricsTable, StatsResult, TagSet};
use tracing::{debug, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::transaction::{Transaction, TransactionKind};

/// What a successful finalize contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Local table entries merged into the shared table.
    pub metrics_merged: usize,
    /// Span events handed to the sink.
    pub events_forwarded: usize,
}

pub struct TransactionRecorder {
    stats: SharedMetricsTable,
    sink: EventSink<SpanEvent>,
    span_events_enabled: bool,
    finalized: AtomicU64,
    failed: AtomicU64,
}

impl TransactionRecorder {
    pub fn new(stats: SharedMetricsTable, sink: EventSink<SpanEvent>) -> Self {
        Self {
            stats,
            sink,
            span_events_enabled: true,
            finalized: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Build from configuration. Streaming mode needs `transport`.
    pub fn from_config(
        config: &AgentConfig,
        transport: Option<Arc<dyn SpanTransport<SpanEvent>>>,
    ) -> RecorderResult<Self> {
        let sink = EventSink::from_mode(config.sink_mode(), transport)?;
        let mut recorder = Self::new(SharedMetricsTable::new(), sink);
        recorder.span_events_enabled =
            config.span_events.enabled || config.infinite_tracing.enabled;
        info!(
            app_name = %config.app_name,
            sink = recorder.sink.mode_name(),
            span_events = recorder.span_events_enabled,
            "transaction recorder initialized"
        );
        Ok(recorder)
    }

    /// Start a transaction honoring the span event setting.
    pub fn start_transaction(&self, name: &str, kind: TransactionKind) -> Transaction {
        let txn = Transaction::new(name, kind);
        if self.span_events_enabled {
            txn
        } else {
            txn.without_span_events()
        }
    }

    pub fn stats(&self) -> &SharedMetricsTable {
        &self.stats
    }

    pub fn sink(&self) -> &EventSink<SpanEvent> {
        &self.sink
    }

    pub fn finalized_count(&self) -> u64 {
        self.finalized.load(Ordering::Relaxed)
    }

    /// Finalize attempts that failed after the transaction was locked.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Custom metric recorded outside any transaction.
    pub fn record_custom_metric(&self, name: &str, value: f64) -> RecorderResult<()> {
        self.stats.record(name, "", value, value)?;
        Ok(())
    }

    pub fn record_dimensional_metric(
        &self,
        name: &str,
        tags: &TagSet,
        value: f64,
    ) -> RecorderResult<()> {
        self.stats.record_dimensional(name, tags, value, value)?;
        Ok(())
    }

    /// Move a finished transaction into the shared table and event sink.
    ///
    /// `duration_ms` is the transaction's wall-clock duration. A rejected
    /// duration leaves the transaction accumulating; any other error
    /// leaves it merged, with whatever was merged before the failure kept.
    pub fn finalize(
        &self,
        txn: &mut Transaction,
        duration_ms: f64,
    ) -> RecorderResult<FinalizeReport> {
        check_duration(duration_ms)?;

        let (mut metrics, events) = txn.begin_finalize(duration_ms)?;
        let result = self.merge_and_forward(txn, &mut metrics, events, duration_ms);
        txn.mark_merged();

        match result {
            Ok(report) => {
                self.finalized.fetch_add(1, Ordering::Relaxed);
                debug!(
                    transaction = %txn.scope_name(),
                    duration_ms,
                    metrics = report.metrics_merged,
                    events = report.events_forwarded,
                    "transaction finalized"
                );
                Ok(report)
            }
            Err(e) => {
                let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    transaction = %txn.scope_name(),
                    guid = %txn.guid(),
                    error = %e,
                    failed,
                    "transaction finalize failed"
                );
                Err(e)
            }
        }
    }

    fn merge_and_forward(
        &self,
        txn: &Transaction,
        metrics: &mut MetricsTable,
        events: Vec<SpanEvent>,
        duration_ms: f64,
    ) -> RecorderResult<FinalizeReport> {
        record_transaction_metrics(txn, metrics, duration_ms)?;
        self.stats.merge_from(metrics);

        let events_forwarded = self.sink.put_all(events).map_err(|e| RecorderError::Forward {
            forwarded: e.forwarded,
            dropped: e.dropped,
            source: e.source,
        })?;

        Ok(FinalizeReport {
            metrics_merged: metrics.len(),
            events_forwarded,
        })
    }
}

/// Transaction-level rollups.
///
/// Total time is segment exclusive time plus the root's own exclusive
/// time, which is whatever part of the duration no segment claimed.
fn record_transaction_metrics(
    txn: &Transaction,
    metrics: &mut MetricsTable,
    duration: f64,
) -> StatsResult<()> {
    let kind = txn.kind();
    let path = format!("{}/{}", txn.group(), txn.name());
    let root_exclusive = (duration - txn.segment_exclusive()).max(0.0);
    let total_time = txn.segment_exclusive() + root_exclusive;

    let all = match kind {
        TransactionKind::Web => "WebTransaction",
        TransactionKind::Background => "OtherTransaction/all",
    };
    metrics.record(all, "", duration, root_exclusive)?;
    metrics.record(&format!("{}/{path}", kind.prefix()), "", duration, root_exclusive)?;

    let total_prefix = kind.total_time_prefix();
    metrics.record(total_prefix, "", total_time, total_time)?;
    metrics.record(&format!("{total_prefix}/{path}"), "", total_time, total_time)?;

    if kind == TransactionKind::Web {
        metrics.record("HttpDispatcher", "", duration, duration)?;
    }
    Ok(())
}
