//! Harvest cycle: periodically snapshots the shared telemetry state and
//! hands it to a reporter.
//!
//! The metrics table is snapshot-and-reset under its lock; the event
//! buffer is drained under its own. If reporting fails, the metrics
//! snapshot is merged back so the next cycle sends it again. Drained span
//! events are not retained, and neither is the count of events sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apm_core::{epoch_millis, SpanEvent};
use apm_events::SharedEventBuffer;
use apm_stats::{MetricKey, MetricRecord, MetricsTable, SharedMetricsTable};
use tracing::{debug, error, info, warn};

use crate::recorder::TransactionRecorder;

pub const EVENTS_SEEN_METRIC: &str = "Supportability/SpanEvent/TotalEventsSeen";
pub const EVENTS_SENT_METRIC: &str = "Supportability/SpanEvent/TotalEventsSent";

/// Everything collected during one harvest period.
#[derive(Debug)]
pub struct HarvestPayload {
    pub metrics: MetricsTable,
    pub span_events: Vec<SpanEvent>,
    pub events_seen: u64,
    pub events_dropped: u64,
    /// Period bounds, milliseconds since the Unix epoch.
    pub period_start: u64,
    pub period_end: u64,
}

/// Counts from a harvest, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSummary {
    pub metrics: usize,
    pub span_events: usize,
    pub events_seen: u64,
    pub events_dropped: u64,
}

/// Sends a harvest payload to the collector backend.
///
/// Wire encoding lives behind this trait.
pub trait Reporter: Send + Sync {
    fn report(&self, payload: &HarvestPayload) -> anyhow::Result<()>;
}

/// Reporter that only logs what it would send.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, payload: &HarvestPayload) -> anyhow::Result<()> {
        info!(
            metrics = payload.metrics.len(),
            span_events = payload.span_events.len(),
            events_seen = payload.events_seen,
            events_dropped = payload.events_dropped,
            period_ms = payload.period_end.saturating_sub(payload.period_start),
            "harvest"
        );
        for entry in payload.metrics.entries() {
            debug!(
                name = %entry.name,
                scope = %entry.scope,
                call_count = entry.record.call_count,
                total_call_time = entry.record.total_call_time,
                "metric"
            );
        }
        Ok(())
    }
}

pub struct Harvester {
    stats: SharedMetricsTable,
    events: Option<SharedEventBuffer<SpanEvent>>,
    reporter: Arc<dyn Reporter>,
    interval: Duration,
    period_start: AtomicU64,
    failures: AtomicU64,
}

impl Harvester {
    /// Harvest the recorder's shared state. In streaming mode there is no
    /// buffer to drain.
    pub fn new(
        recorder: &TransactionRecorder,
        reporter: Arc<dyn Reporter>,
        interval: Duration,
    ) -> Self {
        Self {
            stats: recorder.stats().clone(),
            events: recorder.sink().buffer().cloned(),
            reporter,
            interval,
            period_start: AtomicU64::new(epoch_millis()),
            failures: AtomicU64::new(0),
        }
    }

    /// Harvests whose report failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Run one harvest.
    pub fn harvest_once(&self) -> anyhow::Result<HarvestSummary> {
        let period_end = epoch_millis();
        let period_start = self.period_start.swap(period_end, Ordering::Relaxed);

        let (span_events, events_seen, events_dropped) = match &self.events {
            Some(buffer) => {
                let harvest = buffer.harvest();
                (harvest.events, harvest.num_seen, harvest.num_dropped)
            }
            None => (Vec::new(), 0, 0),
        };

        let mut metrics = self.stats.harvest();
        if self.events.is_some() {
            metrics.merge_record(
                MetricKey::unscoped(EVENTS_SEEN_METRIC)?,
                &MetricRecord::from_count(events_seen),
            );
            metrics.merge_record(
                MetricKey::unscoped(EVENTS_SENT_METRIC)?,
                &MetricRecord::from_count(span_events.len() as u64),
            );
        }

        let mut payload = HarvestPayload {
            metrics,
            span_events,
            events_seen,
            events_dropped,
            period_start,
            period_end,
        };
        let summary = HarvestSummary {
            metrics: payload.metrics.len(),
            span_events: payload.span_events.len(),
            events_seen,
            events_dropped,
        };

        if let Err(e) = self.reporter.report(&payload) {
            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            // The drained events are gone, so only Seen rides along.
            payload.metrics.remove(EVENTS_SENT_METRIC, "");
            self.stats.merge_back(&payload.metrics);
            warn!(
                discarded_events = payload.span_events.len(),
                failures, "harvest report failed, metrics kept for next cycle"
            );
            return Err(e);
        }

        debug!(
            metrics = summary.metrics,
            span_events = summary.span_events,
            "harvest complete"
        );
        Ok(summary)
    }

    /// Harvest every `interval` until `shutdown` flips, then once more.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "harvester started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.harvest_once() {
                        error!(error = %e, "harvest failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("harvester shutting down");
                    // Final harvest before exit.
                    if let Err(e) = self.harvest_once() {
                        error!(error = %e, "final harvest failed");
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_core::SinkMode;
    use apm_events::EventSink;
    use std::sync::Mutex;

    use crate::transaction::TransactionKind;

    /// Records payload summaries; fails while `fail` is set.
    #[derive(Default)]
    struct CapturingReporter {
        fail: Mutex<bool>,
        seen: Mutex<Vec<(MetricsTable, usize)>>,
    }

    impl Reporter for CapturingReporter {
        fn report(&self, payload: &HarvestPayload) -> anyhow::Result<()> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("collector unavailable");
            }
            self.seen
                .lock()
                .unwrap()
                .push((payload.metrics.clone(), payload.span_events.len()));
            Ok(())
        }
    }

    fn recorder(capacity: usize) -> TransactionRecorder {
        let sink = EventSink::from_mode(SinkMode::Buffered { capacity }, None).unwrap();
        TransactionRecorder::new(SharedMetricsTable::new(), sink)
    }

    #[test]
    fn harvest_reports_and_resets() {
        let recorder = recorder(10);
        let reporter = Arc::new(CapturingReporter::default());
        let harvester = Harvester::new(&recorder, reporter.clone(), Duration::from_secs(60));

        let mut txn = recorder.start_transaction("job", TransactionKind::Background);
        recorder.finalize(&mut txn, 10.0).unwrap();

        let summary = harvester.harvest_once().unwrap();
        assert_eq!(summary.span_events, 1);
        assert_eq!(summary.events_seen, 1);

        let seen = reporter.seen.lock().unwrap();
        let (metrics, events) = &seen[0];
        assert_eq!(*events, 1);
        let all = metrics.get("OtherTransaction/all", "").unwrap();
        assert_eq!(all.call_count, 1);
        assert_eq!(all.total_call_time, 10.0);
        assert_eq!(metrics.get(EVENTS_SEEN_METRIC, "").unwrap().call_count, 1);
        assert_eq!(metrics.get(EVENTS_SENT_METRIC, "").unwrap().call_count, 1);

        assert!(recorder.stats().is_empty());
        assert_eq!(recorder.sink().buffer().unwrap().count(), 0);
    }

    #[test]
    fn failed_report_merges_metrics_back() {
        let recorder = recorder(10);
        let reporter = Arc::new(CapturingReporter::default());
        let harvester = Harvester::new(&recorder, reporter.clone(), Duration::from_secs(60));

        recorder.record_custom_metric("Custom/x", 3.0).unwrap();
        *reporter.fail.lock().unwrap() = true;
        assert!(harvester.harvest_once().is_err());
        assert_eq!(harvester.failure_count(), 1);
        assert_eq!(recorder.stats().get("Custom/x", "").unwrap().call_count, 1);

        recorder.record_custom_metric("Custom/x", 7.0).unwrap();
        *reporter.fail.lock().unwrap() = false;
        harvester.harvest_once().unwrap();

        let seen = reporter.seen.lock().unwrap();
        let x = seen[0].0.get("Custom/x", "").unwrap();
        assert_eq!(x.call_count, 2);
        assert_eq!(x.total_call_time, 10.0);
    }

    #[test]
    fn failed_report_does_not_count_discarded_events_as_sent() {
        let recorder = recorder(10);
        let reporter = Arc::new(CapturingReporter::default());
        let harvester = Harvester::new(&recorder, reporter.clone(), Duration::from_secs(60));

        for _ in 0..3 {
            let mut txn = recorder.start_transaction("job", TransactionKind::Background);
            recorder.finalize(&mut txn, 1.0).unwrap();
        }
        *reporter.fail.lock().unwrap() = true;
        assert!(harvester.harvest_once().is_err());
        assert!(recorder.stats().get(EVENTS_SENT_METRIC, "").is_none());
        assert_eq!(
            recorder.stats().get(EVENTS_SEEN_METRIC, "").unwrap().call_count,
            3
        );

        *reporter.fail.lock().unwrap() = false;
        let summary = harvester.harvest_once().unwrap();
        assert_eq!(summary.span_events, 0);

        let seen = reporter.seen.lock().unwrap();
        let (metrics, events) = &seen[0];
        assert_eq!(*events, 0);
        assert_eq!(metrics.get(EVENTS_SENT_METRIC, "").unwrap().call_count, 0);
        assert_eq!(metrics.get(EVENTS_SEEN_METRIC, "").unwrap().call_count, 3);
        assert_eq!(
            metrics.get("OtherTransaction/all", "").unwrap().call_count,
            3
        );
    }

    #[test]
    fn dropped_events_are_counted() {
        let recorder = recorder(2);
        let harvester = Harvester::new(&recorder, Arc::new(LogReporter), Duration::from_secs(60));

        for _ in 0..5 {
            let mut txn = recorder.start_transaction("job", TransactionKind::Background);
            recorder.finalize(&mut txn, 1.0).unwrap();
        }

        let summary = harvester.harvest_once().unwrap();
        assert_eq!(summary.span_events, 2);
        assert_eq!(summary.events_seen, 5);
        assert_eq!(summary.events_dropped, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_harvests_until_shutdown() {
        let recorder = recorder(10);
        let reporter = Arc::new(CapturingReporter::default());
        let harvester = Harvester::new(&recorder, reporter.clone(), Duration::from_secs(5));

        let (tx, rx) = tokio::sync::watch::channel(false);
        recorder.record_custom_metric("Custom/x", 1.0).unwrap();

        let task = async {
            harvester.run(rx).await;
        };
        let driver = async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            recorder.record_custom_metric("Custom/y", 1.0).unwrap();
            tx.send(true).unwrap();
        };
        tokio::join!(task, driver);

        let seen = reporter.seen.lock().unwrap();
        // Two interval harvests plus the final one.
        assert_eq!(seen.len(), 3);
        assert!(seen[0].0.get("Custom/x", "").is_some());
        assert!(seen[2].0.get("Custom/y", "").is_some());
    }
}
