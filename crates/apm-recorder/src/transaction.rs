//! Per-transaction accumulation state.
//!
//! A `Transaction` is owned by exactly one unit of work, so nothing here
//! locks. Instrumentation feeds it durations that it has already measured;
//! the recorder turns it into process-wide state exactly once.

use apm_core::{
    epoch_millis, new_guid, new_priority, new_trace_id, Attributes, SpanCategory, SpanEvent,
};
use apm_stats::{MetricsTable, TagSet};

use crate::error::{RecorderError, RecorderResult};

/// Default naming group.
pub const DEFAULT_GROUP: &str = "Function";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Request handled by a web framework.
    Web,
    /// Anything else: jobs, consumers, scripts.
    Background,
}

impl TransactionKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            TransactionKind::Web => "WebTransaction",
            TransactionKind::Background => "OtherTransaction",
        }
    }

    pub fn total_time_prefix(&self) -> &'static str {
        match self {
            TransactionKind::Web => "WebTransactionTotalTime",
            TransactionKind::Background => "OtherTransactionTotalTime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Accumulating,
    Finalizing,
    Merged,
}

#[derive(Debug)]
pub struct Transaction {
    name: String,
    group: String,
    kind: TransactionKind,
    guid: String,
    trace_id: String,
    priority: f64,
    sampled: bool,
    collect_spans: bool,
    started_at: u64,
    state: TransactionState,
    metrics: MetricsTable,
    events: Vec<SpanEvent>,
    /// Sum of exclusive time of every recorded segment (ms).
    segment_exclusive: f64,
}

impl Transaction {
    /// New sampled transaction in the default group.
    pub fn new(name: &str, kind: TransactionKind) -> Self {
        Self {
            name: name.to_string(),
            group: DEFAULT_GROUP.to_string(),
            kind,
            guid: new_guid(),
            trace_id: new_trace_id(),
            priority: new_priority(true),
            sampled: true,
            collect_spans: true,
            started_at: epoch_millis(),
            state: TransactionState::Accumulating,
            metrics: MetricsTable::new(),
            events: Vec::new(),
            segment_exclusive: 0.0,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    /// Override the sampling decision made by the caller's sampler.
    pub fn with_sampling(mut self, priority: f64, sampled: bool) -> Self {
        self.priority = priority;
        self.sampled = sampled;
        self
    }

    /// Stop collecting span events for this transaction.
    pub fn without_span_events(mut self) -> Self {
        self.collect_spans = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn sampled(&self) -> bool {
        self.sampled
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn metrics(&self) -> &MetricsTable {
        &self.metrics
    }

    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    /// `{prefix}/{group}/{name}`, the scope of segment metrics.
    pub fn scope_name(&self) -> String {
        format!("{}/{}/{}", self.kind.prefix(), self.group, self.name)
    }

    pub(crate) fn segment_exclusive(&self) -> f64 {
        self.segment_exclusive
    }

    fn ensure_accumulating(&self) -> RecorderResult<()> {
        if self.state == TransactionState::Accumulating {
            Ok(())
        } else {
            Err(RecorderError::NotAccumulating(self.guid.clone()))
        }
    }

    /// Record a timed segment: a scoped metric plus its unscoped rollup.
    pub fn record_segment(
        &mut self,
        name: &str,
        duration: f64,
        exclusive_duration: f64,
    ) -> RecorderResult<()> {
        self.ensure_accumulating()?;
        let scope = self.scope_name();
        self.metrics
            .record(name, &scope, duration, exclusive_duration)?;
        self.metrics.record(name, "", duration, exclusive_duration)?;
        self.segment_exclusive += exclusive_duration;
        Ok(())
    }

    /// Record an unscoped rollup such as `Datastore/all`.
    pub fn record_rollup(
        &mut self,
        name: &str,
        duration: f64,
        exclusive_duration: f64,
    ) -> RecorderResult<()> {
        self.ensure_accumulating()?;
        self.metrics.record(name, "", duration, exclusive_duration)?;
        Ok(())
    }

    pub fn record_custom_metric(&mut self, name: &str, value: f64) -> RecorderResult<()> {
        self.ensure_accumulating()?;
        self.metrics.record(name, "", value, value)?;
        Ok(())
    }

    pub fn record_dimensional_metric(
        &mut self,
        name: &str,
        tags: &TagSet,
        value: f64,
    ) -> RecorderResult<()> {
        self.ensure_accumulating()?;
        self.metrics.record_dimensional(name, tags, value, value)?;
        Ok(())
    }

    /// Build a child span of this transaction. Duration in milliseconds.
    pub fn span(&self, name: &str, category: SpanCategory, duration_ms: f64) -> SpanEvent {
        SpanEvent {
            trace_id: self.trace_id.clone(),
            guid: new_guid(),
            parent_id: Some(self.guid.clone()),
            transaction_id: self.guid.clone(),
            sampled: self.sampled,
            priority: self.priority,
            timestamp: epoch_millis(),
            duration: duration_ms / 1000.0,
            name: name.to_string(),
            category,
            entry_point: false,
            user_attributes: Attributes::new(),
            agent_attributes: Attributes::new(),
        }
    }

    /// Queue a finished span. Ignored when span collection is off.
    pub fn add_span_event(&mut self, event: SpanEvent) -> RecorderResult<()> {
        self.ensure_accumulating()?;
        if self.collect_spans {
            self.events.push(event);
        }
        Ok(())
    }

    /// Enter FINALIZING and hand over the local state.
    ///
    /// The root span is appended here so it carries the final duration.
    pub(crate) fn begin_finalize(
        &mut self,
        duration_ms: f64,
    ) -> RecorderResult<(MetricsTable, Vec<SpanEvent>)> {
        if self.state != TransactionState::Accumulating {
            return Err(RecorderError::AlreadyFinalized(self.guid.clone()));
        }
        self.state = TransactionState::Finalizing;

        let mut events = std::mem::take(&mut self.events);
        if self.collect_spans {
            events.push(self.root_span(duration_ms));
        }
        Ok((std::mem::take(&mut self.metrics), events))
    }

    pub(crate) fn mark_merged(&mut self) {
        self.state = TransactionState::Merged;
    }

    fn root_span(&self, duration_ms: f64) -> SpanEvent {
        SpanEvent {
            trace_id: self.trace_id.clone(),
            guid: self.guid.clone(),
            parent_id: None,
            transaction_id: self.guid.clone(),
            sampled: self.sampled,
            priority: self.priority,
            timestamp: self.started_at,
            duration: duration_ms / 1000.0,
            name: self.scope_name(),
            category: SpanCategory::Generic,
            entry_point: true,
            user_attributes: Attributes::new(),
            agent_attributes: Attributes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_stats::StatsError;

    #[test]
    fn scope_names() {
        let web = Transaction::new("index", TransactionKind::Web);
        assert_eq!(web.scope_name(), "WebTransaction/Function/index");

        let job = Transaction::new("nightly", TransactionKind::Background).with_group("Celery");
        assert_eq!(job.scope_name(), "OtherTransaction/Celery/nightly");
    }

    #[test]
    fn segment_records_scoped_and_rollup() {
        let mut txn = Transaction::new("job", TransactionKind::Background);
        txn.record_segment("Function/step", 4.0, 3.0).unwrap();
        txn.record_segment("Function/step", 2.0, 2.0).unwrap();

        let scoped = txn
            .metrics()
            .get("Function/step", "OtherTransaction/Function/job")
            .unwrap();
        assert_eq!(scoped.call_count, 2);
        assert_eq!(txn.metrics().get("Function/step", "").unwrap().call_count, 2);
        assert_eq!(txn.segment_exclusive(), 5.0);
    }

    #[test]
    fn invalid_duration_surfaces_stats_error() {
        let mut txn = Transaction::new("job", TransactionKind::Background);
        let err = txn.record_segment("Function/step", -1.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Stats(StatsError::NegativeDuration(_))
        ));
        assert!(txn.metrics().is_empty());
        assert_eq!(txn.segment_exclusive(), 0.0);
    }

    #[test]
    fn spans_inherit_trace_context() {
        let txn =
            Transaction::new("job", TransactionKind::Background).with_sampling(0.4, false);
        let span = txn.span(
            "Datastore/statement/Postgres/users/select",
            SpanCategory::Datastore,
            12.0,
        );

        assert_eq!(span.trace_id, txn.trace_id());
        assert_eq!(span.parent_id.as_deref(), Some(txn.guid()));
        assert_eq!(span.transaction_id, txn.guid());
        assert_eq!(span.priority, 0.4);
        assert!(!span.sampled);
        assert!((span.duration - 0.012).abs() < 1e-12);
        assert!(!span.entry_point);
    }

    #[test]
    fn span_collection_can_be_disabled() {
        let mut txn =
            Transaction::new("job", TransactionKind::Background).without_span_events();
        let span = txn.span("Function/step", SpanCategory::Generic, 1.0);
        txn.add_span_event(span).unwrap();
        assert!(txn.events().is_empty());

        let (_, events) = txn.begin_finalize(5.0).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn finalize_appends_root_span_and_locks_transaction() {
        let mut txn = Transaction::new("job", TransactionKind::Background);
        let span = txn.span("Function/step", SpanCategory::Generic, 1.0);
        txn.add_span_event(span).unwrap();

        let (_, events) = txn.begin_finalize(8.0).unwrap();
        assert_eq!(events.len(), 2);
        let root = events.iter().find(|e| e.entry_point).unwrap();
        assert_eq!(root.guid, txn.guid());
        assert_eq!(root.parent_id, None);
        assert_eq!(root.name, "OtherTransaction/Function/job");
        assert_eq!(txn.state(), TransactionState::Finalizing);

        assert!(matches!(
            txn.record_custom_metric("Custom/late", 1.0),
            Err(RecorderError::NotAccumulating(_))
        ));
        assert!(matches!(
            txn.begin_finalize(8.0),
            Err(RecorderError::AlreadyFinalized(_))
        ));
    }
}
