//! Synthetic transaction load.
//!
//! Stands in for real instrumentation: each transaction records a few
//! timed segments with random durations, emits a span per segment and
//! finalizes through the recorder.

use apm_core::SpanCategory;
use apm_recorder::{RecorderResult, TransactionKind, TransactionRecorder};
use rand::Rng;

const WEB_ROUTES: &[&str] = &["index", "checkout", "api/orders"];
const JOBS: &[&str] = &["send_email", "rebuild_index"];

const SEGMENTS: &[(&str, SpanCategory)] = &[
    ("Function/render", SpanCategory::Generic),
    ("Datastore/statement/Postgres/orders/select", SpanCategory::Datastore),
    ("External/payments.internal/all", SpanCategory::Http),
];

/// Run one synthetic transaction to completion.
pub fn run_transaction(recorder: &TransactionRecorder) -> RecorderResult<()> {
    let mut rng = rand::rng();

    let (name, kind) = if rng.random_bool(0.7) {
        (WEB_ROUTES[rng.random_range(0..WEB_ROUTES.len())], TransactionKind::Web)
    } else {
        (JOBS[rng.random_range(0..JOBS.len())], TransactionKind::Background)
    };
    let mut txn = recorder.start_transaction(name, kind);

    let mut elapsed = 0.0;
    for _ in 0..rng.random_range(1..=4) {
        let (segment, category) = SEGMENTS[rng.random_range(0..SEGMENTS.len())];
        let duration: f64 = rng.random_range(0.5..40.0);
        txn.record_segment(segment, duration, duration)?;
        match category {
            SpanCategory::Datastore => txn.record_rollup("Datastore/all", duration, duration)?,
            SpanCategory::Http => txn.record_rollup("External/all", duration, duration)?,
            SpanCategory::Generic => {}
        }
        let span = txn.span(segment, category, duration);
        txn.add_span_event(span)?;
        elapsed += duration;
    }

    let overhead: f64 = rng.random_range(0.1..5.0);
    recorder.finalize(&mut txn, elapsed + overhead)?;
    Ok(())
}
