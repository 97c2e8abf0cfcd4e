//! Process-wide metrics table shared by every transaction and the harvester.
//!
//! # Concurrency
//!
//! One `std::sync::Mutex` guards the whole table. Each public operation
//! takes the lock once, so a transaction's merge is atomic with respect to
//! other merges, direct records and harvest. Lock hold time is a single map
//! walk; nothing here performs I/O.
//!
//! A panic while the lock is held poisons it. The table is only ever
//! mutated one whole entry at a time, so the data stays usable and the
//! poison flag is cleared rather than propagated.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::StatsResult;
use crate::key::TagSet;
use crate::record::MetricRecord;
use crate::table::MetricsTable;

#[derive(Clone, Default)]
pub struct SharedMetricsTable {
    inner: Arc<Mutex<MetricsTable>>,
}

impl SharedMetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsTable> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            self.inner.clear_poison();
            poisoned.into_inner()
        })
    }

    pub fn record(
        &self,
        name: &str,
        scope: &str,
        duration: f64,
        exclusive_duration: f64,
    ) -> StatsResult<()> {
        self.lock().record(name, scope, duration, exclusive_duration)
    }

    pub fn record_dimensional(
        &self,
        name: &str,
        tags: &TagSet,
        duration: f64,
        exclusive_duration: f64,
    ) -> StatsResult<()> {
        self.lock()
            .record_dimensional(name, tags, duration, exclusive_duration)
    }

    /// Merge a transaction-local table in, under a single lock acquisition.
    pub fn merge_from(&self, local: &MetricsTable) {
        let mut table = self.lock();
        local.merge_into(&mut table);
    }

    /// Return an unreported snapshot to the live table.
    ///
    /// Used when reporting a harvest fails, so the data rides along with
    /// the next period instead of being lost.
    pub fn merge_back(&self, snapshot: &MetricsTable) {
        let entries = snapshot.len();
        self.merge_from(snapshot);
        debug!(entries, "metrics snapshot merged back");
    }

    /// Copy of the record for `(name, scope)`, if any.
    pub fn get(&self, name: &str, scope: &str) -> Option<MetricRecord> {
        self.lock().get(name, scope).copied()
    }

    pub fn get_dimensional(&self, name: &str, tags: &TagSet) -> Option<MetricRecord> {
        self.lock().get_dimensional(name, tags).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot the table and reset it to empty in one step.
    ///
    /// Records arriving after this call land in the fresh table; no caller
    /// can observe a partially cleared state.
    pub fn harvest(&self) -> MetricsTable {
        let snapshot = self.lock().take();
        debug!(entries = snapshot.len(), "metrics table harvested");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn harvest_snapshots_and_resets() {
        let shared = SharedMetricsTable::new();
        shared.record("OtherTransaction/all", "", 10.0, 10.0).unwrap();

        let snapshot = shared.harvest();
        let r = snapshot.get("OtherTransaction/all", "").unwrap();
        assert_eq!(r.call_count, 1);
        assert_eq!(r.total_call_time, 10.0);

        assert!(shared.is_empty());
        assert!(shared.get("OtherTransaction/all", "").is_none());
    }

    #[test]
    fn merge_back_restores_unreported_data() {
        let shared = SharedMetricsTable::new();
        shared.record("Custom/x", "", 2.0, 2.0).unwrap();
        let snapshot = shared.harvest();

        // New period data arrives before the failed report is returned.
        shared.record("Custom/x", "", 5.0, 5.0).unwrap();
        shared.merge_back(&snapshot);

        let r = shared.get("Custom/x", "").unwrap();
        assert_eq!(r.call_count, 2);
        assert_eq!(r.total_call_time, 7.0);
    }

    #[test]
    fn concurrent_merges_lose_nothing() {
        let shared = SharedMetricsTable::new();
        let threads = 8;
        let per_thread = 250;

        thread::scope(|s| {
            for t in 0..threads {
                let shared = shared.clone();
                s.spawn(move || {
                    for i in 0..per_thread {
                        let mut local = MetricsTable::new();
                        local.record("Custom/x", "", 1.0, 1.0).unwrap();
                        local
                            .record(&format!("Custom/t{t}"), "", i as f64, 0.0)
                            .unwrap();
                        shared.merge_from(&local);
                    }
                });
            }
        });

        let r = shared.get("Custom/x", "").unwrap();
        assert_eq!(r.call_count, (threads * per_thread) as u64);
        assert_eq!(r.total_call_time, (threads * per_thread) as f64);
        for t in 0..threads {
            let r = shared.get(&format!("Custom/t{t}"), "").unwrap();
            assert_eq!(r.call_count, per_thread as u64);
            assert_eq!(r.min_call_time, 0.0);
            assert_eq!(r.max_call_time, (per_thread - 1) as f64);
        }
    }

    #[test]
    fn harvest_during_merges_partitions_data() {
        let shared = SharedMetricsTable::new();
        let merges = 1000;

        let harvested = thread::scope(|s| {
            let writer = {
                let shared = shared.clone();
                s.spawn(move || {
                    for _ in 0..merges {
                        let mut local = MetricsTable::new();
                        local.record("Custom/x", "", 1.0, 1.0).unwrap();
                        shared.merge_from(&local);
                    }
                })
            };

            let mut total = 0;
            while !writer.is_finished() {
                if let Some(r) = shared.harvest().get("Custom/x", "") {
                    total += r.call_count;
                }
            }
            total
        });

        let remainder = shared.get("Custom/x", "").map_or(0, |r| r.call_count);
        assert_eq!(harvested + remainder, merges);
    }

    #[test]
    fn survives_poisoned_lock() {
        let shared = SharedMetricsTable::new();
        shared.record("Custom/x", "", 1.0, 1.0).unwrap();

        let poisoner = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("transaction blew up mid-merge");
        })
        .join();

        assert!(shared.inner.is_poisoned());
        shared.record("Custom/x", "", 1.0, 1.0).unwrap();
        assert!(!shared.inner.is_poisoned());
        assert_eq!(shared.get("Custom/x", "").unwrap().call_count, 2);
    }
}
