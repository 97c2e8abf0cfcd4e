//! Metrics table: `(name, scope)` and `(name, tags)` keyed statistics.
//!
//! A table is plain owned data with no interior locking. Each transaction
//! owns one privately; the process-wide instance lives behind
//! [`SharedMetricsTable`](crate::SharedMetricsTable).

use serde::Serialize;
use std::collections::HashMap;

use crate::error::StatsResult;
use crate::key::{DimensionalKey, MetricKey, TagSet};
use crate::record::{check_duration, MetricRecord};

/// Flattened view of one table entry, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEntry {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(skip_serializing_if = "TagSet::is_empty")]
    pub tags: TagSet,
    #[serde(flatten)]
    pub record: MetricRecord,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsTable {
    scalar: HashMap<MetricKey, MetricRecord>,
    dimensional: HashMap<DimensionalKey, MetricRecord>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a duration for `(name, scope)`. Pass `""` for unscoped.
    pub fn record(
        &mut self,
        name: &str,
        scope: &str,
        duration: f64,
        exclusive_duration: f64,
    ) -> StatsResult<()> {
        let key = MetricKey::new(name, scope)?;
        // Validate before touching the map so a rejected call leaves no entry.
        check_duration(duration)?;
        check_duration(exclusive_duration)?;
        self.scalar
            .entry(key)
            .or_default()
            .observe(duration, exclusive_duration)
    }

    /// Observe a duration for `(name, tags)`.
    pub fn record_dimensional(
        &mut self,
        name: &str,
        tags: &TagSet,
        duration: f64,
        exclusive_duration: f64,
    ) -> StatsResult<()> {
        let key = DimensionalKey::new(name, tags.clone())?;
        check_duration(duration)?;
        check_duration(exclusive_duration)?;
        self.dimensional
            .entry(key)
            .or_default()
            .observe(duration, exclusive_duration)
    }

    /// Merge a pre-built record into `key`'s entry.
    pub fn merge_record(&mut self, key: MetricKey, record: &MetricRecord) {
        self.scalar.entry(key).or_default().merge(record);
    }

    /// Merge every entry of `self` into `other`, creating missing keys.
    pub fn merge_into(&self, other: &mut MetricsTable) {
        for (key, record) in &self.scalar {
            match other.scalar.get_mut(key) {
                Some(existing) => existing.merge(record),
                None => {
                    other.scalar.insert(key.clone(), *record);
                }
            }
        }
        for (key, record) in &self.dimensional {
            match other.dimensional.get_mut(key) {
                Some(existing) => existing.merge(record),
                None => {
                    other.dimensional.insert(key.clone(), *record);
                }
            }
        }
    }

    /// Look up `(name, scope)`. `None` means never recorded.
    pub fn get(&self, name: &str, scope: &str) -> Option<&MetricRecord> {
        let key = MetricKey {
            name: name.to_string(),
            scope: scope.to_string(),
        };
        self.scalar.get(&key)
    }

    pub fn get_dimensional(&self, name: &str, tags: &TagSet) -> Option<&MetricRecord> {
        let key = DimensionalKey {
            name: name.to_string(),
            tags: tags.clone(),
        };
        self.dimensional.get(&key)
    }

    /// Remove the scalar entry for `(name, scope)`, if present.
    pub fn remove(&mut self, name: &str, scope: &str) -> Option<MetricRecord> {
        let key = MetricKey {
            name: name.to_string(),
            scope: scope.to_string(),
        };
        self.scalar.remove(&key)
    }

    /// Number of scalar plus dimensional entries.
    pub fn len(&self) -> usize {
        self.scalar.len() + self.dimensional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalar.is_empty() && self.dimensional.is_empty()
    }

    /// Move all entries out, leaving this table empty.
    pub fn take(&mut self) -> MetricsTable {
        std::mem::take(self)
    }

    /// All entries, sorted by name then scope then tags.
    pub fn entries(&self) -> Vec<MetricEntry> {
        let mut out: Vec<MetricEntry> = self
            .scalar
            .iter()
            .map(|(k, r)| MetricEntry {
                name: k.name.clone(),
                scope: k.scope.clone(),
                tags: TagSet::new(),
                record: *r,
            })
            .chain(self.dimensional.iter().map(|(k, r)| MetricEntry {
                name: k.name.clone(),
                scope: String::new(),
                tags: k.tags.clone(),
                record: *r,
            }))
            .collect();
        out.sort_by(|a, b| {
            (&a.name, &a.scope, &a.tags).cmp(&(&b.name, &b.scope, &b.tags))
        });
        out
    }
}
