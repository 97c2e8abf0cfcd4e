//! Metric table keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{StatsError, StatsResult};

/// `(name, scope)` key. An empty scope is the unscoped rollup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub name: String,
    pub scope: String,
}

impl MetricKey {
    pub fn new(name: &str, scope: &str) -> StatsResult<Self> {
        if name.is_empty() {
            return Err(StatsError::EmptyMetricName);
        }
        Ok(Self {
            name: name.to_string(),
            scope: scope.to_string(),
        })
    }

    pub fn unscoped(name: &str) -> StatsResult<Self> {
        Self::new(name, "")
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.scope)
        }
    }
}

/// Set of `(key, value)` tag pairs. Equality ignores insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagSet(BTreeSet<(String, String)>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagSet::new();
        for (k, v) in iter {
            tags.insert(k, v);
        }
        tags
    }
}

/// `(name, tags)` key for dimensional metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionalKey {
    pub name: String,
    pub tags: TagSet,
}

impl DimensionalKey {
    pub fn new(name: &str, tags: TagSet) -> StatsResult<Self> {
        if name.is_empty() {
            return Err(StatsError::EmptyMetricName);
        }
        Ok(Self {
            name: name.to_string(),
            tags,
        })
    }
}
