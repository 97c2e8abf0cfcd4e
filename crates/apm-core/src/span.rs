//! Span event records produced when a unit of work finishes.
//!
//! A [`SpanEvent`] is the single in-memory representation handed to the
//! event sinks. Transports that need a flat attribute map call
//! [`SpanEvent::intrinsics`] at their boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute map keyed by attribute name.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

/// Span category intrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanCategory {
    Generic,
    Http,
    Datastore,
}

impl SpanCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanCategory::Generic => "generic",
            SpanCategory::Http => "http",
            SpanCategory::Datastore => "datastore",
        }
    }
}

/// A finished span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub trace_id: String,
    pub guid: String,
    pub parent_id: Option<String>,
    pub transaction_id: String,
    pub sampled: bool,
    /// Sampling weight; higher survives reservoir pressure.
    pub priority: f64,
    /// Start time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Duration in seconds.
    pub duration: f64,
    pub name: String,
    pub category: SpanCategory,
    /// Set on the root span of a transaction.
    pub entry_point: bool,
    pub user_attributes: Attributes,
    pub agent_attributes: Attributes,
}

impl SpanEvent {
    pub fn with_user_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.user_attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_agent_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.agent_attributes.insert(key.to_string(), value.into());
        self
    }

    /// Render the intrinsic attributes as a flat map.
    pub fn intrinsics(&self) -> Attributes {
        let mut out = Attributes::new();
        out.insert("type".into(), "Span".into());
        out.insert("traceId".into(), self.trace_id.clone().into());
        out.insert("guid".into(), self.guid.clone().into());
        if let Some(parent) = &self.parent_id {
            out.insert("parentId".into(), parent.clone().into());
        }
        out.insert("transactionId".into(), self.transaction_id.clone().into());
        out.insert("sampled".into(), self.sampled.into());
        out.insert("priority".into(), self.priority.into());
        out.insert("timestamp".into(), (self.timestamp as i64).into());
        out.insert("duration".into(), self.duration.into());
        out.insert("name".into(), self.name.clone().into());
        out.insert("category".into(), self.category.as_str().into());
        if self.entry_point {
            out.insert("nr.entryPoint".into(), true.into());
        }
        out
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_span(entry_point: bool, parent_id: Option<&str>) -> SpanEvent {
        SpanEvent {
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            guid: "b7ad6b7169203331".to_string(),
            parent_id: parent_id.map(str::to_string),
            transaction_id: "00f067aa0ba902b7".to_string(),
            sampled: true,
            priority: 1.25,
            timestamp: epoch_millis(),
            duration: 0.012,
            name: "Function/handler".to_string(),
            category: SpanCategory::Generic,
            entry_point,
            user_attributes: Attributes::new(),
            agent_attributes: Attributes::new(),
        }
    }

    #[test]
    fn intrinsics_for_entry_span() {
        let span = test_span(true, None);
        let intrinsics = span.intrinsics();

        assert_eq!(intrinsics["type"], AttributeValue::String("Span".into()));
        assert_eq!(intrinsics["category"], AttributeValue::String("generic".into()));
        assert_eq!(intrinsics["priority"], AttributeValue::Double(1.25));
        assert_eq!(intrinsics["sampled"], AttributeValue::Bool(true));
        assert_eq!(intrinsics["nr.entryPoint"], AttributeValue::Bool(true));
        assert!(!intrinsics.contains_key("parentId"));
        assert!(matches!(intrinsics["timestamp"], AttributeValue::Int(ts) if ts as u64 <= epoch_millis()));
    }

    #[test]
    fn intrinsics_for_child_span() {
        let span = test_span(false, Some("b7ad6b7169203331"));
        let intrinsics = span.intrinsics();

        assert!(!intrinsics.contains_key("nr.entryPoint"));
        assert_eq!(
            intrinsics["parentId"],
            AttributeValue::String("b7ad6b7169203331".into())
        );
    }

    #[test]
    fn attributes_are_kept_apart() {
        let span = test_span(false, None)
            .with_user_attribute("user.id", 42_i64)
            .with_agent_attribute("http.statusCode", 200_i64);

        assert_eq!(span.user_attributes["user.id"], AttributeValue::Int(42));
        assert!(!span.user_attributes.contains_key("http.statusCode"));
        assert_eq!(span.agent_attributes.len(), 1);
    }
}
