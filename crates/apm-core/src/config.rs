//! apm.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of the span event reservoir.
pub const DEFAULT_SPAN_SAMPLES: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub span_events: SpanEventsConfig,
    #[serde(default)]
    pub infinite_tracing: InfiniteTracingConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Capacity of the priority event buffer.
    #[serde(default = "default_span_samples")]
    pub max_samples_stored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfiniteTracingConfig {
    /// Stream every span to the transport instead of sampling.
    #[serde(default)]
    pub enabled: bool,
    /// Spans the transport queue holds before new ones are dropped.
    #[serde(default = "default_span_queue_size")]
    pub span_queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_harvest_interval")]
    pub interval_secs: u64,
}

/// Where finished span events go. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Buffered { capacity: usize },
    Streaming,
}

fn default_app_name() -> String {
    "Rust Application".to_string()
}

fn default_true() -> bool {
    true
}

fn default_span_samples() -> usize {
    DEFAULT_SPAN_SAMPLES
}

fn default_span_queue_size() -> usize {
    10_000
}

fn default_harvest_interval() -> u64 {
    60
}

impl Default for SpanEventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples_stored: DEFAULT_SPAN_SAMPLES,
        }
    }
}

impl Default for InfiniteTracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            span_queue_size: default_span_queue_size(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_harvest_interval(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            span_events: SpanEventsConfig::default(),
            infinite_tracing: InfiniteTracingConfig::default(),
            harvest: HarvestConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.span_events.max_samples_stored == 0 {
            anyhow::bail!("span_events.max_samples_stored must be greater than zero");
        }
        if self.infinite_tracing.span_queue_size == 0 {
            anyhow::bail!("infinite_tracing.span_queue_size must be greater than zero");
        }
        if self.harvest.interval_secs == 0 {
            anyhow::bail!("harvest.interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn sink_mode(&self) -> SinkMode {
        if self.infinite_tracing.enabled {
            SinkMode::Streaming
        } else {
            SinkMode::Buffered {
                capacity: self.span_events.max_samples_stored,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.app_name, "Rust Application");
        assert!(config.span_events.enabled);
        assert_eq!(
            config.sink_mode(),
            SinkMode::Buffered {
                capacity: DEFAULT_SPAN_SAMPLES
            }
        );
        assert_eq!(config.harvest.interval_secs, 60);
    }

    #[test]
    fn test_parse_streaming() {
        let toml_str = r#"
app_name = "checkout"

[infinite_tracing]
enabled = true
"#;
        let config = AgentConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.app_name, "checkout");
        assert_eq!(config.sink_mode(), SinkMode::Streaming);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let toml_str = r#"
[span_events]
max_samples_stored = 0
"#;
        let err = AgentConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("max_samples_stored"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let toml_str = r#"
[harvest]
interval_secs = 0
"#;
        assert!(AgentConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_zero_span_queue_rejected() {
        let toml_str = r#"
[infinite_tracing]
enabled = true
span_queue_size = 0
"#;
        let err = AgentConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("span_queue_size"));
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut config = AgentConfig::default();
        config.span_events.max_samples_stored = 3;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.sink_mode(), SinkMode::Buffered { capacity: 3 });
    }
}
