pub mod config;
pub mod ids;
pub mod span;

pub use config::{AgentConfig, SinkMode};
pub use ids::{new_guid, new_priority, new_trace_id};
pub use span::*;
