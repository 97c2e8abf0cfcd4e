//! apm-events: where finished span events go.
//!
//! Two sinks, selected once at startup:
//!
//! ```text
//! EventSink::Buffered ──> SharedEventBuffer ──> PriorityEventBuffer (min-heap, fixed capacity)
//!                                               └── drained by the harvester
//! EventSink::Streaming ─> StreamingSink ──────> SpanTransport (every event, immediately)
//! ```
//!
//! Under capacity pressure the buffer keeps the highest-priority events: a
//! new event evicts the current minimum only when its priority is strictly
//! greater, so ties keep the event that arrived first.

pub mod buffer;
pub mod error;
pub mod sink;
pub mod stream;

pub use buffer::{EventHarvest, PriorityEventBuffer, Prioritized, SharedEventBuffer};
pub use error::{BatchError, EventsError, EventsResult};
pub use sink::EventSink;
pub use stream::{ChannelTransport, SpanTransport, StreamingSink};
