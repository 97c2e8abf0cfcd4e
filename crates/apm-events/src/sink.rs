//! Sink selection between buffered sampling and streaming.

use std::sync::Arc;

use apm_core::SinkMode;
use tracing::info;

use crate::buffer::{Prioritized, SharedEventBuffer};
use crate::error::{BatchError, EventsError, EventsResult};
use crate::stream::{SpanTransport, StreamingSink};

/// The active event sink. Fixed for the life of the process.
pub enum EventSink<T> {
    Buffered(SharedEventBuffer<T>),
    Streaming(StreamingSink<T>),
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        match self {
            EventSink::Buffered(b) => EventSink::Buffered(b.clone()),
            EventSink::Streaming(s) => EventSink::Streaming(s.clone()),
        }
    }
}

impl<T: Prioritized> EventSink<T> {
    /// Build the sink for `mode`. Streaming mode needs a transport.
    pub fn from_mode(
        mode: SinkMode,
        transport: Option<Arc<dyn SpanTransport<T>>>,
    ) -> EventsResult<Self> {
        let sink = match mode {
            SinkMode::Buffered { capacity } => {
                EventSink::Buffered(SharedEventBuffer::new(capacity)?)
            }
            SinkMode::Streaming => {
                let transport = transport.ok_or(EventsError::MissingTransport)?;
                EventSink::Streaming(StreamingSink::new(transport))
            }
        };
        info!(mode = sink.mode_name(), "event sink initialized");
        Ok(sink)
    }

    /// Hand over a transaction's events and return how many were accepted.
    ///
    /// The buffer takes them under one lock. The stream forwards them in
    /// order and stops at the first failure.
    pub fn put_all(&self, events: Vec<T>) -> Result<usize, BatchError> {
        let total = events.len();
        match self {
            EventSink::Buffered(buffer) => buffer.put_all(events),
            EventSink::Streaming(stream) => {
                for (forwarded, event) in events.into_iter().enumerate() {
                    stream.put(event).map_err(|source| BatchError {
                        forwarded,
                        dropped: total - forwarded,
                        source,
                    })?;
                }
            }
        }
        Ok(total)
    }

    /// The buffer to drain at harvest, if buffering.
    pub fn buffer(&self) -> Option<&SharedEventBuffer<T>> {
        match self {
            EventSink::Buffered(buffer) => Some(buffer),
            EventSink::Streaming(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, EventSink::Streaming(_))
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            EventSink::Buffered(_) => "buffered",
            EventSink::Streaming(_) => "streaming",
        }
    }
}
