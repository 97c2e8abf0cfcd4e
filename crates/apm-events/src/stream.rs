//! Streaming sink: forwards every event to a transport as it arrives.
//!
//! Used when continuous span streaming is enabled. Nothing is buffered or
//! sampled here; backpressure is the transport's concern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::error::{EventsError, EventsResult};

/// Destination for streamed events.
pub trait SpanTransport<T>: Send + Sync {
    fn send(&self, event: T) -> EventsResult<()>;
}

/// Transport that hands events to a bounded tokio channel.
///
/// The receiving half belongs to whatever task speaks the wire protocol.
/// A full queue rejects the event rather than blocking the caller.
pub struct ChannelTransport<T> {
    tx: mpsc::Sender<T>,
}

impl<T> ChannelTransport<T> {
    pub fn new(queue_size: usize) -> EventsResult<(Self, mpsc::Receiver<T>)> {
        if queue_size == 0 {
            return Err(EventsError::ZeroCapacity);
        }
        let (tx, rx) = mpsc::channel(queue_size);
        Ok((Self { tx }, rx))
    }
}

impl<T: Send> SpanTransport<T> for ChannelTransport<T> {
    fn send(&self, event: T) -> EventsResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => EventsError::QueueFull,
            TrySendError::Closed(_) => EventsError::TransportClosed,
        })
    }
}

#[derive(Default)]
struct StreamCounters {
    forwarded: AtomicU64,
    failed: AtomicU64,
}

pub struct StreamingSink<T> {
    transport: Arc<dyn SpanTransport<T>>,
    counters: Arc<StreamCounters>,
}

impl<T> Clone for StreamingSink<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T> StreamingSink<T> {
    pub fn new(transport: Arc<dyn SpanTransport<T>>) -> Self {
        Self {
            transport,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    /// Forward one event immediately.
    pub fn put(&self, event: T) -> EventsResult<()> {
        match self.transport.send(event) {
            Ok(()) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let failed = self.counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, failed, "span forward failed");
                Err(e)
            }
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}
