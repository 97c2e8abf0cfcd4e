//! Fixed-capacity priority reservoir for span events.
//!
//! Entries are `(priority, created_at, event)` triples kept in a min-heap
//! ordered by priority, then arrival sequence. While below capacity every
//! event is admitted. Once full, an incoming event replaces the heap
//! minimum only if its priority is strictly greater; otherwise it is
//! dropped. Among equal minimum priorities the oldest entry is the one
//! evicted.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use apm_core::SpanEvent;
use tracing::debug;

use crate::error::{EventsError, EventsResult};

/// Anything carrying a sampling priority.
pub trait Prioritized {
    fn priority(&self) -> f64;
}

impl Prioritized for SpanEvent {
    fn priority(&self) -> f64 {
        self.priority
    }
}

struct Entry<T> {
    priority: f64,
    created_at: u64,
    event: T,
}

// Ordering ignores the payload. Priorities reaching the heap are finite
// with no negative zero, so `total_cmp` agrees with numeric order.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(self.created_at.cmp(&other.created_at))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

pub struct PriorityEventBuffer<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    capacity: usize,
    /// Events offered since the last drain, admitted or not.
    num_seen: u64,
}

impl<T: Prioritized> PriorityEventBuffer<T> {
    pub fn new(capacity: usize) -> EventsResult<Self> {
        if capacity == 0 {
            return Err(EventsError::ZeroCapacity);
        }
        Ok(Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            num_seen: 0,
        })
    }

    /// Offer an event. Capacity pressure is resolved by eviction, never
    /// by failing.
    ///
    /// An event whose priority is NaN or infinite is counted as seen and
    /// dropped.
    pub fn put(&mut self, event: T) {
        let priority = event.priority();
        let created_at = self.num_seen;
        self.num_seen += 1;

        if !priority.is_finite() {
            debug!(priority, "span event with non-finite priority dropped");
            return;
        }

        let entry = Entry {
            // -0.0 sorts below 0.0 under total_cmp.
            priority: if priority == 0.0 { 0.0 } else { priority },
            created_at,
            event,
        };

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(entry));
            return;
        }

        if let Some(mut min) = self.heap.peek_mut() {
            if entry.priority > min.0.priority {
                // Replacing through PeekMut re-sifts on drop.
                *min = Reverse(entry);
            }
        }
    }

    /// Remove and return every held event, in no particular order, and
    /// reset the buffer to its freshly constructed state.
    pub fn drain(&mut self) -> Vec<T> {
        self.num_seen = 0;
        std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .map(|Reverse(entry)| entry.event)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_seen(&self) -> u64 {
        self.num_seen
    }

    /// Events offered but not currently held.
    pub fn num_dropped(&self) -> u64 {
        self.num_seen - self.heap.len() as u64
    }

    /// Lowest priority currently held, i.e. the next eviction candidate.
    pub fn min_priority(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(entry)| entry.priority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|Reverse(entry)| &entry.event)
    }
}

/// Result of draining a shared buffer.
#[derive(Debug)]
pub struct EventHarvest<T> {
    pub events: Vec<T>,
    pub num_seen: u64,
    pub num_dropped: u64,
    pub capacity: usize,
}

/// Process-wide buffer behind a single mutex.
///
/// A poisoned lock is recovered and its flag cleared, as for the shared
/// metrics table: every mutation leaves the heap valid.
pub struct SharedEventBuffer<T> {
    inner: Arc<Mutex<PriorityEventBuffer<T>>>,
}

impl<T> Clone for SharedEventBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Prioritized> SharedEventBuffer<T> {
    pub fn new(capacity: usize) -> EventsResult<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(PriorityEventBuffer::new(capacity)?)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PriorityEventBuffer<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            self.inner.clear_poison();
            poisoned.into_inner()
        })
    }

    pub fn put(&self, event: T) {
        self.lock().put(event);
    }

    /// Offer a batch under one lock acquisition.
    pub fn put_all(&self, events: impl IntoIterator<Item = T>) {
        let mut buffer = self.lock();
        for event in events {
            buffer.put(event);
        }
    }

    pub fn drain(&self) -> Vec<T> {
        self.lock().drain()
    }

    /// Drain along with the seen/dropped counters of the closing period.
    pub fn harvest(&self) -> EventHarvest<T> {
        let mut buffer = self.lock();
        let num_seen = buffer.num_seen();
        let num_dropped = buffer.num_dropped();
        let capacity = buffer.capacity();
        let events = buffer.drain();
        drop(buffer);

        debug!(
            events = events.len(),
            num_seen, num_dropped, "event buffer harvested"
        );
        EventHarvest {
            events,
            num_seen,
            num_dropped,
            capacity,
        }
    }

    pub fn count(&self) -> usize {
        self.lock().count()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn num_seen(&self) -> u64 {
        self.lock().num_seen()
    }

    pub fn min_priority(&self) -> Option<f64> {
        self.lock().min_priority()
    }
}
