//! In-memory FIFO of events waiting for delivery

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::types::Event;

/// Ordered, unbounded buffer shared by the producer and the dispatcher
///
/// The lock is only held for the duration of a single push or drain, never
/// across a delivery attempt.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail
    pub fn enqueue(&self, event: Event) {
        self.events.lock().push_back(event);
    }

    /// Remove and return up to `max` events from the head
    pub fn dequeue_batch(&self, max: usize) -> Vec<Event> {
        let mut events = self.events.lock();
        let n = max.min(events.len());
        events.drain(..n).collect()
    }

    /// Put events back at the head, keeping their relative order
    pub fn requeue_front(&self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }
        let mut events = self.events.lock();
        for event in batch.into_iter().rev() {
            events.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
