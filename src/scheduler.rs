//! Deterministic event scheduler.
//!
//! A `BinaryHeap` with reversed `Ord` on `Event` acts as a min-heap keyed by
//! `(scheduled_at, id)`. Cancellation is lazy: a cancelled id is remembered
//! and its event is discarded when it reaches the top of the heap, so a
//! dropped waitable never holds the clock back.

use std::collections::{BTreeSet, BinaryHeap};

use crate::event::{Event, EventId, EventIdGen, EventType};
use crate::time::VirtualTime;

/// Owns the pending events and the sequence generator.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Event>,
    id_gen: EventIdGen,
    /// Ids still in `queue` and not cancelled.
    pending: BTreeSet<EventId>,
    /// Ids still in `queue` but cancelled.
    cancelled: BTreeSet<EventId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `payload` at `at` and return its id.
    ///
    /// The scheduler does not know the current time; causality is checked by
    /// `SimulationContext::schedule_at`.
    pub fn schedule(&mut self, at: VirtualTime, payload: EventType) -> EventId {
        let id = self.id_gen.next_id();
        self.queue.push(Event::new(id, at, payload));
        self.pending.insert(id);
        id
    }

    /// Cancel a pending event. Returns `false` if it already fired or was
    /// already cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if self.pending.remove(&id) {
            self.cancelled.insert(id);
            true
        } else {
            false
        }
    }

    /// Whether `id` is still waiting to fire.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains(&id)
    }

    /// Pop the next live event (earliest time, lowest id).
    pub fn pop_next(&mut self) -> Option<Event> {
        self.discard_cancelled_head();
        let event = self.queue.pop()?;
        self.pending.remove(&event.id);
        Some(event)
    }

    /// Time of the next live event.
    pub fn peek_time(&mut self) -> Option<VirtualTime> {
        self.discard_cancelled_head();
        self.queue.peek().map(|e| e.scheduled_at)
    }

    /// Number of live (non-cancelled) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain all live events in dispatch order.
    pub fn drain_ordered(&mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len());
        while let Some(e) = self.pop_next() {
            events.push(e);
        }
        events
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(head) = self.queue.peek() {
            if !self.cancelled.remove(&head.id) {
                break;
            }
            self.queue.pop();
        }
    }
}
