//! Event records for the discrete-event kernel.
//!
//! Every effect in the simulation is an `Event` placed on the scheduler's
//! priority queue and dispatched in `(time, id)` order.

use std::cmp::Ordering;

use crate::channel::Endpoint;
use crate::link::LinkRequest;
use crate::protocol::{Message, ProtocolId};
use crate::time::VirtualTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// A strictly increasing event sequence number.
///
/// Two events scheduled for the same `VirtualTime` are ordered by their
/// `EventId`, which is their insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// Monotonic event-ID generator, one per scheduler.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }
}

// ── Event Type ────────────────────────────────────────────────────────

/// The payload of an event.
///
/// `Noop` and `Log` are kernel-level markers. The remaining variants drive
/// protocols: lifecycle (`Start`, `Wake`), timers, the two-phase message path
/// (`MessageSend` is routed by the channel table into a delayed
/// `MessageDelivery`) and requester submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    /// A no-op event.
    Noop,

    /// A trace marker.
    Log(String),

    /// Run a protocol's `start` transition.
    Start { protocol: ProtocolId },

    /// Deliver the accumulated resolution set of a suspended protocol.
    Wake { protocol: ProtocolId },

    /// A timer owned by `protocol` has expired. The timer id is the event id.
    TimerFired { protocol: ProtocolId },

    /// A message leaves `from`; the channel table decides where and when it
    /// arrives.
    MessageSend { from: Endpoint, message: Message },

    /// A message arrives at `to`.
    MessageDelivery { to: Endpoint, message: Message },

    /// The requester hands a request to an EGP.
    SubmitRequest { egp: ProtocolId, request: LinkRequest },
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Noop => write!(f, "Noop"),
            EventType::Log(msg) => write!(f, "Log({})", msg),
            EventType::Start { protocol } => write!(f, "Start({})", protocol),
            EventType::Wake { protocol } => write!(f, "Wake({})", protocol),
            EventType::TimerFired { protocol } => write!(f, "Timer({})", protocol),
            EventType::MessageSend { from, message } => {
                write!(f, "Send({}, {})", from, message.header)
            }
            EventType::MessageDelivery { to, message } => {
                write!(f, "Deliver({}, {})", to, message.header)
            }
            EventType::SubmitRequest { egp, request } => {
                write!(f, "Submit({}, {})", egp, request.kind())
            }
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single simulation event, owned by the scheduler until it fires.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub scheduled_at: VirtualTime,
    pub payload: EventType,
}

impl Event {
    pub fn new(id: EventId, scheduled_at: VirtualTime, payload: EventType) -> Self {
        Event {
            id,
            scheduled_at,
            payload,
        }
    }
}

/// Smallest `(scheduled_at, id)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .scheduled_at
            .cmp(&self.scheduled_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_monotonic() {
        let mut gen = EventIdGen::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert!(a < b);
    }

    #[test]
    fn test_event_ordering_tiebreak_by_id() {
        let e1 = Event::new(EventId::new(0), VirtualTime::new(10), EventType::Noop);
        let e2 = Event::new(
            EventId::new(1),
            VirtualTime::new(10),
            EventType::Wake { protocol: ProtocolId::new(3) },
        );
        // Same time: the earlier id must pop first, i.e. compare greater.
        assert!(e1 > e2);
    }

    #[test]
    fn test_event_display() {
        let e = EventType::TimerFired { protocol: ProtocolId::new(4) };
        assert_eq!(e.to_string(), "Timer(P4)");
        assert_eq!(EventType::Log("x".into()).to_string(), "Log(x)");
    }
}
