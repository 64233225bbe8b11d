//! Signals, waitables and resolutions.
//!
//! A protocol suspends by registering a set of `Waitable`s with
//! `ProtocolContext::wait_any`. Each waitable that becomes ready produces a
//! `Resolution`, and everything that resolves within the same instant is
//! handed back in one batch, in resolution order.

use crate::event::EventId;
use crate::link::{HeraldResult, OkResponse};
use crate::time::VirtualTime;

use super::id::ProtocolId;
use super::payload::{Message, PortName};

// ── Signals ───────────────────────────────────────────────────────────

/// Name of a signal, the key waiters register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalName {
    Trigger,
    Response,
    DoTask,
    RequestQueued,
    LinkOk,
}

impl std::fmt::Display for SignalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A signal together with its result value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A cadence slot passed with no work queued.
    Trigger,
    /// An attempt finished.
    Response { result: HeraldResult, position: usize },
    /// Use the current cadence slot for the pair at `position`.
    DoTask { position: usize },
    /// A request was appended to an EGP queue.
    RequestQueued,
    /// A pair was delivered to the requester.
    LinkOk(OkResponse),
}

impl Signal {
    pub fn name(&self) -> SignalName {
        match self {
            Signal::Trigger => SignalName::Trigger,
            Signal::Response { .. } => SignalName::Response,
            Signal::DoTask { .. } => SignalName::DoTask,
            Signal::RequestQueued => SignalName::RequestQueued,
            Signal::LinkOk(_) => SignalName::LinkOk,
        }
    }
}

// ── Waitables ─────────────────────────────────────────────────────────

/// A timer handle. The id is the id of the underlying `TimerFired` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) EventId);

impl TimerId {
    pub fn event_id(self) -> EventId {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waitable {
    Timer(TimerId),
    Signal { source: ProtocolId, name: SignalName },
    /// The next message arriving on one of the waiter's own ports.
    Input(PortName),
}

impl Waitable {
    pub fn signal(source: ProtocolId, name: SignalName) -> Self {
        Waitable::Signal { source, name }
    }
}

/// A waitable that became ready, with whatever it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Timer(TimerId),
    Signal { source: ProtocolId, signal: Signal },
    Input { port: PortName, message: Message },
}

impl Resolution {
    /// The signal carried by this resolution, if any.
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            Resolution::Signal { signal, .. } => Some(signal),
            _ => None,
        }
    }

    pub fn matches(&self, waitable: &Waitable) -> bool {
        match (self, waitable) {
            (Resolution::Timer(a), Waitable::Timer(b)) => a == b,
            (Resolution::Signal { source, signal }, Waitable::Signal { source: s, name }) => {
                source == s && signal.name() == *name
            }
            (Resolution::Input { port, .. }, Waitable::Input(p)) => port == p,
            _ => false,
        }
    }
}

/// An outstanding `wait_any` registration.
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitState {
    pub(crate) waitables: Vec<Waitable>,
    pub(crate) resolved: Vec<Resolution>,
    /// The pending `Wake` event, once something resolved.
    pub(crate) wake: Option<EventId>,
    pub(crate) since: VirtualTime,
}
