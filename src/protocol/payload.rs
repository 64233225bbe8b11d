//! Ports, message headers and payloads.

use serde::{Deserialize, Serialize};

use crate::backend::{AttemptOutcome, QubitHandle};
use crate::link::Side;

// ── PortName ──────────────────────────────────────────────────────────

/// A named input/output port on a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PortName {
    /// Link-layer synchronisation with the peer EGP.
    Classical,
    /// Outbound photons towards the midpoint.
    QuantumOut,
    /// Heralded outcomes coming back from the midpoint.
    Herald,
    /// One of the midpoint's two sides.
    Side(Side),
}

impl std::fmt::Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortName::Classical => write!(f, "classical"),
            PortName::QuantumOut => write!(f, "quantum_out"),
            PortName::Herald => write!(f, "herald"),
            PortName::Side(side) => write!(f, "side_{}", side),
        }
    }
}

// ── Header ────────────────────────────────────────────────────────────

/// Message tag. Receivers dispatch on it before looking at the payload, so a
/// sync message can never be mistaken for a herald.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Photon,
    PhotonOutcome,
    RequestSync,
    Plain,
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Header::Photon => "photon",
            Header::PhotonOutcome => "photon_outcome",
            Header::RequestSync => "request_sync",
            Header::Plain => "plain",
        };
        f.write_str(tag)
    }
}

// ── MessagePayload ────────────────────────────────────────────────────

/// Body of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Empty,
    /// Raw bytes (the sync codec puts JSON here).
    Data(Vec<u8>),
    Text(String),
    /// A transmitted qubit travelling to the midpoint.
    Photon(QubitHandle),
    /// A midpoint verdict.
    Outcome(AttemptOutcome),
}

impl std::fmt::Display for MessagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessagePayload::Empty => write!(f, "Empty"),
            MessagePayload::Data(d) => write!(f, "Data({} bytes)", d.len()),
            MessagePayload::Text(s) => write!(f, "Text({:?})", s),
            MessagePayload::Photon(q) => write!(f, "Photon({})", q),
            MessagePayload::Outcome(o) => write!(f, "Outcome({})", o),
        }
    }
}

// ── Message ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(header: Header, payload: MessagePayload) -> Self {
        Message { header, payload }
    }

    pub fn photon(qubit: QubitHandle) -> Self {
        Message::new(Header::Photon, MessagePayload::Photon(qubit))
    }

    pub fn photon_outcome(outcome: AttemptOutcome) -> Self {
        Message::new(Header::PhotonOutcome, MessagePayload::Outcome(outcome))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Message::new(Header::Plain, MessagePayload::Text(text.into()))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.header, self.payload)
    }
}
