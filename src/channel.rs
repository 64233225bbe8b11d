//! Fixed-delay point-to-point channels between protocol ports.
//!
//! Every message leaves through a `MessageSend` event. The `ChannelTable`
//! looks up the route attached to the sending port and the runtime schedules
//! the matching `MessageDelivery` after the route's delay. A fixed delay per
//! route keeps delivery in send order with no loss and no duplication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{PortName, ProtocolId};
use crate::time::VirtualTime;

/// Speed of light in fibre, km per second.
pub const FIBRE_SPEED_KM_PER_S: f64 = 200_000.0;

/// One-way propagation delay of `length_km` of fibre, in ns ticks.
pub fn fibre_delay(length_km: f64) -> u64 {
    (length_km / FIBRE_SPEED_KM_PER_S * 1e9).round() as u64
}

// ── Endpoint ──────────────────────────────────────────────────────────

/// A named port on a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: ProtocolId,
    pub port: PortName,
}

impl Endpoint {
    pub fn new(protocol: ProtocolId, port: PortName) -> Self {
        Endpoint { protocol, port }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.protocol, self.port)
    }
}

// ── Routes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Carries classical messages between link layers.
    Classical,
    /// Carries photons to the midpoint and heralds back.
    Quantum,
}

/// Where a message sent from an endpoint goes and how long it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub to: Endpoint,
    pub delay: u64,
    pub kind: ChannelKind,
}

/// A record of one routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLogEntry {
    pub time: VirtualTime,
    pub from: Endpoint,
    pub to: Endpoint,
    pub kind: ChannelKind,
}

/// Directed routes keyed by sending endpoint.
///
/// Transfers are always counted per kind; the full transfer log is only
/// kept after `enable_log`.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    routes: BTreeMap<Endpoint, Route>,
    classical: usize,
    quantum: usize,
    log: Option<Vec<ChannelLogEntry>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a one-way channel. A later call for the same `from` replaces
    /// the earlier route.
    pub fn connect(&mut self, from: Endpoint, to: Endpoint, delay: u64, kind: ChannelKind) {
        self.routes.insert(from, Route { to, delay, kind });
    }

    /// Attach a channel in both directions with the same delay.
    pub fn connect_duplex(&mut self, a: Endpoint, b: Endpoint, delay: u64, kind: ChannelKind) {
        self.connect(a, b, delay, kind);
        self.connect(b, a, delay, kind);
    }

    pub fn enable_log(&mut self) {
        if self.log.is_none() {
            self.log = Some(Vec::new());
        }
    }

    pub fn route(&self, from: Endpoint) -> Option<Route> {
        self.routes.get(&from).copied()
    }

    /// Look up the route for `from` and record the transfer.
    pub(crate) fn dispatch(&mut self, time: VirtualTime, from: Endpoint) -> Option<Route> {
        let route = self.route(from)?;
        match route.kind {
            ChannelKind::Classical => self.classical += 1,
            ChannelKind::Quantum => self.quantum += 1,
        }
        if let Some(log) = self.log.as_mut() {
            log.push(ChannelLogEntry {
                time,
                from,
                to: route.to,
                kind: route.kind,
            });
        }
        Some(route)
    }

    /// Routed messages in send order, if logging is enabled.
    pub fn log(&self) -> &[ChannelLogEntry] {
        self.log.as_deref().unwrap_or_default()
    }

    /// Messages routed over channels of `kind`.
    pub fn count(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Classical => self.classical,
            ChannelKind::Quantum => self.quantum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(p: u64, port: PortName) -> Endpoint {
        Endpoint::new(ProtocolId::new(p), port)
    }

    #[test]
    fn test_fibre_delay_matches_two_km_link() {
        // 2 km of fibre between the nodes, 1 km to the midpoint.
        assert_eq!(fibre_delay(2.0), 10_000);
        assert_eq!(fibre_delay(1.0), 5_000);
        assert_eq!(fibre_delay(0.0), 0);
    }

    #[test]
    fn test_duplex_routes_both_ways() {
        let mut table = ChannelTable::new();
        let a = ep(1, PortName::Classical);
        let b = ep(2, PortName::Classical);
        table.connect_duplex(a, b, 50, ChannelKind::Classical);

        assert_eq!(table.route(a).unwrap().to, b);
        assert_eq!(table.route(b).unwrap().to, a);
        assert_eq!(table.route(a).unwrap().delay, 50);
    }

    #[test]
    fn test_unrouted_endpoint() {
        let mut table = ChannelTable::new();
        table.enable_log();
        assert!(table.dispatch(VirtualTime::ZERO, ep(9, PortName::QuantumOut)).is_none());
        assert!(table.log().is_empty());
        assert_eq!(table.count(ChannelKind::Quantum), 0);
    }

    #[test]
    fn test_counts_kept_without_log() {
        let mut table = ChannelTable::new();
        let a = ep(1, PortName::Classical);
        let b = ep(2, PortName::Classical);
        table.connect_duplex(a, b, 10, ChannelKind::Classical);

        for t in 0..100 {
            table.dispatch(VirtualTime::new(t), a).unwrap();
        }
        assert_eq!(table.count(ChannelKind::Classical), 100);
        assert!(table.log().is_empty());
    }

    #[test]
    fn test_dispatch_logs_in_order() {
        let mut table = ChannelTable::new();
        table.enable_log();
        let a = ep(1, PortName::QuantumOut);
        let b = ep(2, PortName::Herald);
        table.connect(a, b, 5, ChannelKind::Quantum);

        table.dispatch(VirtualTime::new(1), a).unwrap();
        table.dispatch(VirtualTime::new(3), a).unwrap();

        assert_eq!(table.count(ChannelKind::Quantum), 2);
        assert_eq!(table.count(ChannelKind::Classical), 0);
        assert_eq!(table.log()[1].time, VirtualTime::new(3));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(ep(3, PortName::Classical).to_string(), "P3.classical");
    }
}
