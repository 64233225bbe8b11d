//! Midpoint heralding station.
//!
//! Photons from the two sides arrive independently. The first arrival opens
//! a window `[t0, t0 + W)`; a photon from the other side inside the window
//! is measured jointly with the first and both senders get the outcome. A
//! window that closes with one photon reports `Timeout` to that side only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{AttemptOutcome, QubitHandle};
use crate::error::LinkResult;
use crate::protocol::{
    Message, MessagePayload, PortName, Protocol, ProtocolContext, Resolution, TimerId, Waitable,
};
use crate::time::VirtualTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => write!(f, "a"),
            Side::B => write!(f, "b"),
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    opened_at: VirtualTime,
    arrivals: BTreeMap<Side, (VirtualTime, QubitHandle)>,
    close_timer: TimerId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidpointStats {
    pub arrivals: u64,
    pub joint_measurements: u64,
    pub timeouts: u64,
}

pub struct MidpointStation {
    window_length: u64,
    open: Option<Window>,
    stats: MidpointStats,
}

impl MidpointStation {
    pub fn new(window_length: u64) -> Self {
        MidpointStation {
            window_length,
            open: None,
            stats: MidpointStats::default(),
        }
    }

    pub fn stats(&self) -> MidpointStats {
        self.stats
    }

    pub fn window_length(&self) -> u64 {
        self.window_length
    }

    /// Whether a window is currently collecting arrivals.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn arrive(&mut self, ctx: &mut ProtocolContext<'_, '_>, side: Side, photon: QubitHandle) -> LinkResult<()> {
        self.stats.arrivals += 1;
        let now = ctx.now();

        if let Some(window) = self.open.as_mut() {
            let in_window = now == window.opened_at
                || now
                    .duration_since(window.opened_at)
                    .is_some_and(|elapsed| elapsed < self.window_length);
            if in_window && !window.arrivals.contains_key(&side) {
                window.arrivals.insert(side, (now, photon));
                if window.arrivals.len() == 2 {
                    return self.resolve(ctx);
                }
                return Ok(());
            }
            // Late or repeated arrival: the old attempt is over.
            self.time_out(ctx)?;
        }
        self.open_window(ctx, side, photon)
    }

    fn open_window(&mut self, ctx: &mut ProtocolContext<'_, '_>, side: Side, photon: QubitHandle) -> LinkResult<()> {
        let now = ctx.now();
        let close_timer = ctx.timer_after(self.window_length)?;
        ctx.wait_any(vec![Waitable::Timer(close_timer)])?;
        self.open = Some(Window {
            opened_at: now,
            arrivals: BTreeMap::from([(side, (now, photon))]),
            close_timer,
        });
        debug!(%side, opened_at = %now, "midpoint window opened");
        Ok(())
    }

    fn resolve(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let Some(window) = self.open.take() else {
            return Ok(());
        };
        ctx.clear_wait();

        let (Some(&(_, a)), Some(&(_, b))) = (window.arrivals.get(&Side::A), window.arrivals.get(&Side::B)) else {
            return Ok(());
        };
        let outcome = ctx.backend().measure_joint(a, b);
        self.stats.joint_measurements += 1;
        debug!(%outcome, opened_at = %window.opened_at, "midpoint joint measurement");

        for side in window.arrivals.keys() {
            ctx.send(PortName::Side(*side), Message::photon_outcome(outcome))?;
        }
        Ok(())
    }

    /// Close the open window with one photon in it.
    fn time_out(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let Some(window) = self.open.take() else {
            return Ok(());
        };
        ctx.clear_wait();
        self.stats.timeouts += 1;

        for (side, (arrived_at, photon)) in &window.arrivals {
            warn!(%side, arrived_at = %arrived_at, "midpoint window closed without a partner photon");
            ctx.backend().discard(*photon);
            ctx.send(PortName::Side(*side), Message::photon_outcome(AttemptOutcome::Timeout))?;
        }
        Ok(())
    }
}

impl Protocol for MidpointStation {
    fn start(&mut self, _ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        Ok(())
    }

    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()> {
        let expired = self.open.as_ref().is_some_and(|w| {
            resolved.contains(&Resolution::Timer(w.close_timer))
        });
        if expired {
            self.time_out(ctx)?;
        }
        Ok(())
    }

    fn on_input(&mut self, ctx: &mut ProtocolContext<'_, '_>, port: PortName, message: Message) -> LinkResult<()> {
        match (port, message.payload) {
            (PortName::Side(side), MessagePayload::Photon(photon)) => self.arrive(ctx, side, photon),
            (port, payload) => {
                debug!(%port, %payload, "midpoint ignored non-photon input");
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "midpoint"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
