//! Physical heralding protocol (MHP).
//!
//! Runs one attempt slot per cadence boundary. With no work queued it
//! raises `Trigger` at the boundary; when the link layer calls `do_task` it
//! emits a photon immediately and reports the heralded result as
//! `Response`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{AttemptOutcome, QubitHandle};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{
    Header, Message, MessagePayload, PortName, Protocol, ProtocolContext, ProtocolId, Resolution, Signal,
    SignalName, Waitable,
};

/// What the physical layer reports for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeraldResult {
    Outcome(AttemptOutcome),
    /// The herald did not carry a photon outcome.
    Failure,
}

impl HeraldResult {
    pub fn is_entangled(self) -> bool {
        matches!(self, HeraldResult::Outcome(o) if o.is_entangled())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhpState {
    Idle,
    AwaitingCadence,
    Emitting,
    AwaitingOutcome { position: usize },
}

// ── QuantumMemory ─────────────────────────────────────────────────────

/// Local memory slots. Slot 0 holds the emitter, so the qubit for queue
/// position `p` lives in slot `p + 1`.
#[derive(Debug, Clone, Default)]
pub struct QuantumMemory {
    slots: BTreeMap<usize, QubitHandle>,
}

impl QuantumMemory {
    pub fn slot_for(position: usize) -> usize {
        position + 1
    }

    /// Store `qubit` for `position`, returning whatever was there before.
    pub fn store(&mut self, position: usize, qubit: QubitHandle) -> Option<QubitHandle> {
        self.slots.insert(Self::slot_for(position), qubit)
    }

    pub fn get(&self, position: usize) -> Option<QubitHandle> {
        self.slots.get(&Self::slot_for(position)).copied()
    }

    pub fn take(&mut self, position: usize) -> Option<QubitHandle> {
        self.slots.remove(&Self::slot_for(position))
    }

    pub fn occupied(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MhpStats {
    pub triggers: u64,
    pub emissions: u64,
    pub entangled: u64,
    pub failures: u64,
}

// ── Mhp ───────────────────────────────────────────────────────────────

pub struct Mhp {
    step: u64,
    state: MhpState,
    memory: QuantumMemory,
    /// Apply a Pauli correction on Ψ− so both ends hold Ψ+.
    corrects: bool,
    stats: MhpStats,
}

impl Mhp {
    pub fn new(step: u64) -> Self {
        Mhp {
            step,
            state: MhpState::Idle,
            memory: QuantumMemory::default(),
            corrects: false,
            stats: MhpStats::default(),
        }
    }

    /// Make this node the one that corrects Ψ− outcomes.
    pub fn corrector(mut self) -> Self {
        self.corrects = true;
        self
    }

    pub fn state(&self) -> MhpState {
        self.state
    }

    pub fn stats(&self) -> MhpStats {
        self.stats
    }

    pub fn memory(&self) -> &QuantumMemory {
        &self.memory
    }

    /// Ask the physical layer `mhp` to use the current slot for `position`.
    pub fn do_task(ctx: &mut ProtocolContext<'_, '_>, mhp: ProtocolId, position: usize) -> LinkResult<()> {
        ctx.raise_on(mhp, Signal::DoTask { position })
    }

    fn await_cadence(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let next = ctx.now().next_boundary(self.step).ok_or(LinkError::TimeOverflow)?;
        let timer = ctx.schedule_timer(next)?;
        let me = ctx.id();
        ctx.wait_any(vec![
            Waitable::Timer(timer),
            Waitable::signal(me, SignalName::DoTask),
        ])?;
        self.state = MhpState::AwaitingCadence;
        Ok(())
    }

    fn emit(&mut self, ctx: &mut ProtocolContext<'_, '_>, position: usize) -> LinkResult<()> {
        self.state = MhpState::Emitting;
        let (local, photon) = ctx.backend().new_pair();
        if let Some(stale) = self.memory.store(position, local) {
            ctx.backend().discard(stale);
        }
        self.stats.emissions += 1;
        debug!(me = %ctx.id(), position, "emitting photon");

        ctx.send(PortName::QuantumOut, Message::photon(photon))?;
        ctx.wait_any(vec![Waitable::Input(PortName::Herald)])?;
        self.state = MhpState::AwaitingOutcome { position };
        Ok(())
    }

    fn on_herald(&mut self, ctx: &mut ProtocolContext<'_, '_>, position: usize, message: Message) -> LinkResult<()> {
        let result = match (message.header, message.payload) {
            (Header::PhotonOutcome, MessagePayload::Outcome(outcome)) => HeraldResult::Outcome(outcome),
            _ => HeraldResult::Failure,
        };

        match result {
            HeraldResult::Outcome(outcome) if outcome.is_entangled() => {
                self.stats.entangled += 1;
                if self.corrects && outcome == AttemptOutcome::EntangledPsiMinus {
                    if let Some(qubit) = self.memory.get(position) {
                        ctx.backend().apply_correction(qubit, outcome);
                    }
                }
            }
            _ => {
                self.stats.failures += 1;
                if let Some(qubit) = self.memory.take(position) {
                    ctx.backend().discard(qubit);
                }
            }
        }

        debug!(me = %ctx.id(), position, ?result, "herald received");
        ctx.raise(Signal::Response { result, position })?;
        self.await_cadence(ctx)
    }
}

impl Protocol for Mhp {
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        if self.step == 0 {
            return Err(LinkError::Configuration(format!("{} has a zero cadence", ctx.id())));
        }
        self.await_cadence(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()> {
        match self.state {
            MhpState::AwaitingCadence => {
                // Work wins over idle signalling when both are ready.
                let task = resolved.iter().find_map(|r| match r.signal() {
                    Some(Signal::DoTask { position }) => Some(*position),
                    _ => None,
                });
                match task {
                    Some(position) => self.emit(ctx, position),
                    None => {
                        self.stats.triggers += 1;
                        ctx.raise(Signal::Trigger)?;
                        self.await_cadence(ctx)
                    }
                }
            }
            MhpState::AwaitingOutcome { position } => {
                let herald = resolved.into_iter().find_map(|r| match r {
                    Resolution::Input { port: PortName::Herald, message } => Some(message),
                    _ => None,
                });
                match herald {
                    Some(message) => self.on_herald(ctx, position, message),
                    None => Ok(()),
                }
            }
            MhpState::Idle | MhpState::Emitting => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mhp"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reserves_emitter_slot() {
        let mut mem = QuantumMemory::default();
        assert_eq!(QuantumMemory::slot_for(0), 1);
        assert!(mem.store(0, QubitHandle::new(9)).is_none());
        assert_eq!(mem.store(0, QubitHandle::new(10)), Some(QubitHandle::new(9)));
        assert_eq!(mem.get(0), Some(QubitHandle::new(10)));
        assert_eq!(mem.take(0), Some(QubitHandle::new(10)));
        assert_eq!(mem.occupied(), 0);
    }

    #[test]
    fn test_failure_never_counts() {
        assert!(!HeraldResult::Failure.is_entangled());
        assert!(!HeraldResult::Outcome(AttemptOutcome::Timeout).is_entangled());
        assert!(HeraldResult::Outcome(AttemptOutcome::EntangledPsiMinus).is_entangled());
    }
}
