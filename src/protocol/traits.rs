//! `Protocol` trait and the context handed to every transition.

use crate::backend::QuantumBackend;
use crate::channel::Endpoint;
use crate::error::{LinkError, LinkResult};
use crate::event::EventType;
use crate::simulation::SimulationContext;
use crate::time::VirtualTime;

use super::id::ProtocolId;
use super::payload::{Message, PortName};
use super::runtime::Kernel;
use super::signal::{Resolution, Signal, TimerId, Waitable};

// ── Protocol ──────────────────────────────────────────────────────────

/// A cooperative state machine driven by the runtime.
///
/// A protocol runs only inside one of its transitions and suspends by
/// registering a `wait_any` before returning. The runtime calls `resume`
/// with every resolution that became ready at the same instant.
///
/// # Contract
///
/// Implementations **must**:
/// - Route every side effect through `ctx`.
/// - Be deterministic for equal inputs.
/// - Keep at most one wait registered; a new `wait_any` replaces the old one.
pub trait Protocol {
    /// Run once, at the time the runtime was started.
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()>;

    /// Continue after the registered wait resolved.
    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()>;

    /// A message arrived on one of this protocol's ports.
    ///
    /// The default hands it to a matching `Waitable::Input` or buffers it
    /// until one is registered. Protocols that react to every message as it
    /// arrives override this.
    fn on_input(&mut self, ctx: &mut ProtocolContext<'_, '_>, port: PortName, message: Message) -> LinkResult<()> {
        ctx.deliver(port, message)
    }

    /// Short name for traces and logs.
    fn name(&self) -> &'static str;

    /// Downcast support, required for `ProtocolRuntime::protocol::<T>()`.
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

// ── ProtocolContext ───────────────────────────────────────────────────

/// Everything a protocol may touch during a transition: the clock and
/// scheduler, the shared kernel (waits, timers, channels, backend) and its
/// own id.
pub struct ProtocolContext<'a, 's> {
    pub(crate) sim: &'a mut SimulationContext<'s>,
    pub(crate) kernel: &'a mut Kernel,
    pub(crate) me: ProtocolId,
}

impl<'a, 's> ProtocolContext<'a, 's> {
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.sim.now()
    }

    /// Id of the protocol currently running.
    #[inline]
    pub fn id(&self) -> ProtocolId {
        self.me
    }

    /// Arm a timer that becomes ready when the clock reaches `at`.
    ///
    /// Fails with `InvalidTime` if `at` is in the past.
    pub fn schedule_timer(&mut self, at: VirtualTime) -> LinkResult<TimerId> {
        let event = self.sim.schedule_at(at, EventType::TimerFired { protocol: self.me })?;
        let timer = TimerId(event);
        self.kernel.timers.insert(timer, self.me);
        Ok(timer)
    }

    /// Arm a timer `delay` ticks from now.
    pub fn timer_after(&mut self, delay: u64) -> LinkResult<TimerId> {
        let at = self.now().plus(delay).ok_or(LinkError::TimeOverflow)?;
        self.schedule_timer(at)
    }

    /// Drop a timer before it fires. Returns `false` if it already fired.
    pub fn cancel_timer(&mut self, timer: TimerId) -> bool {
        self.kernel.cancel_timer(self.sim, timer)
    }

    /// Suspend until at least one of `waitables` resolves.
    ///
    /// Replaces any earlier registration of this protocol, dropping its
    /// unresolved timers. Buffered input on a requested port resolves at
    /// once.
    pub fn wait_any(&mut self, waitables: Vec<Waitable>) -> LinkResult<()> {
        self.kernel.wait_any(self.sim, self.me, waitables)
    }

    /// Drop the current registration, if any.
    pub fn clear_wait(&mut self) {
        self.kernel.clear_wait(self.sim, self.me);
    }

    /// Raise a signal owned by this protocol.
    pub fn raise(&mut self, signal: Signal) -> LinkResult<()> {
        self.kernel.raise(self.sim, self.me, signal)
    }

    /// Raise a signal on behalf of `target`. This is how one protocol pokes
    /// another's internal signal (e.g. `do_task` on the physical layer).
    pub fn raise_on(&mut self, target: ProtocolId, signal: Signal) -> LinkResult<()> {
        self.kernel.raise(self.sim, target, signal)
    }

    /// Send `message` out of one of this protocol's ports.
    ///
    /// The message leaves now; the channel attached to the port decides
    /// when it arrives.
    pub fn send(&mut self, port: PortName, message: Message) -> LinkResult<()> {
        let from = Endpoint::new(self.me, port);
        self.sim.schedule_after(0, EventType::MessageSend { from, message })?;
        Ok(())
    }

    /// Hand an arrived message to a matching `Input` wait, or buffer it.
    pub fn deliver(&mut self, port: PortName, message: Message) -> LinkResult<()> {
        self.kernel.deliver(self.sim, self.me, port, message)
    }

    /// Messages buffered on `port`.
    pub fn buffered(&self, port: PortName) -> usize {
        self.kernel.buffered(self.me, port)
    }

    /// The shared quantum backend.
    pub fn backend(&mut self) -> &mut dyn QuantumBackend {
        self.kernel.backend.as_mut()
    }
}
