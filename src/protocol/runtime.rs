//! `ProtocolRuntime` owns every protocol and drives them from scheduler
//! events; `Kernel` holds the state shared between protocols (waits,
//! timers, buffered input, channels, the quantum backend).

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use crate::backend::QuantumBackend;
use crate::channel::{ChannelKind, ChannelTable, Endpoint};
use crate::error::{LinkError, LinkResult};
use crate::event::{Event, EventId, EventType};
use crate::link::{Egp, LinkRequest, RequestExtras};
use crate::simulation::{EventHandler, Simulation, SimulationContext};
use crate::time::VirtualTime;

use super::id::ProtocolId;
use super::payload::{Message, PortName};
use super::signal::{Resolution, Signal, TimerId, WaitState, Waitable};
use super::trace::{Activity, TraceEntry};
use super::traits::{Protocol, ProtocolContext};

// ── Kernel ────────────────────────────────────────────────────────────

/// Shared suspension machinery.
///
/// A resolution is appended to the waiter's `WaitState` and a single `Wake`
/// event is scheduled at the current instant. Anything else that resolves
/// for the same waiter before that wake fires joins the same batch.
pub struct Kernel {
    pub(crate) waits: BTreeMap<ProtocolId, WaitState>,
    pub(crate) timers: BTreeMap<TimerId, ProtocolId>,
    inboxes: BTreeMap<(ProtocolId, PortName), VecDeque<Message>>,
    pub(crate) channels: ChannelTable,
    pub(crate) backend: Box<dyn QuantumBackend>,
}

impl Kernel {
    fn new(backend: Box<dyn QuantumBackend>) -> Self {
        Kernel {
            waits: BTreeMap::new(),
            timers: BTreeMap::new(),
            inboxes: BTreeMap::new(),
            channels: ChannelTable::new(),
            backend,
        }
    }

    pub(crate) fn wait_any(
        &mut self,
        sim: &mut SimulationContext<'_>,
        me: ProtocolId,
        waitables: Vec<Waitable>,
    ) -> LinkResult<()> {
        self.clear_wait(sim, me);

        let ports: Vec<PortName> = waitables
            .iter()
            .filter_map(|w| match w {
                Waitable::Input(port) => Some(*port),
                _ => None,
            })
            .collect();

        self.waits.insert(
            me,
            WaitState {
                waitables,
                resolved: Vec::new(),
                wake: None,
                since: sim.now(),
            },
        );

        for port in ports {
            let buffered = self.inboxes.get_mut(&(me, port)).and_then(|q| q.pop_front());
            if let Some(message) = buffered {
                self.resolve(sim, me, Resolution::Input { port, message })?;
            }
        }
        Ok(())
    }

    /// Drop `me`'s registration. Unresolved timers are cancelled and
    /// resolved input goes back to the front of its inbox.
    pub(crate) fn clear_wait(&mut self, sim: &mut SimulationContext<'_>, me: ProtocolId) {
        let Some(old) = self.waits.remove(&me) else {
            return;
        };
        if let Some(wake) = old.wake {
            sim.cancel(wake);
        }
        self.drop_timers(sim, &old);
        for resolution in old.resolved.into_iter().rev() {
            if let Resolution::Input { port, message } = resolution {
                self.inboxes.entry((me, port)).or_default().push_front(message);
            }
        }
    }

    /// Cancel the timers of `state` that did not resolve.
    fn drop_timers(&mut self, sim: &mut SimulationContext<'_>, state: &WaitState) {
        for waitable in &state.waitables {
            if let Waitable::Timer(timer) = waitable {
                if !state.resolved.contains(&Resolution::Timer(*timer)) {
                    self.cancel_timer(sim, *timer);
                }
            }
        }
    }

    pub(crate) fn cancel_timer(&mut self, sim: &mut SimulationContext<'_>, timer: TimerId) -> bool {
        self.timers.remove(&timer);
        sim.cancel(timer.event_id())
    }

    /// Append a resolution to `waiter`'s wait and make sure a wake is pending.
    /// Does nothing if `waiter` is not suspended.
    fn resolve(
        &mut self,
        sim: &mut SimulationContext<'_>,
        waiter: ProtocolId,
        resolution: Resolution,
    ) -> LinkResult<()> {
        let Some(wait) = self.waits.get_mut(&waiter) else {
            return Ok(());
        };
        wait.resolved.push(resolution);
        if wait.wake.is_none() {
            wait.wake = Some(sim.schedule_after(0, EventType::Wake { protocol: waiter })?);
        }
        Ok(())
    }

    /// Resolve every waiter registered on `(source, signal.name())`.
    /// A signal nobody waits for is lost.
    pub(crate) fn raise(
        &mut self,
        sim: &mut SimulationContext<'_>,
        source: ProtocolId,
        signal: Signal,
    ) -> LinkResult<()> {
        let key = Waitable::signal(source, signal.name());
        let waiters: Vec<ProtocolId> = self
            .waits
            .iter()
            .filter(|(_, w)| w.waitables.contains(&key))
            .map(|(id, _)| *id)
            .collect();

        if waiters.is_empty() {
            trace!(%source, signal = %signal.name(), "signal raised with no waiters");
        }
        for waiter in waiters {
            self.resolve(
                sim,
                waiter,
                Resolution::Signal {
                    source,
                    signal: signal.clone(),
                },
            )?;
        }
        Ok(())
    }

    pub(crate) fn deliver(
        &mut self,
        sim: &mut SimulationContext<'_>,
        me: ProtocolId,
        port: PortName,
        message: Message,
    ) -> LinkResult<()> {
        // One message per port per batch; the rest wait in the inbox.
        let wanted = self.waits.get(&me).is_some_and(|w| {
            w.waitables.contains(&Waitable::Input(port))
                && !w
                    .resolved
                    .iter()
                    .any(|r| matches!(r, Resolution::Input { port: p, .. } if *p == port))
        });
        if wanted {
            self.resolve(sim, me, Resolution::Input { port, message })
        } else {
            self.inboxes.entry((me, port)).or_default().push_back(message);
            Ok(())
        }
    }

    pub(crate) fn buffered(&self, me: ProtocolId, port: PortName) -> usize {
        self.inboxes.get(&(me, port)).map_or(0, VecDeque::len)
    }

    fn timer_fired(
        &mut self,
        sim: &mut SimulationContext<'_>,
        owner: ProtocolId,
        timer: TimerId,
    ) -> LinkResult<()> {
        if self.timers.remove(&timer).is_none() {
            return Ok(());
        }
        let waited = self
            .waits
            .get(&owner)
            .is_some_and(|w| w.waitables.contains(&Waitable::Timer(timer)));
        if waited {
            self.resolve(sim, owner, Resolution::Timer(timer))?;
        }
        Ok(())
    }

    /// Take `owner`'s wait if `wake` is its pending wake event.
    fn take_wake(&mut self, owner: ProtocolId, wake: EventId) -> Option<WaitState> {
        if self.waits.get(&owner)?.wake != Some(wake) {
            return None;
        }
        self.waits.remove(&owner)
    }
}

// ── ProtocolRuntime ───────────────────────────────────────────────────

/// Manages the registered protocols and dispatches events to them.
///
/// Implements [`EventHandler`] so it can be passed directly to
/// [`Simulation::run`]. `MessageSend` events go through the channel table
/// before delivery.
pub struct ProtocolRuntime {
    protocols: BTreeMap<ProtocolId, Box<dyn Protocol>>,
    kernel: Kernel,
    /// Every transition run, once enabled.
    trace: Option<Vec<TraceEntry>>,
}

impl ProtocolRuntime {
    pub fn new(backend: Box<dyn QuantumBackend>) -> Self {
        ProtocolRuntime {
            protocols: BTreeMap::new(),
            kernel: Kernel::new(backend),
            trace: None,
        }
    }

    /// Record every transition and every routed message from now on.
    pub fn enable_trace(&mut self) {
        if self.trace.is_none() {
            self.trace = Some(Vec::new());
        }
        self.kernel.channels.enable_log();
    }

    /// Transitions recorded since `enable_trace`; empty if it was never
    /// called.
    pub fn trace(&self) -> &[TraceEntry] {
        self.trace.as_deref().unwrap_or_default()
    }

    /// Register a protocol under `id`.
    pub fn register(&mut self, id: ProtocolId, protocol: Box<dyn Protocol>) -> LinkResult<()> {
        if self.protocols.contains_key(&id) {
            return Err(LinkError::ProtocolAlreadyRegistered(id));
        }
        debug!(%id, name = protocol.name(), "registered protocol");
        self.protocols.insert(id, protocol);
        Ok(())
    }

    /// Attach a one-way channel from `from` to `to`.
    pub fn connect(&mut self, from: Endpoint, to: Endpoint, delay: u64, kind: ChannelKind) {
        self.kernel.channels.connect(from, to, delay, kind);
    }

    /// Attach a channel in both directions with the same delay.
    pub fn connect_duplex(&mut self, a: Endpoint, b: Endpoint, delay: u64, kind: ChannelKind) {
        self.kernel.channels.connect_duplex(a, b, delay, kind);
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.kernel.channels
    }

    pub fn backend(&self) -> &dyn QuantumBackend {
        self.kernel.backend.as_ref()
    }

    /// Schedule `start` for every registered protocol, in id order, at the
    /// simulation's current time.
    pub fn start(&self, sim: &mut Simulation) -> LinkResult<()> {
        let now = sim.current_time();
        for id in self.protocols.keys() {
            sim.schedule(now, EventType::Start { protocol: *id })?;
        }
        Ok(())
    }

    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }

    /// All registered ids in sorted order.
    pub fn protocol_ids(&self) -> Vec<ProtocolId> {
        self.protocols.keys().copied().collect()
    }

    /// Downcast a protocol reference for inspection.
    ///
    /// Returns `None` if the protocol is not registered or has another type.
    pub fn protocol<T: Protocol + 'static>(&self, id: ProtocolId) -> Option<&T> {
        self.protocols.get(&id)?.as_any().downcast_ref::<T>()
    }

    pub fn protocol_mut<T: Protocol + 'static>(&mut self, id: ProtocolId) -> Option<&mut T> {
        self.protocols.get_mut(&id)?.as_any_mut().downcast_mut::<T>()
    }

    /// Whether `id` currently has a wait registered.
    pub fn is_waiting(&self, id: ProtocolId) -> bool {
        self.kernel.waits.contains_key(&id)
    }

    /// Hand `request` to the EGP `egp` right now and return its extras
    /// (including the assigned creation id).
    pub fn put(
        &mut self,
        sim: &mut Simulation,
        egp: ProtocolId,
        request: LinkRequest,
    ) -> LinkResult<RequestExtras> {
        let mut ctx = sim.context();
        self.submit(&mut ctx, egp, request)
    }

    fn submit(
        &mut self,
        sim: &mut SimulationContext<'_>,
        egp: ProtocolId,
        request: LinkRequest,
    ) -> LinkResult<RequestExtras> {
        self.with_protocol(sim, egp, |protocol, ctx| {
            let service = protocol
                .as_any_mut()
                .downcast_mut::<Egp>()
                .ok_or(LinkError::ProtocolTypeMismatch {
                    protocol: egp,
                    expected: "EGP",
                })?;
            service.put(ctx, request)
        })
    }

    fn with_protocol<R>(
        &mut self,
        sim: &mut SimulationContext<'_>,
        id: ProtocolId,
        f: impl FnOnce(&mut dyn Protocol, &mut ProtocolContext<'_, '_>) -> LinkResult<R>,
    ) -> LinkResult<R> {
        let protocol = self
            .protocols
            .get_mut(&id)
            .ok_or(LinkError::ProtocolNotFound(id))?;
        let mut ctx = ProtocolContext {
            sim,
            kernel: &mut self.kernel,
            me: id,
        };
        f(protocol.as_mut(), &mut ctx)
    }

    fn record(&mut self, time: VirtualTime, event_id: EventId, protocol: ProtocolId, activity: Activity) {
        let entry = TraceEntry {
            time,
            event_id,
            protocol,
            activity,
        };
        trace!(%entry, "transition");
        if let Some(trace) = self.trace.as_mut() {
            trace.push(entry);
        }
    }
}

impl EventHandler for ProtocolRuntime {
    fn handle(&mut self, ctx: &mut SimulationContext<'_>, event: &Event) -> LinkResult<()> {
        match &event.payload {
            EventType::Start { protocol } => {
                self.record(ctx.now(), event.id, *protocol, Activity::Start);
                self.with_protocol(ctx, *protocol, |p, pctx| p.start(pctx))
            }

            EventType::Wake { protocol } => {
                let Some(state) = self.kernel.take_wake(*protocol, event.id) else {
                    return Ok(());
                };
                self.kernel.drop_timers(ctx, &state);
                self.record(
                    ctx.now(),
                    event.id,
                    *protocol,
                    Activity::Resume {
                        causes: state.resolved.len(),
                        waited_since: state.since,
                    },
                );
                let resolved = state.resolved;
                self.with_protocol(ctx, *protocol, move |p, pctx| p.resume(pctx, resolved))
            }

            EventType::TimerFired { protocol } => {
                self.kernel.timer_fired(ctx, *protocol, TimerId(event.id))
            }

            EventType::MessageSend { from, message } => {
                let route = self
                    .kernel
                    .channels
                    .dispatch(ctx.now(), *from)
                    .ok_or_else(|| LinkError::Configuration(format!("no channel attached to {}", from)))?;
                ctx.schedule_after(
                    route.delay,
                    EventType::MessageDelivery {
                        to: route.to,
                        message: message.clone(),
                    },
                )?;
                Ok(())
            }

            EventType::MessageDelivery { to, message } => {
                self.record(ctx.now(), event.id, to.protocol, Activity::Input { port: to.port });
                let port = to.port;
                self.with_protocol(ctx, to.protocol, |p, pctx| p.on_input(pctx, port, message.clone()))
            }

            EventType::SubmitRequest { egp, request } => {
                let extras = self.submit(ctx, *egp, request.clone())?;
                debug!(%egp, creation_id = %extras.creation_id, "request submitted");
                Ok(())
            }

            // Kernel-level markers, nothing to dispatch.
            EventType::Noop | EventType::Log(_) => Ok(()),
        }
    }
}
