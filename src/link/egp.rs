//! Entanglement generation service (EGP), the link-layer request queue.
//!
//! Requests are accepted on either node. The accepting side picks a start
//! time one propagation delay in the future and sends a `RequestSync` to its
//! peer, so both queues hold the same request with the same start time and
//! creation id. The dispatcher then services one request at a time, feeding
//! the physical layer a `do_task` for every cadence slot and counting
//! entangled outcomes until the request is satisfied.
//!
//! Both peers must pick the same request and the same first slot without
//! talking to each other. The queue is kept ordered by
//! `(start_time, origin, creation_id)`, a request becomes eligible only once
//! the clock has passed its start time (by then the peer's sync has
//! arrived, as long as the propagation delay covers the classical delay),
//! and a `Trigger` raised at the instant service began is skipped, since
//! whether it is seen depends on event order within that instant.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::protocol::{
    Message, PortName, Protocol, ProtocolContext, ProtocolId, Resolution, Signal, SignalName, Waitable,
};
use crate::time::VirtualTime;

use super::mhp::{Mhp, QuantumMemory};
use super::request::{
    CreationId, LinkRequest, OkResponse, QueuedRequest, RequestExtras, RequestSync,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgpConfig {
    /// Ticks between accepting a request and servicing it; must cover the
    /// classical delay to the peer.
    pub propagation_delay: u64,
    /// Give up on a request after this many failed responses. `None`
    /// retries forever.
    pub max_attempts: Option<u64>,
}

impl Default for EgpConfig {
    fn default() -> Self {
        EgpConfig {
            propagation_delay: 10_000,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgpState {
    Idle,
    DispatchingRequest { creation_id: CreationId },
    AwaitingTrigger { creation_id: CreationId },
    AwaitingOutcome { creation_id: CreationId },
    Completed { creation_id: CreationId },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgpStats {
    pub requests_accepted: u64,
    pub duplicates_ignored: u64,
    /// `do_task` calls issued.
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub completed: u64,
    pub abandoned: u64,
}

/// The request currently in service.
#[derive(Debug, Clone)]
struct InService {
    queued: QueuedRequest,
    began_at: VirtualTime,
    satisfied: u32,
    responses: u64,
}

pub struct Egp {
    config: EgpConfig,
    physical: Option<ProtocolId>,
    queue: VecDeque<QueuedRequest>,
    active: Option<InService>,
    state: EgpState,
    last_creation_id: u64,
    /// Highest creation id seen per origin. Ids are monotonic per origin and
    /// the sync channel keeps order, so anything at or below is a repeat.
    seen: BTreeMap<ProtocolId, CreationId>,
    responses: Vec<OkResponse>,
    completed: Vec<CreationId>,
    abandoned: Vec<CreationId>,
    stats: EgpStats,
}

impl Egp {
    pub fn new(config: EgpConfig) -> Self {
        Egp {
            config,
            physical: None,
            queue: VecDeque::new(),
            active: None,
            state: EgpState::Idle,
            last_creation_id: 0,
            seen: BTreeMap::new(),
            responses: Vec::new(),
            completed: Vec::new(),
            abandoned: Vec::new(),
            stats: EgpStats::default(),
        }
    }

    /// Attach the physical-layer protocol this EGP drives.
    pub fn attach_physical(&mut self, mhp: ProtocolId) {
        self.physical = Some(mhp);
    }

    pub fn with_physical(mut self, mhp: ProtocolId) -> Self {
        self.attach_physical(mhp);
        self
    }

    pub fn physical(&self) -> Option<ProtocolId> {
        self.physical
    }

    pub fn config(&self) -> EgpConfig {
        self.config
    }

    pub fn state(&self) -> EgpState {
        self.state
    }

    pub fn stats(&self) -> EgpStats {
        self.stats
    }

    /// Requests not yet in service.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The request that will be serviced next, in queue order.
    pub fn next_request(&self) -> Option<&QueuedRequest> {
        self.queue.front()
    }

    pub fn in_service(&self) -> Option<&QueuedRequest> {
        self.active.as_ref().map(|a| &a.queued)
    }

    /// Every OK delivered so far, in completion order.
    pub fn responses(&self) -> &[OkResponse] {
        &self.responses
    }

    pub fn completed(&self) -> &[CreationId] {
        &self.completed
    }

    pub fn abandoned(&self) -> &[CreationId] {
        &self.abandoned
    }

    /// Accept a request from the local requester.
    pub fn put(&mut self, ctx: &mut ProtocolContext<'_, '_>, request: LinkRequest) -> LinkResult<RequestExtras> {
        self.handle_request(ctx, request, None)
    }

    /// Enqueue a request. Without `remote`, this side originates it: a
    /// creation id and start time are assigned and the peer is told. With
    /// `remote`, the peer's values are used and nothing is sent back.
    pub fn handle_request(
        &mut self,
        ctx: &mut ProtocolContext<'_, '_>,
        request: LinkRequest,
        remote: Option<RequestSync>,
    ) -> LinkResult<RequestExtras> {
        let queued = match remote {
            Some(sync) => {
                if !self.mark_seen(sync.extras) {
                    self.stats.duplicates_ignored += 1;
                    warn!(me = %ctx.id(), creation_id = %sync.extras.creation_id, origin = %sync.extras.origin, "duplicate request sync ignored");
                    return Ok(sync.extras);
                }
                self.last_creation_id = self.last_creation_id.max(sync.extras.creation_id.0);
                QueuedRequest {
                    start_time: sync.start_time,
                    handler: sync.handler,
                    request,
                    extras: sync.extras,
                }
            }
            None => {
                self.last_creation_id += 1;
                let extras = RequestExtras {
                    creation_id: CreationId(self.last_creation_id),
                    origin: ctx.id(),
                };
                self.mark_seen(extras);
                let start_time = ctx
                    .now()
                    .plus(self.config.propagation_delay)
                    .ok_or(LinkError::TimeOverflow)?;
                let queued = QueuedRequest {
                    start_time,
                    handler: request.kind(),
                    request,
                    extras,
                };
                ctx.send(PortName::Classical, RequestSync::from_queued(&queued).encode()?)?;
                queued
            }
        };

        let extras = queued.extras;
        debug!(
            me = %ctx.id(),
            creation_id = %extras.creation_id,
            start = %queued.start_time,
            kind = %queued.handler,
            "request queued"
        );
        self.enqueue(queued);
        self.stats.requests_accepted += 1;
        ctx.raise(Signal::RequestQueued)?;
        Ok(extras)
    }

    /// Record `extras` as seen. Returns `false` if it was already.
    fn mark_seen(&mut self, extras: RequestExtras) -> bool {
        match self.seen.get(&extras.origin) {
            Some(latest) if extras.creation_id <= *latest => false,
            _ => {
                self.seen.insert(extras.origin, extras.creation_id);
                true
            }
        }
    }

    fn enqueue(&mut self, queued: QueuedRequest) {
        let key = queue_key(&queued);
        let at = self.queue.partition_point(|q| queue_key(q) <= key);
        self.queue.insert(at, queued);
    }

    fn require_physical(&self, ctx: &ProtocolContext<'_, '_>) -> LinkResult<ProtocolId> {
        self.physical
            .ok_or_else(|| LinkError::Configuration(format!("EGP {} has no physical layer attached", ctx.id())))
    }

    /// Start eligible requests until one needs to wait. With nothing
    /// eligible, park on the head's start time or on `RequestQueued`.
    fn dispatch_next(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let me = ctx.id();
        loop {
            let Some(head) = self.queue.front() else {
                self.state = EgpState::Idle;
                return ctx.wait_any(vec![Waitable::signal(me, SignalName::RequestQueued)]);
            };

            let creation_id = head.extras.creation_id;
            let start_time = head.start_time;
            if !start_time.is_before(ctx.now()) {
                // A request queued meanwhile may sort ahead of the head.
                let eligible_at = start_time.plus(1).ok_or(LinkError::TimeOverflow)?;
                let timer = ctx.schedule_timer(eligible_at)?;
                ctx.wait_any(vec![
                    Waitable::Timer(timer),
                    Waitable::signal(me, SignalName::RequestQueued),
                ])?;
                self.state = EgpState::DispatchingRequest { creation_id };
                return Ok(());
            }

            let Some(next) = self.queue.pop_front() else {
                continue;
            };
            self.active = Some(InService {
                queued: next,
                began_at: ctx.now(),
                satisfied: 0,
                responses: 0,
            });
            if !self.begin_service(ctx)? {
                return Ok(());
            }
            self.complete(ctx);
        }
    }

    /// Start the handler of the active request. Returns `true` if it is
    /// already satisfied.
    fn begin_service(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<bool> {
        let physical = self.require_physical(ctx)?;
        let Some(active) = self.active.as_ref() else {
            return Ok(true);
        };
        let creation_id = active.queued.extras.creation_id;
        match active.queued.request {
            LinkRequest::Create(create) => {
                if create.pair_count == 0 {
                    return Ok(true);
                }
                debug!(me = %ctx.id(), %creation_id, pairs = create.pair_count, "servicing CREATE");
                self.await_physical(ctx, physical)?;
                self.state = EgpState::AwaitingTrigger { creation_id };
                Ok(false)
            }
        }
    }

    fn await_physical(&mut self, ctx: &mut ProtocolContext<'_, '_>, physical: ProtocolId) -> LinkResult<()> {
        ctx.wait_any(vec![
            Waitable::signal(physical, SignalName::Trigger),
            Waitable::signal(physical, SignalName::Response),
        ])
    }

    /// One step of the CREATE handler: triggers first, then responses.
    fn service(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()> {
        let physical = self.require_physical(ctx)?;
        let Some(active) = self.active.as_mut() else {
            return self.dispatch_next(ctx);
        };
        let LinkRequest::Create(create) = active.queued.request;
        let creation_id = active.queued.extras.creation_id;

        let triggered = ctx.now() != active.began_at
            && resolved.iter().any(|r| matches!(r.signal(), Some(Signal::Trigger)));
        if triggered {
            Mhp::do_task(ctx, physical, active.satisfied as usize)?;
            self.stats.attempts += 1;
        }

        let mut answered = false;
        for resolution in &resolved {
            let Some(Signal::Response { result, position }) = resolution.signal() else {
                continue;
            };
            answered = true;
            active.responses += 1;

            if !result.is_entangled() {
                self.stats.failures += 1;
                debug!(me = %ctx.id(), %creation_id, ?result, "attempt failed, retrying");
                continue;
            }

            let ok = OkResponse {
                purpose_id: create.purpose_id,
                creation_id,
                logical_qubit_position: QuantumMemory::slot_for(*position),
            };
            active.satisfied += 1;
            self.stats.successes += 1;
            info!(
                me = %ctx.id(),
                %creation_id,
                purpose_id = ok.purpose_id,
                position = ok.logical_qubit_position,
                pair = active.satisfied,
                of = create.pair_count,
                "pair delivered"
            );
            self.responses.push(ok);
            ctx.raise(Signal::LinkOk(ok))?;

            if active.satisfied >= create.pair_count {
                self.complete(ctx);
                return self.dispatch_next(ctx);
            }
        }

        let exhausted = self.config.max_attempts.is_some_and(|max| active.responses >= max);
        if exhausted {
            self.abandon(ctx);
            return self.dispatch_next(ctx);
        }

        self.await_physical(ctx, physical)?;
        if triggered {
            self.state = EgpState::AwaitingOutcome { creation_id };
        } else if answered {
            self.state = EgpState::AwaitingTrigger { creation_id };
        }
        Ok(())
    }

    fn complete(&mut self, ctx: &ProtocolContext<'_, '_>) {
        let Some(done) = self.active.take() else {
            return;
        };
        let creation_id = done.queued.extras.creation_id;
        info!(me = %ctx.id(), %creation_id, attempts = done.responses, "request completed");
        self.completed.push(creation_id);
        self.stats.completed += 1;
        self.state = EgpState::Completed { creation_id };
    }

    fn abandon(&mut self, ctx: &ProtocolContext<'_, '_>) {
        let Some(dropped) = self.active.take() else {
            return;
        };
        let creation_id = dropped.queued.extras.creation_id;
        warn!(
            me = %ctx.id(),
            %creation_id,
            delivered = dropped.satisfied,
            attempts = dropped.responses,
            "request abandoned after attempt limit"
        );
        self.abandoned.push(creation_id);
        self.stats.abandoned += 1;
    }
}

fn queue_key(queued: &QueuedRequest) -> (VirtualTime, ProtocolId, CreationId) {
    (queued.start_time, queued.extras.origin, queued.extras.creation_id)
}

impl Protocol for Egp {
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        self.require_physical(ctx)?;
        self.dispatch_next(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()> {
        match self.state {
            EgpState::Idle | EgpState::Completed { .. } | EgpState::DispatchingRequest { .. } => {
                self.dispatch_next(ctx)
            }
            EgpState::AwaitingTrigger { .. } | EgpState::AwaitingOutcome { .. } => self.service(ctx, resolved),
        }
    }

    fn on_input(&mut self, ctx: &mut ProtocolContext<'_, '_>, port: PortName, message: Message) -> LinkResult<()> {
        match port {
            PortName::Classical => {
                let sync = RequestSync::decode(&message)?;
                let request = sync.request;
                self.handle_request(ctx, request, Some(sync))?;
                Ok(())
            }
            other => {
                debug!(me = %ctx.id(), port = %other, %message, "EGP ignored input");
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "egp"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
