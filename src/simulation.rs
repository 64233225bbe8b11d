//! Simulation execution loop.
//!
//! Drives the scheduler: pops events, advances virtual time, dispatches to a
//! handler. The loop is synchronous and single-threaded, and the first
//! handler error aborts the run.

use tracing::trace;

use crate::error::{LinkError, LinkResult};
use crate::event::{Event, EventId, EventType};
use crate::eventlog::EventLog;
use crate::scheduler::Scheduler;
use crate::time::VirtualTime;

// ── Handler trait ─────────────────────────────────────────────────────

/// Reacts to dispatched events.
pub trait EventHandler {
    /// Called for every dispatched event. An error stops the run.
    fn handle(&mut self, ctx: &mut SimulationContext<'_>, event: &Event) -> LinkResult<()>;
}

/// A handler backed by a closure, handy in tests.
impl<F> EventHandler for F
where
    F: FnMut(&mut SimulationContext<'_>, &Event) -> LinkResult<()>,
{
    fn handle(&mut self, ctx: &mut SimulationContext<'_>, event: &Event) -> LinkResult<()> {
        (self)(ctx, event)
    }
}

// ── Simulation Context ───────────────────────────────────────────────

/// Mutable context handed to the handler on every dispatch.
///
/// Borrows the scheduler so a handler can only affect ordering through the
/// scheduling API.
pub struct SimulationContext<'a> {
    pub(crate) scheduler: &'a mut Scheduler,
    pub(crate) now: VirtualTime,
}

impl<'a> SimulationContext<'a> {
    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Schedule an event at an absolute virtual time.
    ///
    /// Fails with `InvalidTime` if `at` is before now. The time is never
    /// clamped.
    pub fn schedule_at(&mut self, at: VirtualTime, payload: EventType) -> LinkResult<EventId> {
        if at.is_before(self.now) {
            return Err(LinkError::InvalidTime {
                requested: at.ticks(),
                current: self.now.ticks(),
            });
        }
        Ok(self.scheduler.schedule(at, payload))
    }

    /// Schedule an event `delay` ticks after now.
    pub fn schedule_after(&mut self, delay: u64, payload: EventType) -> LinkResult<EventId> {
        let at = self.now.plus(delay).ok_or(LinkError::TimeOverflow)?;
        Ok(self.scheduler.schedule(at, payload))
    }

    /// Cancel a pending event. Returns `false` if it already fired.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Number of live events in the scheduler.
    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation driver.
///
/// Owns the scheduler, the clock and the optional event log.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    scheduler: Scheduler,
    current_time: VirtualTime,
    events_processed: u64,
    log: Option<EventLog>,
}

impl Simulation {
    /// Create a simulation starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every dispatched event from now on.
    pub fn enable_logging(&mut self) {
        if self.log.is_none() {
            self.log = Some(EventLog::new());
        }
    }

    /// The event log, if logging is enabled.
    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    pub fn current_time(&self) -> VirtualTime {
        self.current_time
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Schedule an event from outside the run loop.
    pub fn schedule(&mut self, at: VirtualTime, payload: EventType) -> LinkResult<EventId> {
        self.context().schedule_at(at, payload)
    }

    /// A context at the current time, for driving protocols between runs
    /// (for example a synchronous request submission).
    pub fn context(&mut self) -> SimulationContext<'_> {
        SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.current_time,
        }
    }

    /// Pop one event, advance time and dispatch it.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    pub fn step(&mut self, handler: &mut dyn EventHandler) -> LinkResult<Option<Event>> {
        let Some(event) = self.scheduler.pop_next() else {
            return Ok(None);
        };

        // The scheduler only holds causal events, so time cannot go backward.
        debug_assert!(!event.scheduled_at.is_before(self.current_time));
        self.current_time = event.scheduled_at;
        self.events_processed += 1;
        trace!(id = %event.id, time = %event.scheduled_at, event = %event.payload, "dispatch");

        if let Some(log) = self.log.as_mut() {
            log.record(event.clone());
        }

        let mut ctx = SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.current_time,
        };
        handler.handle(&mut ctx, &event)?;
        Ok(Some(event))
    }

    /// Run until the event queue is empty. Returns the number of events
    /// processed by this call.
    pub fn run(&mut self, handler: &mut dyn EventHandler) -> LinkResult<u64> {
        let start = self.events_processed;
        while self.step(handler)?.is_some() {}
        Ok(self.events_processed - start)
    }

    /// Run at most `max_steps` events.
    pub fn run_for(&mut self, max_steps: u64, handler: &mut dyn EventHandler) -> LinkResult<u64> {
        let start = self.events_processed;
        for _ in 0..max_steps {
            if self.step(handler)?.is_none() {
                break;
            }
        }
        Ok(self.events_processed - start)
    }

    /// Run every event scheduled at or before `limit`, then move the clock to
    /// `limit`. Protocols that loop forever (the physical layer does) make
    /// this the usual way to bound a run.
    pub fn run_until(&mut self, limit: VirtualTime, handler: &mut dyn EventHandler) -> LinkResult<u64> {
        let start = self.events_processed;
        while let Some(next) = self.scheduler.peek_time() {
            if limit.is_before(next) {
                break;
            }
            self.step(handler)?;
        }
        if self.current_time.is_before(limit) {
            self.current_time = limit;
        }
        Ok(self.events_processed - start)
    }

    /// `true` when no live events remain.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut SimulationContext<'_>, _event: &Event) -> LinkResult<()> {
        Ok(())
    }

    #[test]
    fn test_basic_execution_loop() {
        let mut sim = Simulation::new();
        sim.schedule(VirtualTime::new(10), EventType::Log("a".into())).unwrap();
        sim.schedule(VirtualTime::new(20), EventType::Log("b".into())).unwrap();
        sim.schedule(VirtualTime::new(30), EventType::Log("c".into())).unwrap();

        let mut log: Vec<String> = Vec::new();
        let processed = sim
            .run(&mut |_ctx: &mut SimulationContext<'_>, event: &Event| -> LinkResult<()> {
                if let EventType::Log(msg) = &event.payload {
                    log.push(msg.clone());
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(processed, 3);
        assert_eq!(log, vec!["a", "b", "c"]);
        assert_eq!(sim.current_time(), VirtualTime::new(30));
    }

    #[test]
    fn test_handler_schedules_followup() {
        let mut sim = Simulation::new();
        sim.schedule(VirtualTime::ZERO, EventType::Log("start".into())).unwrap();

        let mut seen: Vec<u64> = Vec::new();
        sim.run(&mut |ctx: &mut SimulationContext<'_>, _event: &Event| -> LinkResult<()> {
            seen.push(ctx.now().ticks());
            if ctx.now().ticks() < 30 {
                ctx.schedule_after(10, EventType::Noop)?;
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_schedule_in_past_aborts_run() {
        let mut sim = Simulation::new();
        sim.schedule(VirtualTime::new(50), EventType::Noop).unwrap();
        sim.schedule(VirtualTime::new(60), EventType::Noop).unwrap();

        let err = sim
            .run(&mut |ctx: &mut SimulationContext<'_>, _event: &Event| -> LinkResult<()> {
                ctx.schedule_at(VirtualTime::new(10), EventType::Noop)?;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err, LinkError::InvalidTime { requested: 10, current: 50 });
        // The run stopped at the failing event.
        assert_eq!(sim.events_processed(), 1);
        assert!(!sim.is_finished());
    }

    #[test]
    fn test_run_for_limits_steps() {
        let mut sim = Simulation::new();
        for i in 0..100 {
            sim.schedule(VirtualTime::new(i), EventType::Noop).unwrap();
        }
        assert_eq!(sim.run_for(10, &mut noop).unwrap(), 10);
        assert!(!sim.is_finished());
    }

    #[test]
    fn test_run_until_is_inclusive_and_advances_clock() {
        let mut sim = Simulation::new();
        sim.schedule(VirtualTime::new(5), EventType::Noop).unwrap();
        sim.schedule(VirtualTime::new(10), EventType::Noop).unwrap();
        sim.schedule(VirtualTime::new(11), EventType::Noop).unwrap();

        assert_eq!(sim.run_until(VirtualTime::new(10), &mut noop).unwrap(), 2);
        assert_eq!(sim.current_time(), VirtualTime::new(10));

        assert_eq!(sim.run_until(VirtualTime::new(40), &mut noop).unwrap(), 1);
        assert_eq!(sim.current_time(), VirtualTime::new(40));
        assert!(sim.is_finished());
    }

    #[test]
    fn test_cancelled_event_never_dispatched() {
        let mut sim = Simulation::new();
        let doomed = sim.schedule(VirtualTime::new(5), EventType::Log("doomed".into())).unwrap();
        sim.schedule(VirtualTime::new(1), EventType::Noop).unwrap();

        let mut seen: Vec<EventType> = Vec::new();
        sim.run(&mut |ctx: &mut SimulationContext<'_>, event: &Event| -> LinkResult<()> {
            if event.payload == EventType::Noop {
                assert!(ctx.cancel(doomed));
            }
            seen.push(event.payload.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![EventType::Noop]);
    }

    #[test]
    fn test_deterministic_replay_with_log() {
        fn run_once() -> u64 {
            let mut sim = Simulation::new();
            sim.enable_logging();
            sim.schedule(VirtualTime::new(5), EventType::Log("alpha".into())).unwrap();
            sim.schedule(VirtualTime::new(5), EventType::Log("beta".into())).unwrap();
            sim.schedule(VirtualTime::new(3), EventType::Log("gamma".into())).unwrap();
            sim.run(&mut noop).unwrap();
            sim.event_log().unwrap().log_hash()
        }
        assert_eq!(run_once(), run_once());
    }

    #[test]
    fn test_empty_simulation() {
        let mut sim = Simulation::new();
        assert_eq!(sim.run(&mut noop).unwrap(), 0);
        assert!(sim.is_finished());
    }
}
