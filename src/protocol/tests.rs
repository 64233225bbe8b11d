use super::*;
use crate::backend::{AttemptOutcome, ScriptedBackend};
use crate::channel::{ChannelKind, Endpoint};
use crate::error::{LinkError, LinkResult};
use crate::event::EventType;
use crate::simulation::Simulation;
use crate::time::VirtualTime;

// ── Test protocols ────────────────────────────────────────────────────

/// Arms a timer at `at`, then raises `signal` when it fires.
struct Raiser {
    at: u64,
    signal: Signal,
}

impl Protocol for Raiser {
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let timer = ctx.schedule_timer(VirtualTime::new(self.at))?;
        ctx.wait_any(vec![Waitable::Timer(timer)])
    }

    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, _resolved: Vec<Resolution>) -> LinkResult<()> {
        ctx.raise(self.signal.clone())
    }

    fn name(&self) -> &'static str {
        "raiser"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Waits on an optional timer plus a set of signals and records every
/// resume. With `rewait`, registers the signals again after each resume.
#[derive(Default)]
struct Watcher {
    timer_at: Option<u64>,
    watch: Vec<(ProtocolId, SignalName)>,
    rewait: bool,
    resumes: Vec<(u64, Vec<Resolution>)>,
}

impl Watcher {
    fn on(watch: Vec<(ProtocolId, SignalName)>) -> Self {
        Watcher {
            watch,
            ..Default::default()
        }
    }

    fn register(&self, ctx: &mut ProtocolContext<'_, '_>, timer: Option<TimerId>) -> LinkResult<()> {
        let mut waitables: Vec<Waitable> = timer.into_iter().map(Waitable::Timer).collect();
        waitables.extend(self.watch.iter().map(|(source, name)| Waitable::signal(*source, *name)));
        ctx.wait_any(waitables)
    }
}

impl Protocol for Watcher {
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let timer = match self.timer_at {
            Some(at) => Some(ctx.schedule_timer(VirtualTime::new(at))?),
            None => None,
        };
        self.register(ctx, timer)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()> {
        self.resumes.push((ctx.now().ticks(), resolved));
        if self.rewait {
            self.register(ctx, None)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "watcher"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Sleeps until `listen_at`, then waits for one message on `Classical`.
struct Listener {
    listen_at: u64,
    received: Vec<(u64, Message)>,
}

impl Protocol for Listener {
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        let timer = ctx.schedule_timer(VirtualTime::new(self.listen_at))?;
        ctx.wait_any(vec![Waitable::Timer(timer)])
    }

    fn resume(&mut self, ctx: &mut ProtocolContext<'_, '_>, resolved: Vec<Resolution>) -> LinkResult<()> {
        for resolution in resolved {
            match resolution {
                Resolution::Timer(_) => ctx.wait_any(vec![Waitable::Input(PortName::Classical)])?,
                Resolution::Input { message, .. } => self.received.push((ctx.now().ticks(), message)),
                Resolution::Signal { .. } => {}
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "listener"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Sends one text message on `Classical` at start.
struct Sender;

impl Protocol for Sender {
    fn start(&mut self, ctx: &mut ProtocolContext<'_, '_>) -> LinkResult<()> {
        ctx.send(PortName::Classical, Message::text("hello"))
    }

    fn resume(&mut self, _ctx: &mut ProtocolContext<'_, '_>, _resolved: Vec<Resolution>) -> LinkResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sender"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn runtime() -> ProtocolRuntime {
    ProtocolRuntime::new(Box::new(ScriptedBackend::always(AttemptOutcome::Product)))
}

fn pid(n: u64) -> ProtocolId {
    ProtocolId::new(n)
}

// ── Timers ────────────────────────────────────────────────────────────

#[test]
fn test_timer_resumes_at_requested_time() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(
        pid(0),
        Box::new(Watcher {
            timer_at: Some(10),
            ..Default::default()
        }),
    )
    .unwrap();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    let w = rt.protocol::<Watcher>(pid(0)).unwrap();
    assert_eq!(w.resumes.len(), 1);
    assert_eq!(w.resumes[0].0, 10);
    assert!(matches!(w.resumes[0].1[..], [Resolution::Timer(_)]));
}

#[test]
fn test_timer_in_past_is_an_error() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Raiser { at: 0, signal: Signal::Trigger })).unwrap();

    sim.run_until(VirtualTime::new(10), &mut rt).unwrap();
    rt.start(&mut sim).unwrap();
    let err = sim.run(&mut rt).unwrap_err();
    assert_eq!(err, LinkError::InvalidTime { requested: 0, current: 10 });
}

// ── Signals and resolution sets ───────────────────────────────────────

#[test]
fn test_timer_and_signal_resolve_together() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    // The raiser starts first, so its timer fires first at T=5.
    rt.register(pid(0), Box::new(Raiser { at: 5, signal: Signal::Trigger })).unwrap();
    rt.register(
        pid(1),
        Box::new(Watcher {
            timer_at: Some(5),
            watch: vec![(pid(0), SignalName::Trigger)],
            ..Default::default()
        }),
    )
    .unwrap();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    let w = rt.protocol::<Watcher>(pid(1)).unwrap();
    assert_eq!(w.resumes.len(), 1, "one wake for both causes");
    let (at, resolved) = &w.resumes[0];
    assert_eq!(*at, 5);
    assert_eq!(resolved.len(), 2);
    assert!(matches!(resolved[0], Resolution::Timer(_)));
    assert_eq!(resolved[1].signal(), Some(&Signal::Trigger));
}

#[test]
fn test_every_waiter_observes_one_raise() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Raiser { at: 3, signal: Signal::DoTask { position: 4 } })).unwrap();
    rt.register(pid(1), Box::new(Watcher::on(vec![(pid(0), SignalName::DoTask)]))).unwrap();
    rt.register(pid(2), Box::new(Watcher::on(vec![(pid(0), SignalName::DoTask)]))).unwrap();
    rt.register(pid(3), Box::new(Watcher::on(vec![(pid(0), SignalName::Trigger)]))).unwrap();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    for id in [pid(1), pid(2)] {
        let w = rt.protocol::<Watcher>(id).unwrap();
        assert_eq!(w.resumes.len(), 1);
        assert_eq!(w.resumes[0].0, 3);
        assert_eq!(w.resumes[0].1[0].signal(), Some(&Signal::DoTask { position: 4 }));
    }
    // A different signal name from the same source is not observed.
    assert!(rt.protocol::<Watcher>(pid(3)).unwrap().resumes.is_empty());
    assert!(rt.is_waiting(pid(3)));
}

#[test]
fn test_signal_without_waiters_is_lost() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Raiser { at: 1, signal: Signal::Trigger })).unwrap();
    rt.register(
        pid(1),
        Box::new(Watcher {
            timer_at: Some(2),
            ..Default::default()
        }),
    )
    .unwrap();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    // The watcher only ever registered a timer, so the trigger at T=1 is gone.
    let w = rt.protocol::<Watcher>(pid(1)).unwrap();
    assert_eq!(w.resumes.len(), 1);
    assert!(matches!(w.resumes[0].1[..], [Resolution::Timer(_)]));
}

#[test]
fn test_dropped_timer_never_holds_the_clock() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Raiser { at: 10, signal: Signal::Trigger })).unwrap();
    rt.register(
        pid(1),
        Box::new(Watcher {
            timer_at: Some(100),
            watch: vec![(pid(0), SignalName::Trigger)],
            ..Default::default()
        }),
    )
    .unwrap();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    let w = rt.protocol::<Watcher>(pid(1)).unwrap();
    assert_eq!(w.resumes.len(), 1);
    assert_eq!(w.resumes[0].1[0].signal(), Some(&Signal::Trigger));
    // The timer at T=100 was cancelled on wake and never dispatched.
    assert!(sim.is_finished());
    assert_eq!(sim.current_time(), VirtualTime::new(10));
}

#[test]
fn test_rewait_observes_later_raises() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Raiser { at: 4, signal: Signal::Trigger })).unwrap();
    rt.register(pid(1), Box::new(Raiser { at: 9, signal: Signal::Trigger })).unwrap();
    rt.register(
        pid(2),
        Box::new(Watcher {
            watch: vec![(pid(0), SignalName::Trigger), (pid(1), SignalName::Trigger)],
            rewait: true,
            ..Default::default()
        }),
    )
    .unwrap();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    let w = rt.protocol::<Watcher>(pid(2)).unwrap();
    let times: Vec<u64> = w.resumes.iter().map(|(t, _)| *t).collect();
    assert_eq!(times, vec![4, 9]);
    match &w.resumes[1].1[0] {
        Resolution::Signal { source, .. } => assert_eq!(*source, pid(1)),
        other => panic!("unexpected resolution {:?}", other),
    }
}

// ── Messages ──────────────────────────────────────────────────────────

#[test]
fn test_message_routed_with_channel_delay() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Sender)).unwrap();
    rt.register(pid(1), Box::new(Listener { listen_at: 0, received: Vec::new() })).unwrap();
    rt.connect(
        Endpoint::new(pid(0), PortName::Classical),
        Endpoint::new(pid(1), PortName::Classical),
        7,
        ChannelKind::Classical,
    );
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    let l = rt.protocol::<Listener>(pid(1)).unwrap();
    assert_eq!(l.received, vec![(7, Message::text("hello"))]);
    assert_eq!(rt.channels().count(ChannelKind::Classical), 1);
}

#[test]
fn test_early_message_is_buffered_until_waited_for() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Sender)).unwrap();
    rt.register(pid(1), Box::new(Listener { listen_at: 20, received: Vec::new() })).unwrap();
    rt.connect(
        Endpoint::new(pid(0), PortName::Classical),
        Endpoint::new(pid(1), PortName::Classical),
        3,
        ChannelKind::Classical,
    );
    rt.start(&mut sim).unwrap();

    sim.run_until(VirtualTime::new(10), &mut rt).unwrap();
    assert!(rt.protocol::<Listener>(pid(1)).unwrap().received.is_empty());

    sim.run(&mut rt).unwrap();
    let l = rt.protocol::<Listener>(pid(1)).unwrap();
    assert_eq!(l.received, vec![(20, Message::text("hello"))]);
}

#[test]
fn test_send_without_channel_is_configuration_error() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Sender)).unwrap();
    rt.start(&mut sim).unwrap();

    let err = sim.run(&mut rt).unwrap_err();
    assert!(matches!(err, LinkError::Configuration(msg) if msg.contains("P0.classical")));
}

// ── Registry ──────────────────────────────────────────────────────────

#[test]
fn test_duplicate_registration_rejected() {
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Sender)).unwrap();
    assert_eq!(
        rt.register(pid(0), Box::new(Sender)),
        Err(LinkError::ProtocolAlreadyRegistered(pid(0)))
    );
    assert_eq!(rt.protocol_ids(), vec![pid(0)]);
}

#[test]
fn test_unknown_protocol_aborts_run() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    sim.schedule(VirtualTime::new(1), EventType::Start { protocol: pid(9) }).unwrap();
    assert_eq!(sim.run(&mut rt), Err(LinkError::ProtocolNotFound(pid(9))));
}

#[test]
fn test_trace_records_transitions() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Sender)).unwrap();
    rt.register(pid(1), Box::new(Listener { listen_at: 0, received: Vec::new() })).unwrap();
    rt.connect(
        Endpoint::new(pid(0), PortName::Classical),
        Endpoint::new(pid(1), PortName::Classical),
        2,
        ChannelKind::Classical,
    );
    rt.enable_trace();
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    let activities: Vec<(u64, ProtocolId, Activity)> = rt
        .trace()
        .iter()
        .map(|e| (e.time.ticks(), e.protocol, e.activity.clone()))
        .collect();
    assert_eq!(activities[0], (0, pid(0), Activity::Start));
    assert_eq!(activities[1], (0, pid(1), Activity::Start));
    assert!(activities.contains(&(2, pid(1), Activity::Input { port: PortName::Classical })));
    assert_eq!(rt.trace().last().unwrap().to_string().split(']').next().unwrap(), "[T=2 E=#6 P1");
}

#[test]
fn test_trace_is_off_by_default() {
    let mut sim = Simulation::new();
    let mut rt = runtime();
    rt.register(pid(0), Box::new(Sender)).unwrap();
    rt.register(pid(1), Box::new(Listener { listen_at: 0, received: Vec::new() })).unwrap();
    rt.connect(
        Endpoint::new(pid(0), PortName::Classical),
        Endpoint::new(pid(1), PortName::Classical),
        2,
        ChannelKind::Classical,
    );
    rt.start(&mut sim).unwrap();
    sim.run(&mut rt).unwrap();

    assert!(rt.trace().is_empty());
    assert!(rt.channels().log().is_empty());
    assert_eq!(rt.channels().count(ChannelKind::Classical), 1);
}
