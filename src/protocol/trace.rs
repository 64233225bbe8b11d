//! TraceEntry, a record of every transition the runtime ran.

use crate::event::EventId;
use crate::time::VirtualTime;

use super::id::ProtocolId;
use super::payload::PortName;

/// Which transition ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Start,
    /// `causes` resolutions were delivered after waiting since `waited_since`.
    Resume { causes: usize, waited_since: VirtualTime },
    Input { port: PortName },
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activity::Start => write!(f, "Start"),
            Activity::Resume { causes, waited_since } => {
                write!(f, "Resume({} causes, since {})", causes, waited_since)
            }
            Activity::Input { port } => write!(f, "Input({})", port),
        }
    }
}

/// Appended by `ProtocolRuntime` on every dispatch to a protocol. Useful for
/// test assertions and post-mortem debugging.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub time: VirtualTime,
    pub event_id: EventId,
    pub protocol: ProtocolId,
    pub activity: Activity,
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[T={} E=#{} {}] {}",
            self.time.ticks(),
            self.event_id.raw(),
            self.protocol,
            self.activity,
        )
    }
}
