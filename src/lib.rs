//! # Herald — Heralded Entanglement Link
//!
//! A deterministic discrete-event simulation of a two-node quantum link:
//! each node runs a physical heralding protocol (MHP) under a link-layer
//! request service (EGP), and a midpoint station measures the photons they
//! emit and heralds the outcome back. Everything is driven by a virtual
//! clock, so a run is replayable from its configuration and seed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        ProtocolRuntime                  │ ← waits, signals, ports
//! │  ┌──────────┐  ┌──────────┐  ┌────────┐ │
//! │  │ EGP (A)  │  │ Midpoint │  │ EGP (B)│ │ ← link layer
//! │  │ MHP (A)  │  │ station  │  │ MHP (B)│ │ ← physical layer
//! │  └──────────┘  └──────────┘  └────────┘ │
//! │  ┌────────────────┐ ┌────────────────┐  │
//! │  │ ChannelTable   │ │ QuantumBackend │  │
//! │  └────────────────┘ └────────────────┘  │
//! │  ┌───────────────────────────────────┐  │
//! │  │  Simulation / Scheduler / VTime   │  │ ← deterministic kernel
//! │  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod channel;
pub mod dsl;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod link;
pub mod protocol;
pub mod report;
pub mod scheduler;
pub mod simulation;
pub mod time;

// Re-exports for convenience.
pub use backend::{AttemptOutcome, QuantumBackend, QubitHandle, SampledBackend, ScriptedBackend};
pub use channel::{ChannelKind, ChannelTable, Endpoint};
pub use dsl::{LinkBuilder, LinkConfig, LinkTopology, NodeProtocols};
pub use error::{LinkError, LinkResult};
pub use event::{Event, EventId, EventIdGen, EventType};
pub use eventlog::{logs_match, EventLog};
pub use link::{
    CreateRequest, CreationId, Egp, EgpConfig, HeraldResult, LinkRequest, Mhp, MidpointStation, OkResponse, Side,
};
pub use protocol::{Message, PortName, Protocol, ProtocolContext, ProtocolId, ProtocolRuntime, Signal};
pub use report::LinkReport;
pub use scheduler::Scheduler;
pub use simulation::{EventHandler, Simulation, SimulationContext};
pub use time::VirtualTime;
