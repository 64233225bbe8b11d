//! Link configuration and the fluent builder that assembles a two-node link.
//!
//! The builder hides the boilerplate of registering the midpoint, both
//! physical layers and both link layers, wiring their channels and
//! scheduling requester submissions, while keeping the run deterministic.

use serde::{Deserialize, Serialize};

use crate::backend::{QuantumBackend, SampledBackend};
use crate::channel::{fibre_delay, ChannelKind, Endpoint};
use crate::error::{LinkError, LinkResult};
use crate::event::EventType;
use crate::link::{Egp, EgpConfig, LinkRequest, Mhp, MidpointStation, Side};
use crate::protocol::{PortName, ProtocolId, ProtocolRuntime};
use crate::simulation::Simulation;
use crate::time::VirtualTime;

// ── LinkConfig ────────────────────────────────────────────────────────

/// Timing and sampling parameters of a link. All times are ns ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Attempt cadence of the physical layers.
    pub cadence: u64,
    /// One-way delay between the two EGPs.
    pub classical_delay: u64,
    /// Delay between accepting a request and servicing it.
    pub propagation_delay: u64,
    /// Node to midpoint photon delay.
    pub quantum_delay: u64,
    /// Midpoint to node herald delay.
    pub herald_delay: u64,
    /// Midpoint correlation window.
    pub detection_window: u64,
    pub success_probability: f64,
    pub seed: u64,
    pub max_attempts: Option<u64>,
    /// Default run length for `LinkBuilder::run`.
    pub horizon: u64,
}

impl LinkConfig {
    /// Delays for two nodes `distance_km` apart with the midpoint halfway.
    pub fn from_fibre(distance_km: f64) -> Self {
        let end_to_end = fibre_delay(distance_km);
        let half = fibre_delay(distance_km / 2.0);
        LinkConfig {
            cadence: 100,
            classical_delay: end_to_end,
            propagation_delay: end_to_end,
            quantum_delay: half,
            herald_delay: half,
            detection_window: 20,
            success_probability: 0.5,
            seed: 42,
            max_attempts: None,
            horizon: 1_000_000,
        }
    }

    /// Parse a JSON document. Missing fields take their default values.
    pub fn from_json(json: &str) -> LinkResult<Self> {
        let config: LinkConfig =
            serde_json::from_str(json).map_err(|e| LinkError::Configuration(format!("invalid link config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LinkResult<()> {
        if self.cadence == 0 {
            return Err(LinkError::Configuration("cadence must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.success_probability) {
            return Err(LinkError::Configuration(format!(
                "success probability {} is outside [0, 1]",
                self.success_probability
            )));
        }
        // The peer must hold a request before its start time passes.
        if self.propagation_delay < self.classical_delay {
            return Err(LinkError::Configuration(format!(
                "propagation delay {} is shorter than the classical delay {}",
                self.propagation_delay, self.classical_delay
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(LinkError::Configuration("max_attempts must be positive when set".into()));
        }
        Ok(())
    }

    pub fn egp_config(&self) -> EgpConfig {
        EgpConfig {
            propagation_delay: self.propagation_delay,
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for LinkConfig {
    /// A 2 km link.
    fn default() -> Self {
        LinkConfig::from_fibre(2.0)
    }
}

// ── LinkTopology ──────────────────────────────────────────────────────

/// Protocol ids of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeProtocols {
    pub mhp: ProtocolId,
    pub egp: ProtocolId,
}

/// Protocol ids of an assembled link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTopology {
    pub midpoint: ProtocolId,
    pub alice: NodeProtocols,
    pub bob: NodeProtocols,
}

impl LinkTopology {
    /// Ids are assigned midpoint first, then each node's MHP and EGP.
    pub fn standard() -> Self {
        LinkTopology {
            midpoint: ProtocolId::new(0),
            alice: NodeProtocols {
                mhp: ProtocolId::new(1),
                egp: ProtocolId::new(2),
            },
            bob: NodeProtocols {
                mhp: ProtocolId::new(3),
                egp: ProtocolId::new(4),
            },
        }
    }

    pub fn node(&self, side: Side) -> NodeProtocols {
        match side {
            Side::A => self.alice,
            Side::B => self.bob,
        }
    }
}

// ── LinkBuilder ───────────────────────────────────────────────────────

/// Fluent builder for a `Simulation` + `ProtocolRuntime` pair running one
/// link.
///
/// # Example
/// ```rust
/// use herald::dsl::{LinkBuilder, LinkConfig};
/// use herald::link::{CreateRequest, Side};
///
/// let (sim, rt, topology) = LinkBuilder::new(LinkConfig::default())
///     .with_logging()
///     .request_at(0, Side::A, CreateRequest::new(1, 2))
///     .build()
///     .unwrap();
/// assert_eq!(rt.protocol_count(), 5);
/// ```
pub struct LinkBuilder {
    config: LinkConfig,
    backend: Option<Box<dyn QuantumBackend>>,
    logging: bool,
    requests: Vec<(VirtualTime, Side, LinkRequest)>,
}

impl LinkBuilder {
    pub fn new(config: LinkConfig) -> Self {
        LinkBuilder {
            config,
            backend: None,
            logging: false,
            requests: Vec::new(),
        }
    }

    /// Use `backend` instead of a `SampledBackend` seeded from the config.
    pub fn backend(mut self, backend: impl QuantumBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Enable event logging.
    pub fn with_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Submit `request` to the EGP on `side` at time `at`.
    pub fn request_at(mut self, at: u64, side: Side, request: impl Into<LinkRequest>) -> Self {
        self.requests.push((VirtualTime::new(at), side, request.into()));
        self
    }

    /// Build and return `(Simulation, ProtocolRuntime, LinkTopology)`, with
    /// every protocol's start and every submission scheduled.
    pub fn build(self) -> LinkResult<(Simulation, ProtocolRuntime, LinkTopology)> {
        let config = self.config;
        config.validate()?;

        let backend: Box<dyn QuantumBackend> = match self.backend {
            Some(backend) => backend,
            None => Box::new(SampledBackend::new(config.seed, config.success_probability)),
        };
        let mut rt = ProtocolRuntime::new(backend);
        let topology = LinkTopology::standard();

        rt.register(topology.midpoint, Box::new(MidpointStation::new(config.detection_window)))?;
        for side in [Side::A, Side::B] {
            let node = topology.node(side);
            let mhp = match side {
                Side::A => Mhp::new(config.cadence),
                Side::B => Mhp::new(config.cadence).corrector(),
            };
            rt.register(node.mhp, Box::new(mhp))?;
            rt.register(node.egp, Box::new(Egp::new(config.egp_config()).with_physical(node.mhp)))?;

            let station = Endpoint::new(topology.midpoint, PortName::Side(side));
            rt.connect(
                Endpoint::new(node.mhp, PortName::QuantumOut),
                station,
                config.quantum_delay,
                ChannelKind::Quantum,
            );
            rt.connect(
                station,
                Endpoint::new(node.mhp, PortName::Herald),
                config.herald_delay,
                ChannelKind::Quantum,
            );
        }
        rt.connect_duplex(
            Endpoint::new(topology.alice.egp, PortName::Classical),
            Endpoint::new(topology.bob.egp, PortName::Classical),
            config.classical_delay,
            ChannelKind::Classical,
        );

        let mut sim = Simulation::new();
        if self.logging {
            sim.enable_logging();
        }
        rt.start(&mut sim)?;
        for (at, side, request) in self.requests {
            let egp = topology.node(side).egp;
            sim.schedule(at, EventType::SubmitRequest { egp, request })?;
        }

        Ok((sim, rt, topology))
    }

    /// Build and run up to the configured horizon. The `u64` is the number
    /// of events processed.
    pub fn run(self) -> LinkResult<(Simulation, ProtocolRuntime, LinkTopology, u64)> {
        let horizon = VirtualTime::new(self.config.horizon);
        let (mut sim, mut rt, topology) = self.build()?;
        let processed = sim.run_until(horizon, &mut rt)?;
        Ok((sim, rt, topology, processed))
    }
}
