//! Aggregate statistics of a finished (or paused) link run, exportable as
//! JSON.

use serde::Serialize;

use crate::backend::BackendStats;
use crate::channel::ChannelKind;
use crate::dsl::{LinkTopology, NodeProtocols};
use crate::error::{LinkError, LinkResult};
use crate::link::{CreationId, Egp, EgpStats, Mhp, MhpStats, MidpointStation, MidpointStats, OkResponse};
use crate::protocol::{ProtocolId, ProtocolRuntime};
use crate::simulation::Simulation;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub mhp: MhpStats,
    pub egp: EgpStats,
    pub responses: Vec<OkResponse>,
    pub completed: Vec<CreationId>,
    pub abandoned: Vec<CreationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkReport {
    pub time: u64,
    pub events_processed: u64,
    /// Present when event logging was enabled.
    pub log_hash: Option<u64>,
    pub midpoint: MidpointStats,
    pub backend: BackendStats,
    pub classical_messages: usize,
    pub quantum_messages: usize,
    pub alice: NodeReport,
    pub bob: NodeReport,
}

impl LinkReport {
    pub fn collect(sim: &Simulation, rt: &ProtocolRuntime, topology: &LinkTopology) -> LinkResult<Self> {
        let midpoint = lookup::<MidpointStation>(rt, topology.midpoint, "midpoint station")?;
        Ok(LinkReport {
            time: sim.current_time().ticks(),
            events_processed: sim.events_processed(),
            log_hash: sim.event_log().map(|log| log.log_hash()),
            midpoint: midpoint.stats(),
            backend: rt.backend().stats(),
            classical_messages: rt.channels().count(ChannelKind::Classical),
            quantum_messages: rt.channels().count(ChannelKind::Quantum),
            alice: node_report(rt, topology.alice)?,
            bob: node_report(rt, topology.bob)?,
        })
    }

    /// Pairs delivered on both ends.
    pub fn delivered_pairs(&self) -> (usize, usize) {
        (self.alice.responses.len(), self.bob.responses.len())
    }

    pub fn to_json(&self) -> LinkResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| LinkError::Export(e.to_string()))
    }
}

fn lookup<'a, T: crate::protocol::Protocol + 'static>(
    rt: &'a ProtocolRuntime,
    id: ProtocolId,
    expected: &'static str,
) -> LinkResult<&'a T> {
    rt.protocol::<T>(id).ok_or(LinkError::ProtocolTypeMismatch { protocol: id, expected })
}

fn node_report(rt: &ProtocolRuntime, node: NodeProtocols) -> LinkResult<NodeReport> {
    let mhp = lookup::<Mhp>(rt, node.mhp, "MHP")?;
    let egp = lookup::<Egp>(rt, node.egp, "EGP")?;
    Ok(NodeReport {
        mhp: mhp.stats(),
        egp: egp.stats(),
        responses: egp.responses().to_vec(),
        completed: egp.completed().to_vec(),
        abandoned: egp.abandoned().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AttemptOutcome, ScriptedBackend};
    use crate::dsl::{LinkBuilder, LinkConfig};
    use crate::link::{CreateRequest, Side};

    #[test]
    fn test_report_counts_and_exports() {
        let mut config = LinkConfig::default();
        config.horizon = 60_000;
        let (sim, rt, topology, _) = LinkBuilder::new(config)
            .with_logging()
            .backend(ScriptedBackend::always(AttemptOutcome::EntangledPsiMinus))
            .request_at(0, Side::A, CreateRequest::new(8, 1))
            .run()
            .unwrap();

        let report = LinkReport::collect(&sim, &rt, &topology).unwrap();
        assert_eq!(report.delivered_pairs(), (1, 1));
        assert_eq!(report.classical_messages, 1);
        assert!(report.log_hash.is_some());
        assert_eq!(report.time, 60_000);
        // Only the corrector side rotates Ψ−.
        assert_eq!(report.backend.corrections, 1);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"purpose_id\": 8"));
        assert!(json.contains("\"classical_messages\": 1"));
    }
}
