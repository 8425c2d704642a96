pub mod analyzer;
pub mod logger;

use crate::agent::{AgentLearner, CollabAction, Stabilization};
use crate::error::SimResult;
use crate::network::{AgentId, AreaId, NetworkId, ResourcePool, Tick};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub id: NetworkId,
    pub capacity: f64,
    pub occupants: Vec<AgentId>,
}

/// What one agent did and learnt during one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent: AgentId,
    pub area: AreaId,
    pub active: bool,
    pub network: Option<NetworkId>,
    pub available: Vec<NetworkId>,
    pub weights: Vec<f64>,
    pub probabilities: Vec<f64>,
    pub delay_s: f64,
    pub gain: f64,
    pub download_mb: f64,
    /// Share each available network would give this agent.
    pub counterfactual: Vec<f64>,
    pub explored: bool,
    pub transmissions: usize,
    pub listens: usize,
    pub stabilized: Option<Stabilization>,
}

impl AgentRecord {
    pub fn from_agent(agent: &AgentLearner, pool: &ResourcePool) -> SimResult<Self> {
        let counterfactual = agent
            .available()
            .iter()
            .map(|&n| pool.counterfactual_share(agent.id(), n))
            .collect::<SimResult<Vec<f64>>>()?;
        let count = |action: CollabAction| agent.actions().iter().filter(|&&a| a == action).count();
        Ok(Self {
            agent: agent.id(),
            area: agent.area(),
            active: agent.is_active(),
            network: agent.current(),
            available: agent.available().to_vec(),
            weights: agent.weights().to_vec(),
            probabilities: agent.probabilities().to_vec(),
            delay_s: agent.delay(),
            gain: agent.gain(),
            download_mb: agent.download() / 8.0,
            counterfactual,
            explored: agent.is_exploring(),
            transmissions: count(CollabAction::Transmit),
            listens: count(CollabAction::Listen),
            stabilized: agent.stabilized(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick: Tick,
    pub networks: Vec<NetworkState>,
    pub agents: Vec<AgentRecord>,
}

impl TickSnapshot {
    pub fn capture(tick: Tick, pool: &ResourcePool, agents: &[AgentLearner]) -> SimResult<Self> {
        let networks = pool
            .snapshot()
            .into_iter()
            .map(|n| NetworkState {
                id: n.id,
                capacity: n.capacity,
                occupants: n.occupants().copied().collect(),
            })
            .collect();
        let agents = agents
            .iter()
            .filter(|a| a.is_active())
            .map(|a| AgentRecord::from_agent(a, pool))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self { tick, networks, agents })
    }

    /// Occupant counts ordered by network id.
    pub fn occupancy(&self) -> Vec<usize> {
        self.networks.iter().map(|n| n.occupants.len()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: usize,
    pub switches: u64,
    pub explorations: u64,
    pub transmissions: u64,
    pub listens: u64,
    pub total_download_mb: f64,
    pub mean_gain: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    snapshots: Vec<TickSnapshot>,
    switches: u64,
    explorations: u64,
    transmissions: u64,
    listens: u64,
    total_download_mb: f64,
    gain_sum: f64,
    gain_samples: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, snapshot: TickSnapshot) {
        let mut inner = self.inner.write();
        for agent in &snapshot.agents {
            // a delay is only paid on a switch
            if agent.delay_s > 0.0 {
                inner.switches += 1;
            }
            if agent.explored {
                inner.explorations += 1;
            }
            inner.transmissions += agent.transmissions as u64;
            inner.listens += agent.listens as u64;
            inner.total_download_mb += agent.download_mb;
            inner.gain_sum += agent.gain;
            inner.gain_samples += 1;
        }
        inner.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.inner.read().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<TickSnapshot> {
        self.inner.read().snapshots.last().cloned()
    }

    pub fn get_snapshots(&self) -> Vec<TickSnapshot> {
        self.inner.read().snapshots.clone()
    }

    pub fn occupancy_series(&self) -> Vec<(Tick, Vec<usize>)> {
        self.inner
            .read()
            .snapshots
            .iter()
            .map(|s| (s.tick, s.occupancy()))
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        let inner = self.inner.read();
        RunSummary {
            ticks: inner.snapshots.len(),
            switches: inner.switches,
            explorations: inner.explorations,
            transmissions: inner.transmissions,
            listens: inner.listens,
            total_download_mb: inner.total_download_mb,
            mean_gain: if inner.gain_samples > 0 {
                inner.gain_sum / inner.gain_samples as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(agent: AgentId, gain: f64, delay_s: f64) -> AgentRecord {
        AgentRecord {
            agent,
            area: 1,
            active: true,
            network: Some(1),
            available: vec![1],
            weights: vec![1.0],
            probabilities: vec![1.0],
            delay_s,
            gain,
            download_mb: gain,
            counterfactual: vec![gain],
            explored: false,
            transmissions: 1,
            listens: 0,
            stabilized: None,
        }
    }

    #[test]
    fn collector_aggregates_across_clones() {
        let metrics = MetricsCollector::new();
        let shared = metrics.clone();
        shared.record(TickSnapshot {
            tick: 1,
            networks: vec![NetworkState { id: 1, capacity: 10.0, occupants: vec![1, 2] }],
            agents: vec![record(1, 5.0, 4.0), record(2, 5.0, 0.0)],
        });

        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics.occupancy_series(), vec![(1, vec![2])]);
        let summary = metrics.summary();
        assert_eq!(summary.switches, 1);
        assert_eq!(summary.transmissions, 2);
        assert_eq!(summary.mean_gain, 5.0);
    }
}
