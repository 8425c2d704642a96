pub mod observation;

pub use observation::{FeedbackSet, Observation, ObservationKey};

use crate::error::{SimError, SimResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type AgentId = u32;
pub type NetworkId = u32;
pub type AreaId = u32;
pub type Tick = u32;

/// A shared wireless network. Capacity is the data rate in Mbps, split evenly
/// between everyone associated with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub capacity: f64,
    occupants: BTreeSet<AgentId>,
}

impl Network {
    pub fn new(id: NetworkId, capacity: f64) -> Self {
        Self {
            id,
            capacity,
            occupants: BTreeSet::new(),
        }
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn occupants(&self) -> impl Iterator<Item = &AgentId> {
        self.occupants.iter()
    }

    pub fn per_agent_share(&self) -> f64 {
        self.capacity / self.occupants.len().max(1) as f64
    }
}

/// Every network in the service area. Each network sits behind its own lock so
/// concurrent join/leave calls on different networks never contend.
#[derive(Debug)]
pub struct ResourcePool {
    networks: Vec<RwLock<Network>>,
    index: HashMap<NetworkId, usize>,
}

impl ResourcePool {
    /// Networks get ids `1..=capacities.len()` in the given order.
    pub fn new(capacities: &[f64]) -> Self {
        let networks: Vec<RwLock<Network>> = capacities
            .iter()
            .enumerate()
            .map(|(i, &cap)| RwLock::new(Network::new(i as NetworkId + 1, cap)))
            .collect();
        let index = (0..networks.len()).map(|i| (i as NetworkId + 1, i)).collect();
        Self { networks, index }
    }

    fn network(&self, id: NetworkId) -> SimResult<&RwLock<Network>> {
        self.index
            .get(&id)
            .map(|&i| &self.networks[i])
            .ok_or(SimError::UnknownNetwork(id))
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<NetworkId> {
        (1..=self.networks.len() as NetworkId).collect()
    }

    pub fn capacities(&self) -> Vec<f64> {
        self.networks.iter().map(|n| n.read().capacity).collect()
    }

    pub fn capacity(&self, id: NetworkId) -> SimResult<f64> {
        Ok(self.network(id)?.read().capacity)
    }

    /// Idempotent.
    pub fn join(&self, agent: AgentId, id: NetworkId) -> SimResult<()> {
        self.network(id)?.write().occupants.insert(agent);
        Ok(())
    }

    /// No-op when the agent is not associated; callers may hold stale state.
    pub fn leave(&self, agent: AgentId, id: NetworkId) -> SimResult<()> {
        self.network(id)?.write().occupants.remove(&agent);
        Ok(())
    }

    pub fn occupant_count(&self, id: NetworkId) -> SimResult<usize> {
        Ok(self.network(id)?.read().occupant_count())
    }

    pub fn occupants(&self, id: NetworkId) -> SimResult<Vec<AgentId>> {
        Ok(self.network(id)?.read().occupants().copied().collect())
    }

    pub fn per_agent_share(&self, id: NetworkId) -> SimResult<f64> {
        Ok(self.network(id)?.read().per_agent_share())
    }

    /// What `agent` gets (or would get by switching) from network `id`.
    pub fn counterfactual_share(&self, agent: AgentId, id: NetworkId) -> SimResult<f64> {
        let net = self.network(id)?.read();
        if net.occupants.contains(&agent) {
            Ok(net.per_agent_share())
        } else {
            Ok(net.capacity / (net.occupant_count() + 1) as f64)
        }
    }

    /// Mbits downloaded during one slot, after the association delay is paid.
    pub fn per_agent_download(&self, id: NetworkId, slot_duration_s: f64, delay_s: f64) -> SimResult<f64> {
        Ok(self.per_agent_share(id)? * (slot_duration_s - delay_s).max(0.0))
    }

    /// Occupant counts ordered by network id.
    pub fn occupancy(&self) -> Vec<usize> {
        self.networks.iter().map(|n| n.read().occupant_count()).collect()
    }

    pub fn snapshot(&self) -> Vec<Network> {
        self.networks.iter().map(|n| n.read().clone()).collect()
    }
}
