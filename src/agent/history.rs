use crate::error::{SimError, SimResult};
use crate::network::{AgentId, FeedbackSet, NetworkId, Observation, Tick};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// What an agent knows about one network during one past tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkRecord {
    /// Sum of the bit rates reported by `contributors`, or the agent's own
    /// bit rate when it was associated itself.
    pub aggregate_rate: f64,
    pub contributors: BTreeSet<AgentId>,
    /// One entry per reporter: its probability of having selected this network.
    pub reported_probabilities: Vec<f64>,
    pub occupants: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub tick: Tick,
    records: BTreeMap<NetworkId, NetworkRecord>,
}

impl Snapshot {
    pub fn empty(tick: Tick, available: &[NetworkId]) -> Self {
        Self {
            tick,
            records: available.iter().map(|&n| (n, NetworkRecord::default())).collect(),
        }
    }

    pub fn record(&self, network: NetworkId) -> Option<&NetworkRecord> {
        self.records.get(&network)
    }

    pub fn records(&self) -> impl Iterator<Item = (&NetworkId, &NetworkRecord)> {
        self.records.iter()
    }

    /// Keeps records of networks still available, starts new ones empty.
    pub fn remap(&mut self, available: &[NetworkId]) {
        let mut old = std::mem::take(&mut self.records);
        self.records = available
            .iter()
            .map(|&n| (n, old.remove(&n).unwrap_or_default()))
            .collect();
    }
}

/// When each available network was last heard of and how many occupants it
/// had then. Indexed like the agent's available-network list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recency {
    pub last_heard: Vec<Option<Tick>>,
    pub occupancy: Vec<Option<usize>>,
}

impl Recency {
    pub fn unknown(len: usize) -> Self {
        Self {
            last_heard: vec![None; len],
            occupancy: vec![None; len],
        }
    }

    pub fn heard_all_at(len: usize, tick: Tick) -> Self {
        Self {
            last_heard: vec![Some(tick); len],
            occupancy: vec![None; len],
        }
    }

    /// Ticks since the network was last heard of; never-heard counts from tick 0.
    pub fn age(&self, index: usize, tick: Tick) -> Tick {
        tick.saturating_sub(self.last_heard[index].unwrap_or(0))
    }

    /// Networks not heard of for more than `max_unheard` ticks.
    pub fn unheard(&self, available: &[NetworkId], tick: Tick, max_unheard: Tick) -> Vec<NetworkId> {
        available
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.age(i, tick) > max_unheard)
            .map(|(_, &n)| n)
            .collect()
    }

    fn heard(&mut self, index: usize, tick: Tick, occupants: usize) {
        if self.last_heard[index].is_none_or(|t| t < tick) {
            self.last_heard[index] = Some(tick);
            self.occupancy[index] = Some(occupants);
        }
    }
}

/// Ring buffer of the last `delay + 1` snapshots, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryBuffer {
    depth: usize,
    entries: VecDeque<Snapshot>,
}

impl HistoryBuffer {
    pub fn new(delay: u32) -> Self {
        let depth = delay as usize + 1;
        Self {
            depth,
            entries: VecDeque::with_capacity(depth),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.entries.len() == self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Gives an agent entering the area at `tick` a full window of empty
    /// snapshots, so forwarded observations from before its arrival still map.
    pub fn prefill(&mut self, tick: Tick, available: &[NetworkId]) {
        self.entries.clear();
        for age in (1..self.depth as Tick).rev() {
            self.push(Snapshot::empty(tick.saturating_sub(age), available));
        }
    }

    pub fn remap(&mut self, available: &[NetworkId]) {
        self.entries.iter_mut().for_each(|s| s.remap(available));
    }

    /// Appends the snapshot for `tick` and folds everything learnt this tick
    /// into the snapshots the observations belong to.
    pub fn consolidate(
        &mut self,
        tick: Tick,
        owner: AgentId,
        available: &[NetworkId],
        feedback: &FeedbackSet,
        recency: &mut Recency,
    ) -> SimResult<()> {
        self.push(Snapshot::empty(tick, available));
        for obs in feedback.iter() {
            self.fold(tick, owner, available, obs, recency)?;
        }
        Ok(())
    }

    fn fold(
        &mut self,
        tick: Tick,
        owner: AgentId,
        available: &[NetworkId],
        obs: &Observation,
        recency: &mut Recency,
    ) -> SimResult<()> {
        // forwarded from another area
        let Some(slot) = available.iter().position(|&n| n == obs.network) else {
            return Ok(());
        };
        recency.heard(slot, obs.tick, obs.occupants);

        let depth = self.entries.len();
        let out_of_range = || SimError::HistoryOutOfRange {
            agent: owner,
            current: tick,
            observed: obs.tick,
            depth,
        };
        let index = tick
            .checked_sub(obs.tick)
            .and_then(|age| depth.saturating_sub(1).checked_sub(age as usize))
            .ok_or_else(out_of_range)?;
        let snapshot = &mut self.entries[index];
        if snapshot.tick != obs.tick {
            return Err(out_of_range());
        }

        let record = snapshot
            .records
            .get_mut(&obs.network)
            .ok_or(SimError::UnknownNetwork(obs.network))?;
        if record.contributors.contains(&obs.sender) {
            return Ok(());
        }
        if obs.sender == owner {
            // own measurement is exact
            record.aggregate_rate = obs.gain;
        } else if !record.contributors.contains(&owner) {
            record.aggregate_rate += obs.gain;
        }
        record.contributors.insert(obs.sender);
        record.occupants = obs.occupants;

        for &network in available {
            if let Some(p) = obs.probability_for(network) {
                if let Some(r) = snapshot.records.get_mut(&network) {
                    r.reported_probabilities.push(p);
                }
            }
        }
        Ok(())
    }
}
