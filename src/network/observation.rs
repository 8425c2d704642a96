use super::{AgentId, NetworkId, Tick};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Identity of an observation. Two observations with the same key carry the
/// same payload, only their ttl can differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservationKey {
    pub tick: Tick,
    pub sender: AgentId,
    pub network: NetworkId,
}

/// What one agent saw during one tick, as gossiped to its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tick: Tick,
    pub sender: AgentId,
    pub network: NetworkId,
    /// Bit rate the sender got from `network` (Mbps).
    pub gain: f64,
    /// Occupants of `network` when the sender observed it.
    pub occupants: usize,
    /// Sender's available networks; `probabilities` follows this ordering.
    pub available: Vec<NetworkId>,
    pub probabilities: Vec<f64>,
    pub ttl: u32,
}

impl Observation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            tick: self.tick,
            sender: self.sender,
            network: self.network,
        }
    }

    /// The sender's reported probability of selecting `network`, if the
    /// sender can see it at all.
    pub fn probability_for(&self, network: NetworkId) -> Option<f64> {
        self.available
            .iter()
            .position(|&n| n == network)
            .and_then(|i| self.probabilities.get(i).copied())
    }
}

/// Deduplicated set of observations. Iteration follows key order, so the
/// result of folding a set never depends on the order writers arrived in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSet {
    entries: BTreeMap<ObservationKey, Observation>,
}

impl FeedbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// First writer wins. Returns false for a duplicate.
    pub fn insert(&mut self, observation: Observation) -> bool {
        match self.entries.entry(observation.key()) {
            Entry::Vacant(slot) => {
                slot.insert(observation);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn merge(&mut self, other: &FeedbackSet) {
        for obs in other.entries.values() {
            self.insert(obs.clone());
        }
    }

    /// Ages every observation by one tick and drops the expired ones.
    pub fn decrement_ttl(&mut self) {
        self.entries.retain(|_, obs| {
            obs.ttl = obs.ttl.saturating_sub(1);
            obs.ttl > 0
        });
    }

    pub fn contains(&self, key: &ObservationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &ObservationKey) -> Option<&Observation> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<Observation> for FeedbackSet {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        let mut set = Self::new();
        for obs in iter {
            set.insert(obs);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(tick: Tick, sender: AgentId, network: NetworkId, ttl: u32) -> Observation {
        Observation {
            tick,
            sender,
            network,
            gain: 7.0,
            occupants: 1,
            available: vec![1, 2, 3],
            probabilities: vec![0.2, 0.3, 0.5],
            ttl,
        }
    }

    #[test]
    fn duplicate_keys_keep_the_first_copy() {
        let mut set = FeedbackSet::new();
        assert!(set.insert(obs(1, 2, 3, 4)));
        assert!(!set.insert(obs(1, 2, 3, 1)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().ttl, 4);
    }

    #[test]
    fn merging_with_itself_changes_nothing() {
        let set: FeedbackSet = vec![obs(1, 1, 1, 2), obs(1, 2, 3, 2), obs(2, 1, 2, 3)]
            .into_iter()
            .collect();
        let mut merged = set.clone();
        merged.merge(&set);
        assert_eq!(merged, set);
    }

    #[test]
    fn ttl_expires_after_exactly_ttl_decrements() {
        let mut set: FeedbackSet = vec![obs(1, 1, 1, 3), obs(1, 2, 1, 1)].into_iter().collect();
        set.decrement_ttl();
        assert_eq!(set.len(), 1);
        set.decrement_ttl();
        assert_eq!(set.len(), 1);
        set.decrement_ttl();
        assert!(set.is_empty());
    }

    #[test]
    fn probability_lookup_follows_sender_ordering() {
        let mut o = obs(1, 1, 3, 1);
        o.available = vec![3, 1];
        o.probabilities = vec![0.9, 0.1];
        assert_eq!(o.probability_for(3), Some(0.9));
        assert_eq!(o.probability_for(1), Some(0.1));
        assert_eq!(o.probability_for(2), None);
    }
}
