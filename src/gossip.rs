// Broadcast medium shared by every agent of a service area.

use crate::network::{AreaId, FeedbackSet, Observation};
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct GossipChannel {
    areas: DashMap<AreaId, FeedbackSet>,
}

impl GossipChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if an observation with the same key was already heard.
    pub fn broadcast(&self, area: AreaId, observation: Observation) -> bool {
        self.areas.entry(area).or_default().insert(observation)
    }

    /// Broadcasts a whole message inside one critical section.
    pub fn broadcast_all(&self, area: AreaId, message: &FeedbackSet) {
        let mut buffer = self.areas.entry(area).or_default();
        let before = buffer.len();
        buffer.merge(message);
        debug!("area {} gossip buffer {} -> {} observations", area, before, buffer.len());
    }

    /// Non-destructive; every listener gets the same data.
    pub fn listen(&self, area: AreaId) -> FeedbackSet {
        self.areas
            .get(&area)
            .map(|buffer| buffer.value().clone())
            .unwrap_or_default()
    }

    pub fn reset_tick(&self, area: AreaId) {
        if let Some(mut buffer) = self.areas.get_mut(&area) {
            buffer.clear();
        }
    }

    pub fn reset_all(&self) {
        self.areas.iter_mut().for_each(|mut buffer| buffer.clear());
    }

    pub fn len(&self, area: AreaId) -> usize {
        self.areas.get(&area).map_or(0, |buffer| buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn obs(sender: u32, network: u32) -> Observation {
        Observation {
            tick: 1,
            sender,
            network,
            gain: 4.0,
            occupants: 1,
            available: vec![1, 2],
            probabilities: vec![0.5, 0.5],
            ttl: 2,
        }
    }

    #[test]
    fn duplicate_broadcasts_are_dropped() {
        let channel = GossipChannel::new();
        assert!(channel.broadcast(1, obs(1, 2)));
        assert!(!channel.broadcast(1, obs(1, 2)));
        assert_eq!(channel.len(1), 1);
    }

    #[test]
    fn areas_are_isolated_and_listening_does_not_consume() {
        let channel = GossipChannel::new();
        channel.broadcast(1, obs(1, 1));
        channel.broadcast(2, obs(2, 1));
        assert_eq!(channel.listen(1).len(), 1);
        assert_eq!(channel.listen(1).len(), 1);
        assert!(channel.listen(3).is_empty());

        channel.reset_tick(1);
        assert!(channel.listen(1).is_empty());
        assert_eq!(channel.len(2), 1);

        channel.reset_all();
        assert_eq!(channel.len(2), 0);
    }

    #[test]
    fn concurrent_broadcasts_converge_to_the_same_set() {
        let channel = GossipChannel::new();
        (0..64u32).into_par_iter().for_each(|i| {
            let message: FeedbackSet = vec![obs(i % 8, 1), obs(i % 8, 2)].into_iter().collect();
            channel.broadcast_all(1, &message);
        });
        assert_eq!(channel.len(1), 16);
    }
}
