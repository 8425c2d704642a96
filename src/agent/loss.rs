// Importance-weighted loss estimate over the history window.
//
// For snapshot s and network i: gain is known only if someone reported on i,
// loss = max(known scaled gains) - gain, and the loss is divided by the
// probability that i would have been heard of at all.

use super::history::{HistoryBuffer, NetworkRecord};
use crate::error::{SimError, SimResult};
use crate::network::{AgentId, NetworkId, Tick};

#[derive(Debug, Clone, PartialEq)]
pub struct LossEstimate {
    /// Estimated loss per available network.
    pub losses: Vec<f64>,
    /// Unscaled gain per snapshot (oldest first) and network, `None` when unknown.
    pub gains: Vec<(Tick, Vec<Option<f64>>)>,
}

/// Gain the owner got, or would likely get by joining.
pub fn inferred_gain(record: &NetworkRecord, owner: AgentId) -> Option<f64> {
    if record.contributors.is_empty() {
        return None;
    }
    if record.contributors.contains(&owner) {
        return Some(record.aggregate_rate);
    }
    let per_occupant = record.aggregate_rate / record.contributors.len() as f64;
    let occupants = record.occupants as f64;
    Some(per_occupant * occupants / (occupants + 1.0))
}

/// Probability that at least one reporter would have selected the network.
pub fn knowing_probability(reported: &[f64]) -> f64 {
    match reported {
        [p] => *p,
        ps => 1.0 - ps.iter().map(|p| 1.0 - p).product::<f64>(),
    }
}

/// `max_gain` is the running scaling denominator; it grows if the window
/// holds a larger gain than seen before.
pub fn estimate_loss(
    history: &HistoryBuffer,
    owner: AgentId,
    available: &[NetworkId],
    max_gain: &mut f64,
) -> SimResult<LossEstimate> {
    let mut gains = Vec::with_capacity(history.len());
    let mut knowing = Vec::with_capacity(history.len());

    for snapshot in history.iter() {
        let mut row = Vec::with_capacity(available.len());
        let mut probs = Vec::with_capacity(available.len());
        for &network in available {
            let record = snapshot.record(network).ok_or(SimError::UnknownNetwork(network))?;
            row.push(inferred_gain(record, owner));
            probs.push(knowing_probability(&record.reported_probabilities));
        }
        if let Some(best) = row.iter().flatten().copied().reduce(f64::max) {
            *max_gain = max_gain.max(best);
        }
        gains.push((snapshot.tick, row));
        knowing.push(probs);
    }

    let mut losses = vec![0.0; available.len()];
    if gains.is_empty() {
        return Ok(LossEstimate { losses, gains });
    }
    let weight = 1.0 / gains.len() as f64;

    for ((tick, row), probs) in gains.iter().zip(&knowing) {
        let scaled: Vec<Option<f64>> = row.iter().map(|g| g.map(|g| g / *max_gain)).collect();
        // a lone known gain has nothing to be compared against
        if scaled.iter().flatten().count() < 2 {
            continue;
        }
        let best = scaled.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
        for (i, gain) in scaled.iter().enumerate() {
            let Some(gain) = gain else { continue };
            if probs[i] <= 0.0 {
                return Err(SimError::ZeroKnowledgeProbability {
                    agent: owner,
                    network: available[i],
                    tick: *tick,
                });
            }
            losses[i] += weight * (best - gain) / probs[i];
        }
    }

    Ok(LossEstimate { losses, gains })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::history::Recency;
    use crate::network::{FeedbackSet, Observation};

    fn obs(tick: Tick, sender: AgentId, network: NetworkId, gain: f64, occupants: usize, probs: Vec<f64>) -> Observation {
        Observation {
            tick,
            sender,
            network,
            gain,
            occupants,
            available: vec![1, 2, 3],
            probabilities: probs,
            ttl: 2,
        }
    }

    fn history_with(feedback: Vec<Observation>) -> HistoryBuffer {
        let mut history = HistoryBuffer::new(0);
        let mut recency = Recency::unknown(3);
        let set: FeedbackSet = feedback.into_iter().collect();
        history.consolidate(1, 1, &[1, 2, 3], &set, &mut recency).unwrap();
        history
    }

    #[test]
    fn knowing_probability_combines_reporters() {
        assert_eq!(knowing_probability(&[0.4]), 0.4);
        assert!((knowing_probability(&[0.5, 0.5]) - 0.75).abs() < 1e-12);
        assert_eq!(knowing_probability(&[]), 0.0);
    }

    #[test]
    fn neighbour_gain_is_discounted_for_joining() {
        let mut record = NetworkRecord::default();
        record.aggregate_rate = 22.0;
        record.contributors.extend([2, 3]);
        record.occupants = 2;
        let g = inferred_gain(&record, 1).unwrap();
        assert!((g - 11.0 * 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(inferred_gain(&NetworkRecord::default(), 1), None);
    }

    #[test]
    fn better_network_gets_zero_loss_worse_gets_importance_weighted_loss() {
        // agent 1 on network 1 (4 Mbps), agent 2 reports network 3 (22 Mbps, alone)
        let history = history_with(vec![
            obs(1, 1, 1, 4.0, 1, vec![0.5, 0.25, 0.25]),
            obs(1, 2, 3, 22.0, 1, vec![0.5, 0.25, 0.25]),
        ]);
        let mut max_gain = 22.0;
        let est = estimate_loss(&history, 1, &[1, 2, 3], &mut max_gain).unwrap();

        // network 3 inferred at 22 * 1/2 = 11, scaled 0.5; own 4/22
        let p1 = 1.0 - 0.5 * 0.5;
        let expected = (0.5 - 4.0 / 22.0) / p1;
        assert!((est.losses[0] - expected).abs() < 1e-12);
        assert_eq!(est.losses[1], 0.0);
        assert_eq!(est.losses[2], 0.0);
        assert_eq!(est.gains[0].1, vec![Some(4.0), None, Some(11.0)]);
    }

    #[test]
    fn single_known_gain_yields_no_loss() {
        let history = history_with(vec![obs(1, 1, 2, 7.0, 1, vec![0.0, 1.0, 0.0])]);
        let mut max_gain = 22.0;
        let est = estimate_loss(&history, 1, &[1, 2, 3], &mut max_gain).unwrap();
        assert_eq!(est.losses, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_probability_of_knowing_is_an_error() {
        let history = history_with(vec![
            obs(1, 1, 1, 4.0, 1, vec![0.0, 0.5, 0.5]),
            obs(1, 2, 3, 22.0, 1, vec![0.0, 0.5, 0.5]),
        ]);
        let mut max_gain = 22.0;
        let err = estimate_loss(&history, 1, &[1, 2, 3], &mut max_gain).unwrap_err();
        assert_eq!(err, SimError::ZeroKnowledgeProbability { agent: 1, network: 1, tick: 1 });
    }

    #[test]
    fn max_gain_grows_with_observed_gains() {
        let history = history_with(vec![
            obs(1, 1, 3, 30.0, 1, vec![0.2, 0.2, 0.6]),
            obs(1, 2, 1, 4.0, 1, vec![0.2, 0.2, 0.6]),
        ]);
        let mut max_gain = 22.0;
        estimate_loss(&history, 1, &[1, 2, 3], &mut max_gain).unwrap();
        assert_eq!(max_gain, 30.0);
    }
}
