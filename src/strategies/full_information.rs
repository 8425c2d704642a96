// Baseline without gossip: every agent reads the whole pool after selecting.

use super::Strategy;
use crate::error::SimResult;
use crate::network::{AgentId, NetworkId, ResourcePool};

#[derive(Debug, Clone, Copy)]
pub struct FullInformation;

impl Strategy for FullInformation {
    fn name(&self) -> &str {
        "FullInformation"
    }

    fn mix(&self, weights: &[f64]) -> Vec<f64> {
        let total: f64 = weights.iter().sum();
        weights.iter().map(|w| w / total).collect()
    }

    fn collaborative(&self) -> bool {
        false
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// Loss of every available network against the best counterfactual share,
/// scaled by the agent's running max gain.
pub fn full_information_loss(
    pool: &ResourcePool,
    owner: AgentId,
    available: &[NetworkId],
    max_gain: f64,
) -> SimResult<Vec<f64>> {
    let scaled = available
        .iter()
        .map(|&n| Ok(pool.counterfactual_share(owner, n)? / max_gain))
        .collect::<SimResult<Vec<f64>>>()?;
    let best = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(scaled.iter().map(|g| best - g).collect())
}
