use super::Strategy;

/// Exponentially weighted average with a uniform exploration term, learning
/// from observations gossiped between neighbours.
#[derive(Debug, Clone)]
pub struct CollaborativeEwa {
    gamma: f64,
}

impl CollaborativeEwa {
    pub fn new(gamma: f64) -> Self {
        Self {
            gamma: gamma.clamp(0.0, 1.0),
        }
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl Strategy for CollaborativeEwa {
    fn name(&self) -> &str {
        "CollaborativeEWA"
    }

    // p_i = (1 - γ) w_i / Σw + γ / k
    fn mix(&self, weights: &[f64]) -> Vec<f64> {
        let total: f64 = weights.iter().sum();
        let uniform = self.gamma / weights.len() as f64;
        weights
            .iter()
            .map(|w| (1.0 - self.gamma) * (w / total) + uniform)
            .collect()
    }

    fn collaborative(&self) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_keeps_exploration_mass() {
        let ewa = CollaborativeEwa::new(0.3);
        let p = ewa.mix(&[1.0, 0.0, 0.0]);
        assert!((p[0] - (0.7 + 0.1)).abs() < 1e-12);
        assert!((p[1] - 0.1).abs() < 1e-12);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
