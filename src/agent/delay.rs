use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Time lost (seconds) when an agent switches networks. Drawn from a Johnson SU
/// distribution fitted to measured WiFi handovers, clamped into [min_s, max_s].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssociationDelay {
    pub min_s: f64,
    pub max_s: f64,
    pub gamma: f64,
    pub delta: f64,
    pub loc: f64,
    pub scale: f64,
}

impl Default for AssociationDelay {
    fn default() -> Self {
        Self {
            min_s: 3.0659475327,
            max_s: 14.6918344498,
            gamma: 0.29822254217554717,
            delta: 0.71688524931466857,
            loc: 6.6093350624107909,
            scale: 0.5595970482712973,
        }
    }
}

impl AssociationDelay {
    /// Only applies on a switch; staying put costs nothing.
    pub fn sample<R: Rng + ?Sized>(&self, switched: bool, rng: &mut R) -> f64 {
        if !switched {
            return 0.0;
        }
        let z: f64 = StandardNormal.sample(rng);
        let raw = self.loc + self.scale * ((z - self.gamma) / self.delta).sinh();
        raw.clamp(self.min_s, self.max_s)
    }
}
