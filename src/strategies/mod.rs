pub mod ewa;
pub mod full_information;

use std::collections::HashMap;
use std::fmt;

/// A network-selection algorithm: how weights become a distribution, and
/// whether the agent learns from gossip or from full knowledge of the pool.
pub trait Strategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn mix(&self, weights: &[f64]) -> Vec<f64>;
    fn collaborative(&self) -> bool;
    fn clone_box(&self) -> Box<dyn Strategy>;
}

impl Clone for Box<dyn Strategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

type StrategyFactory = Box<dyn Fn(f64) -> Box<dyn Strategy> + Send + Sync>;

/// Name -> factory. Factories take the exploration rate γ.
pub struct StrategyRegistry {
    strategies: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register("collaborative-ewa", |gamma| Box::new(ewa::CollaborativeEwa::new(gamma)));
        self.register("collaborativeewa", |gamma| Box::new(ewa::CollaborativeEwa::new(gamma)));
        self.register("full-information", |_| Box::new(full_information::FullInformation));
        self.register("fullinformation", |_| Box::new(full_information::FullInformation));
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(f64) -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.strategies.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, name: &str, gamma: f64) -> Option<Box<dyn Strategy>> {
        self.strategies
            .get(&name.to_lowercase())
            .map(|factory| factory(gamma))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(&name.to_lowercase())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn global() -> &'static StrategyRegistry {
        use std::sync::OnceLock;
        static REGISTRY: OnceLock<StrategyRegistry> = OnceLock::new();
        REGISTRY.get_or_init(StrategyRegistry::new)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
