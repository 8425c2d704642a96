use super::scenario::{Scenario, TransmitPolicy};
use crate::agent::{AssociationDelay, LearnerParams};
use crate::error::{SimError, SimResult};
use crate::metrics::analyzer::{EquilibriumPhase, EquilibriumSchedule};
use crate::network::Tick;
use crate::strategies::StrategyRegistry;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stabilisations first seen this close to the end of a run are not recorded.
const STABILIZATION_TAIL: Tick = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub name: String,
    pub strategy_name: String,
    pub num_agents: u32,
    /// Mbps, one entry per network; network ids follow this order from 1.
    pub capacities: Vec<f64>,
    pub ticks: Tick,
    pub sub_ticks: u32,
    /// How many ticks late an observation may arrive and still be used.
    pub delay: u32,
    pub eta: f64,
    pub gamma: f64,
    pub transmit_probability: f64,
    /// Scenario default when absent.
    pub transmit_policy: Option<TransmitPolicy>,
    pub listen_probability: f64,
    pub max_unheard: Tick,
    pub slot_duration_s: f64,
    pub weight_floor: f64,
    pub converged_probability: f64,
    pub seed: u64,
    pub association_delay: AssociationDelay,
    pub scenario: Scenario,
    /// Derived from the scenario when absent.
    pub equilibria: Option<Vec<EquilibriumPhase>>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "default_sim".to_string(),
            strategy_name: "collaborative-ewa".to_string(),
            num_agents: 3,
            capacities: vec![4.0, 7.0, 22.0],
            ticks: 300,
            sub_ticks: 1,
            delay: 2,
            eta: 20.0,
            gamma: 0.1,
            transmit_probability: 0.5,
            transmit_policy: None,
            listen_probability: 0.5,
            max_unheard: 10,
            slot_duration_s: 15.0,
            weight_floor: f64::MIN_POSITIVE,
            converged_probability: 0.75,
            seed: 42,
            association_delay: AssociationDelay::default(),
            scenario: Scenario::Static,
            equilibria: None,
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy_name = strategy.into();
        self
    }

    pub fn with_agents(mut self, num_agents: u32) -> Self {
        self.num_agents = num_agents;
        self
    }

    pub fn with_capacities(mut self, capacities: Vec<f64>) -> Self {
        self.capacities = capacities;
        self
    }

    pub fn with_ticks(mut self, ticks: Tick) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_learning(mut self, eta: f64, gamma: f64) -> Self {
        self.eta = eta;
        self.gamma = gamma;
        self
    }

    pub fn with_gossip(mut self, transmit: f64, listen: f64, delay: u32) -> Self {
        self.transmit_probability = transmit;
        self.listen_probability = listen;
        self.delay = delay;
        self
    }

    pub fn with_equilibria(mut self, phases: Vec<EquilibriumPhase>) -> Self {
        self.equilibria = Some(phases);
        self
    }

    pub fn with_transmit_policy(mut self, policy: TransmitPolicy) -> Self {
        self.transmit_policy = Some(policy);
        self
    }

    pub fn transmit_policy(&self) -> TransmitPolicy {
        self.transmit_policy.unwrap_or_else(|| self.scenario.default_transmit_policy())
    }

    pub fn learner_params(&self) -> LearnerParams {
        LearnerParams {
            eta: self.eta,
            transmit_probability: self.transmit_probability,
            listen_probability: self.listen_probability,
            max_unheard: self.max_unheard,
            delay: self.delay,
            slot_duration_s: self.slot_duration_s,
            weight_floor: self.weight_floor,
            converged_probability: self.converged_probability,
            stabilization_cutoff: self.ticks.saturating_sub(STABILIZATION_TAIL),
        }
    }

    /// Explicit phases if given, else one phase per population change.
    pub fn equilibrium_schedule(&self) -> SimResult<EquilibriumSchedule> {
        match &self.equilibria {
            Some(phases) => Ok(EquilibriumSchedule::new(phases.clone())),
            None => {
                let plan = self.scenario.plan(self.num_agents, self.capacities.len(), self.ticks)?;
                Ok(plan.equilibrium_schedule(&self.capacities))
            }
        }
    }

    /// Rejects anything the scheduler could not run to completion.
    pub fn validate(&self) -> SimResult<()> {
        if self.num_agents == 0 {
            return Err(SimError::config("at least one agent is required"));
        }
        if self.capacities.is_empty() {
            return Err(SimError::config("at least one network is required"));
        }
        if let Some(c) = self.capacities.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
            return Err(SimError::config(format!("network capacity must be positive, got {}", c)));
        }
        if self.ticks == 0 || self.sub_ticks == 0 {
            return Err(SimError::config("ticks and sub-ticks must be positive"));
        }
        for (label, p) in [
            ("gamma", self.gamma),
            ("transmit probability", self.transmit_probability),
            ("listen probability", self.listen_probability),
            ("converged probability", self.converged_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimError::config(format!("{} must be in [0, 1], got {}", label, p)));
            }
        }
        if !(self.eta.is_finite() && self.eta >= 0.0) {
            return Err(SimError::config(format!("learning rate must be non-negative, got {}", self.eta)));
        }
        if !(self.weight_floor > 0.0) {
            return Err(SimError::config("weight floor must be positive"));
        }
        if !(self.slot_duration_s > 0.0) {
            return Err(SimError::config("slot duration must be positive"));
        }
        if self.association_delay.min_s > self.association_delay.max_s {
            return Err(SimError::config("association delay minimum exceeds maximum"));
        }
        if !StrategyRegistry::global().contains(&self.strategy_name) {
            return Err(SimError::config(format!("unknown strategy: {}", self.strategy_name)));
        }

        let plan = self.scenario.plan(self.num_agents, self.capacities.len(), self.ticks)?;
        if let Some(phases) = &self.equilibria {
            for phase in phases {
                let population = plan.population_at(phase.from_tick);
                for state in &phase.states {
                    if state.len() != self.capacities.len() {
                        return Err(SimError::config(format!(
                            "equilibrium state {:?} has {} entries for {} networks",
                            state,
                            state.len(),
                            self.capacities.len()
                        )));
                    }
                    if state.iter().sum::<usize>() != population {
                        return Err(SimError::config(format!(
                            "equilibrium state {:?} does not place {} agents (phase from tick {})",
                            state, population, phase.from_tick
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
