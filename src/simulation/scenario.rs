use crate::error::{SimError, SimResult};
use crate::metrics::analyzer::{EquilibriumPhase, EquilibriumSchedule, nash_equilibria};
use crate::network::{AgentId, AreaId, NetworkId, Tick};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Who is where, and when that changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Scenario {
    /// Everyone stays for the whole run and sees every network.
    #[default]
    Static,
    /// The upper half of the population leaves halfway through.
    HalfLeave,
    /// The upper half joins after a third of the run and leaves after two thirds.
    TemporaryJoin,
    /// Three overlapping areas over five networks; eight agents walk through all of them.
    Mobility,
    Custom {
        agents: Vec<AgentSpec>,
        #[serde(default)]
        events: Vec<ScheduledEvent>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    #[serde(default = "default_area")]
    pub area: AreaId,
    pub networks: Vec<NetworkId>,
    /// Absent agents wait for a `Join` event.
    #[serde(default = "default_present")]
    pub present: bool,
}

fn default_area() -> AreaId {
    1
}

fn default_present() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    Leave,
    Join,
    Migrate { area: AreaId, networks: Vec<NetworkId> },
}

/// Applied at the start of `tick`, before any agent acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub tick: Tick,
    pub agent: AgentId,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

/// How an agent's transmit probability is set over the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransmitPolicy {
    /// The configured probability, for everyone, all run long.
    #[default]
    Fixed,
    /// One over the number of agents present in the agent's area, so an area
    /// carries about one transmission per sub-tick whatever its size.
    AreaPopulation,
}

const MOBILITY_AGENTS: u32 = 20;
const MOBILITY_NETWORKS: usize = 5;

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Static => "static",
            Scenario::HalfLeave => "half-leave",
            Scenario::TemporaryJoin => "temporary-join",
            Scenario::Mobility => "mobility",
            Scenario::Custom { .. } => "custom",
        }
    }

    /// Crowds change a lot in the mobility preset, so its areas scale the
    /// transmit probability with their population.
    pub fn default_transmit_policy(&self) -> TransmitPolicy {
        match self {
            Scenario::Mobility => TransmitPolicy::AreaPopulation,
            _ => TransmitPolicy::Fixed,
        }
    }

    /// Expands the scenario into concrete agents and a tick-ordered event list.
    pub fn plan(&self, num_agents: u32, num_networks: usize, ticks: Tick) -> SimResult<ScenarioPlan> {
        let everything: Vec<NetworkId> = (1..=num_networks as NetworkId).collect();
        let everyone = |present: fn(AgentId) -> bool| -> Vec<AgentSpec> {
            (1..=num_agents)
                .map(|id| AgentSpec {
                    id,
                    area: 1,
                    networks: everything.clone(),
                    present: present(id),
                })
                .collect()
        };
        let upper_half = move |id: AgentId| id > num_agents / 2;

        let (agents, events) = match self {
            Scenario::Static => (everyone(|_| true), Vec::new()),
            Scenario::HalfLeave => {
                let events = (1..=num_agents)
                    .filter(|&id| upper_half(id))
                    .map(|agent| ScheduledEvent {
                        tick: ticks / 2 + 1,
                        agent,
                        event: LifecycleEvent::Leave,
                    })
                    .collect();
                (everyone(|_| true), events)
            }
            Scenario::TemporaryJoin => {
                let mut agents = everyone(|_| true);
                let mut events = Vec::new();
                for spec in agents.iter_mut().filter(|s| upper_half(s.id)) {
                    spec.present = false;
                    events.push(ScheduledEvent { tick: ticks / 3 + 1, agent: spec.id, event: LifecycleEvent::Join });
                    events.push(ScheduledEvent { tick: 2 * ticks / 3 + 1, agent: spec.id, event: LifecycleEvent::Leave });
                }
                (agents, events)
            }
            Scenario::Mobility => {
                if num_agents != MOBILITY_AGENTS || num_networks < MOBILITY_NETWORKS {
                    return Err(SimError::config(format!(
                        "mobility scenario needs {} agents and {} networks, got {} and {}",
                        MOBILITY_AGENTS, MOBILITY_NETWORKS, num_agents, num_networks
                    )));
                }
                let areas: [(AreaId, Vec<NetworkId>); 3] = [(1, vec![1, 2, 3]), (2, vec![1, 3, 4, 5]), (3, vec![1, 4, 5])];
                let agents = (1..=num_agents)
                    .map(|id| {
                        let (area, networks) = match id {
                            1..=10 => &areas[0],
                            11..=15 => &areas[1],
                            _ => &areas[2],
                        };
                        AgentSpec { id, area: *area, networks: networks.clone(), present: true }
                    })
                    .collect();
                let mut events = Vec::new();
                for agent in 1..=8 {
                    for (tick, (area, networks)) in [(ticks / 3 + 1, &areas[1]), (2 * ticks / 3 + 1, &areas[2])] {
                        events.push(ScheduledEvent {
                            tick,
                            agent,
                            event: LifecycleEvent::Migrate { area: *area, networks: networks.clone() },
                        });
                    }
                }
                (agents, events)
            }
            Scenario::Custom { agents, events } => (agents.clone(), events.clone()),
        };

        let mut events: Vec<ScheduledEvent> = events;
        events.sort_by_key(|e| e.tick);
        let plan = ScenarioPlan { agents, events };
        plan.validate(num_networks)?;
        Ok(plan)
    }
}

/// Concrete agents and events for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioPlan {
    pub agents: Vec<AgentSpec>,
    pub events: Vec<ScheduledEvent>,
}

impl ScenarioPlan {
    pub fn validate(&self, num_networks: usize) -> SimResult<()> {
        let check_networks = |agent: AgentId, networks: &[NetworkId]| -> SimResult<()> {
            if networks.is_empty() {
                return Err(SimError::NoAvailableNetwork(agent));
            }
            if let Some(&bad) = networks.iter().find(|&&n| n == 0 || n as usize > num_networks) {
                return Err(SimError::UnknownNetwork(bad));
            }
            let distinct: BTreeSet<_> = networks.iter().collect();
            if distinct.len() != networks.len() {
                return Err(SimError::config(format!("agent {} lists a network twice", agent)));
            }
            Ok(())
        };

        let mut ids = BTreeSet::new();
        for spec in &self.agents {
            if !ids.insert(spec.id) {
                return Err(SimError::config(format!("agent {} defined twice", spec.id)));
            }
            check_networks(spec.id, &spec.networks)?;
        }
        if ids.is_empty() {
            return Err(SimError::config("scenario has no agents"));
        }
        for event in &self.events {
            if !ids.contains(&event.agent) {
                return Err(SimError::UnknownAgent(event.agent));
            }
            if event.tick == 0 {
                return Err(SimError::config(format!("event for agent {} scheduled at tick 0", event.agent)));
            }
            if let LifecycleEvent::Migrate { networks, .. } = &event.event {
                check_networks(event.agent, networks)?;
            }
        }
        Ok(())
    }

    pub fn events_at(&self, tick: Tick) -> impl Iterator<Item = &ScheduledEvent> {
        self.events.iter().filter(move |e| e.tick == tick)
    }

    pub fn is_multi_area(&self) -> bool {
        let first = self.agents.first().map(|s| s.area);
        self.agents.iter().any(|s| Some(s.area) != first)
            || self.events.iter().any(|e| matches!(e.event, LifecycleEvent::Migrate { .. }))
    }

    /// Presence of every agent after the events of `tick` have been applied.
    fn presence_at(&self, tick: Tick) -> BTreeMap<AgentId, bool> {
        let mut present: BTreeMap<AgentId, bool> = self.agents.iter().map(|s| (s.id, s.present)).collect();
        for event in self.events.iter().take_while(|e| e.tick <= tick) {
            match event.event {
                LifecycleEvent::Leave => {
                    present.insert(event.agent, false);
                }
                LifecycleEvent::Join => {
                    present.insert(event.agent, true);
                }
                LifecycleEvent::Migrate { .. } => {}
            }
        }
        present
    }

    pub fn population_at(&self, tick: Tick) -> usize {
        self.presence_at(tick).values().filter(|&&p| p).count()
    }

    /// One phase per population change, each with every equilibrium of that population.
    pub fn equilibrium_schedule(&self, capacities: &[f64]) -> EquilibriumSchedule {
        let mut ticks: Vec<Tick> = std::iter::once(0).chain(self.events.iter().map(|e| e.tick)).collect();
        ticks.dedup();

        let mut phases: Vec<EquilibriumPhase> = Vec::new();
        let mut last = None;
        for tick in ticks {
            let population = self.population_at(tick);
            if last != Some(population) {
                phases.push(EquilibriumPhase {
                    from_tick: tick,
                    states: nash_equilibria(population, capacities),
                });
                last = Some(population);
            }
        }
        EquilibriumSchedule::new(phases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_leave_drops_upper_half_after_midpoint() {
        let plan = Scenario::HalfLeave.plan(4, 3, 100).unwrap();
        assert_eq!(plan.events.len(), 2);
        assert!(plan.events.iter().all(|e| e.tick == 51 && e.agent > 2));
        assert_eq!(plan.population_at(50), 4);
        assert_eq!(plan.population_at(51), 2);
        assert!(!plan.is_multi_area());
    }

    #[test]
    fn temporary_join_derives_three_phases() {
        let plan = Scenario::TemporaryJoin.plan(4, 3, 30).unwrap();
        assert_eq!(plan.population_at(1), 2);
        assert_eq!(plan.population_at(11), 4);
        assert_eq!(plan.population_at(21), 2);

        let schedule = plan.equilibrium_schedule(&[4.0, 7.0, 22.0]);
        let starts: Vec<Tick> = schedule.phases().iter().map(|p| p.from_tick).collect();
        assert_eq!(starts, vec![0, 11, 21]);
        assert_eq!(schedule.states_at(5), &[vec![0, 0, 2]]);
    }

    #[test]
    fn mobility_needs_its_population() {
        assert!(matches!(Scenario::Mobility.plan(10, 5, 90), Err(SimError::Config(_))));
        let plan = Scenario::Mobility.plan(20, 5, 90).unwrap();
        assert!(plan.is_multi_area());
        assert_eq!(plan.events.len(), 16);
        assert_eq!(plan.agents[10].networks, vec![1, 3, 4, 5]);
        assert_eq!(plan.events_at(31).count(), 8);
        assert_eq!(plan.events_at(61).count(), 8);
        assert_eq!(Scenario::Mobility.default_transmit_policy(), TransmitPolicy::AreaPopulation);
        assert_eq!(Scenario::HalfLeave.default_transmit_policy(), TransmitPolicy::Fixed);
    }

    #[test]
    fn custom_plans_are_checked() {
        let bad_network = Scenario::Custom {
            agents: vec![AgentSpec { id: 1, area: 1, networks: vec![1, 4], present: true }],
            events: vec![],
        };
        assert_eq!(bad_network.plan(1, 3, 10), Err(SimError::UnknownNetwork(4)));

        let unknown_agent = Scenario::Custom {
            agents: vec![AgentSpec { id: 1, area: 1, networks: vec![1], present: true }],
            events: vec![ScheduledEvent { tick: 3, agent: 2, event: LifecycleEvent::Leave }],
        };
        assert_eq!(unknown_agent.plan(1, 3, 10), Err(SimError::UnknownAgent(2)));
    }

    #[test]
    fn custom_scenario_reads_from_json() {
        let json = r#"{
            "kind": "custom",
            "agents": [{ "id": 1, "networks": [1, 2] }, { "id": 2, "networks": [2], "present": false }],
            "events": [{ "tick": 5, "agent": 2, "event": "join" },
                       { "tick": 8, "agent": 1, "event": "migrate", "area": 2, "networks": [2] }]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        let plan = scenario.plan(2, 2, 10).unwrap();
        assert_eq!(plan.agents[0].area, 1);
        assert!(!plan.agents[1].present);
        assert_eq!(plan.events[1].event, LifecycleEvent::Migrate { area: 2, networks: vec![2] });
        assert!(plan.is_multi_area());
    }
}
