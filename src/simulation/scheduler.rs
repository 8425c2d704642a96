use super::config::SimConfig;
use super::scenario::{LifecycleEvent, ScenarioPlan, ScheduledEvent, TransmitPolicy};
use crate::agent::AgentLearner;
use crate::error::{SimError, SimResult};
use crate::gossip::GossipChannel;
use crate::metrics::{MetricsCollector, TickSnapshot};
use crate::network::{AgentId, AreaId, ResourcePool, Tick};
use crate::strategies::StrategyRegistry;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Steps every agent through synchronised ticks. Each phase finishes for all
/// agents before the next one starts; within a phase agents run in parallel.
pub struct Scheduler {
    config: SimConfig,
    pool: ResourcePool,
    channel: GossipChannel,
    agents: Vec<AgentLearner>,
    index: HashMap<AgentId, usize>,
    plan: ScenarioPlan,
    transmit_policy: TransmitPolicy,
    tick: Tick,
}

impl Scheduler {
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let pool = ResourcePool::new(&config.capacities);
        let plan = config.scenario.plan(config.num_agents, pool.len(), config.ticks)?;

        let mut agents = Vec::with_capacity(plan.agents.len());
        for spec in &plan.agents {
            let strategy = StrategyRegistry::global()
                .create(&config.strategy_name, config.gamma)
                .ok_or_else(|| SimError::config(format!("unknown strategy: {}", config.strategy_name)))?;
            let mut agent = AgentLearner::new(
                spec.id,
                spec.area,
                spec.networks.clone(),
                &pool,
                strategy,
                config.learner_params(),
                config.association_delay,
                config.seed,
            )?;
            if !spec.present {
                agent.leave_area(&pool)?;
            }
            agents.push(agent);
        }
        let index = agents.iter().enumerate().map(|(i, a)| (a.id(), i)).collect();

        info!(
            "{} agents ({} present), {} networks, scenario {}",
            agents.len(),
            agents.iter().filter(|a| a.is_active()).count(),
            pool.len(),
            config.scenario.name()
        );
        Ok(Self {
            transmit_policy: config.transmit_policy(),
            config,
            pool,
            channel: GossipChannel::new(),
            agents,
            index,
            plan,
            tick: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn agents(&self) -> &[AgentLearner] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentLearner> {
        self.index.get(&id).map(|&i| &self.agents[i])
    }

    pub fn plan(&self) -> &ScenarioPlan {
        &self.plan
    }

    /// Last completed tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn is_finished(&self) -> bool {
        self.tick >= self.config.ticks
    }

    fn apply_events(&mut self, tick: Tick) -> SimResult<()> {
        let events: Vec<ScheduledEvent> = self.plan.events_at(tick).cloned().collect();
        for ScheduledEvent { agent, event, .. } in events {
            let i = *self.index.get(&agent).ok_or(SimError::UnknownAgent(agent))?;
            let learner = &mut self.agents[i];
            match event {
                LifecycleEvent::Leave if learner.is_active() => {
                    learner.leave_area(&self.pool)?;
                    info!("t={} agent {} leaves the area", tick, agent);
                }
                LifecycleEvent::Join if !learner.is_active() => {
                    learner.enter_area(tick);
                    info!("t={} agent {} joins area {}", tick, agent, learner.area());
                }
                LifecycleEvent::Migrate { area, networks } => {
                    info!("t={} agent {} moves to area {} ({:?})", tick, agent, area, networks);
                    learner.migrate(tick, area, networks, &self.pool)?;
                }
                other => debug!("t={} agent {}: {:?} ignored", tick, agent, other),
            }
        }
        Ok(())
    }

    fn populations(&self) -> HashMap<AreaId, usize> {
        let mut population = HashMap::new();
        for agent in self.agents.iter().filter(|a| a.is_active()) {
            *population.entry(agent.area()).or_insert(0) += 1;
        }
        population
    }

    /// Runs one full tick and returns what it produced.
    pub fn step(&mut self) -> SimResult<TickSnapshot> {
        let tick = self.tick + 1;
        self.apply_events(tick)?;
        let population = self.populations();
        if self.transmit_policy == TransmitPolicy::AreaPopulation {
            for a in self.agents.iter_mut().filter(|a| a.is_active()) {
                let n = population.get(&a.area()).copied().unwrap_or(1);
                a.set_transmit_probability(tick, 1.0 / n as f64);
            }
        }

        let pool = &self.pool;
        let channel = &self.channel;
        let agents = &mut self.agents;

        agents.par_iter_mut().filter(|a| a.is_active()).try_for_each(|a| {
            let n = population.get(&a.area()).copied().unwrap_or(1);
            a.select(tick, pool, n)
        })?;
        agents
            .par_iter_mut()
            .filter(|a| a.is_active())
            .try_for_each(|a| a.observe(pool))?;

        for _ in 0..self.config.sub_ticks {
            channel.reset_all();
            agents
                .par_iter_mut()
                .filter(|a| a.is_active())
                .try_for_each(|a| a.transmit(tick, pool, channel))?;
            agents
                .par_iter_mut()
                .filter(|a| a.is_active())
                .for_each(|a| a.listen(channel));
        }

        agents
            .par_iter_mut()
            .filter(|a| a.is_active())
            .try_for_each(|a| a.consolidate(tick, pool))?;

        let snapshot = TickSnapshot::capture(tick, pool, agents)?;
        debug!("t={} occupancy {:?}", tick, snapshot.occupancy());
        self.tick = tick;
        Ok(snapshot)
    }

    /// Steps until the configured tick count, recording every tick.
    pub fn run(&mut self, metrics: &MetricsCollector) -> SimResult<()> {
        while !self.is_finished() {
            metrics.record(self.step()?);
        }
        Ok(())
    }
}
