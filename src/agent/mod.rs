pub mod delay;
pub mod history;
pub mod loss;

pub use delay::AssociationDelay;
pub use history::{HistoryBuffer, NetworkRecord, Recency, Snapshot};
pub use loss::{LossEstimate, estimate_loss};

use crate::error::{SimError, SimResult};
use crate::gossip::GossipChannel;
use crate::network::{AgentId, AreaId, FeedbackSet, NetworkId, Observation, ResourcePool, Tick};
use crate::strategies::Strategy;
use crate::strategies::full_information::full_information_loss;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// What an agent did on the gossip medium during one sub-tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollabAction {
    Idle,
    Transmit,
    Listen,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnerParams {
    pub eta: f64,
    pub transmit_probability: f64,
    pub listen_probability: f64,
    pub max_unheard: Tick,
    pub delay: u32,
    pub slot_duration_s: f64,
    pub weight_floor: f64,
    pub converged_probability: f64,
    /// Last tick at which a new stabilisation may be recorded.
    pub stabilization_cutoff: Tick,
}

impl Default for LearnerParams {
    fn default() -> Self {
        Self {
            eta: 20.0,
            transmit_probability: 0.5,
            listen_probability: 0.5,
            max_unheard: 10,
            delay: 2,
            slot_duration_s: 15.0,
            weight_floor: f64::MIN_POSITIVE,
            converged_probability: 0.75,
            stabilization_cutoff: Tick::MAX,
        }
    }
}

/// Outcome of the forced-exploration check for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exploration {
    pub unheard: Vec<NetworkId>,
    pub probability: f64,
    pub explore: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stabilization {
    pub network: NetworkId,
    pub since: Tick,
}

/// Gains seen or inferred per network over the last `window` ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecentGains {
    window: usize,
    gains: BTreeMap<NetworkId, BTreeMap<Tick, Option<f64>>>,
}

impl RecentGains {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            gains: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, network: NetworkId, tick: Tick, gain: Option<f64>) {
        let series = self.gains.entry(network).or_default();
        series.insert(tick, gain);
        while series.len() > self.window {
            series.pop_first();
        }
    }

    /// Oldest first, `None` where the gain was unknown.
    pub fn history(&self, network: NetworkId) -> Vec<Option<f64>> {
        self.gains
            .get(&network)
            .map(|s| s.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn median(&self, network: NetworkId) -> Option<f64> {
        let mut known: Vec<f64> = self.history(network).into_iter().flatten().collect();
        if known.is_empty() {
            return None;
        }
        known.sort_by(f64::total_cmp);
        let mid = known.len() / 2;
        Some(if known.len() % 2 == 0 {
            (known[mid - 1] + known[mid]) / 2.0
        } else {
            known[mid]
        })
    }

    /// Marks `ticks` as unknown for `network`, leaving known entries alone.
    pub fn seed_unknown(&mut self, network: NetworkId, ticks: impl IntoIterator<Item = Tick>) {
        let series = self.gains.entry(network).or_default();
        for tick in ticks {
            series.entry(tick).or_insert(None);
        }
        while series.len() > self.window {
            series.pop_first();
        }
    }

    pub fn retain(&mut self, available: &[NetworkId]) {
        self.gains.retain(|n, _| available.contains(n));
    }

    pub fn clear(&mut self) {
        self.gains.clear();
    }
}

/// One agent choosing among its available networks, tick after tick.
///
/// The scheduler drives the phases of a tick in this order, with every agent
/// finishing a phase before any agent starts the next one:
/// `select` -> `observe` -> (`transmit` -> `listen`) per sub-tick -> `consolidate`.
#[derive(Debug)]
pub struct AgentLearner {
    id: AgentId,
    area: AreaId,
    available: Vec<NetworkId>,
    weights: Vec<f64>,
    probabilities: Vec<f64>,
    reported: Vec<f64>,
    current: Option<NetworkId>,
    gain: f64,
    max_gain: f64,
    download: f64,
    delay: f64,

    recency: Recency,
    recent_gains: RecentGains,
    history: HistoryBuffer,
    outgoing: FeedbackSet,
    received: FeedbackSet,

    exploration: Option<Exploration>,
    pending: CollabAction,
    actions: Vec<CollabAction>,
    last_loss: Vec<f64>,
    stabilized: Option<Stabilization>,
    active: bool,

    strategy: Box<dyn Strategy>,
    params: LearnerParams,
    delay_model: AssociationDelay,
    rng: StdRng,
}

impl AgentLearner {
    pub fn new(
        id: AgentId,
        area: AreaId,
        available: Vec<NetworkId>,
        pool: &ResourcePool,
        strategy: Box<dyn Strategy>,
        params: LearnerParams,
        delay_model: AssociationDelay,
        seed: u64,
    ) -> SimResult<Self> {
        let max_gain = max_capacity(id, &available, pool)?;
        let n = available.len();
        let weights = vec![1.0; n];
        let probabilities = strategy.mix(&weights);
        Ok(Self {
            id,
            area,
            available,
            weights,
            reported: probabilities.clone(),
            probabilities,
            current: None,
            gain: 0.0,
            max_gain,
            download: 0.0,
            delay: 0.0,
            recency: Recency::unknown(n),
            recent_gains: RecentGains::new(params.max_unheard as usize),
            history: HistoryBuffer::new(params.delay),
            outgoing: FeedbackSet::new(),
            received: FeedbackSet::new(),
            exploration: None,
            pending: CollabAction::Idle,
            actions: Vec::new(),
            last_loss: vec![0.0; n],
            stabilized: None,
            active: true,
            strategy,
            params,
            delay_model,
            rng: StdRng::seed_from_u64(seed.wrapping_add(u64::from(id))),
        })
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn area(&self) -> AreaId {
        self.area
    }

    pub fn available(&self) -> &[NetworkId] {
        &self.available
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Distribution put in this tick's outgoing observation.
    pub fn reported_probabilities(&self) -> &[f64] {
        &self.reported
    }

    pub fn current(&self) -> Option<NetworkId> {
        self.current
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn max_gain(&self) -> f64 {
        self.max_gain
    }

    pub fn download(&self) -> f64 {
        self.download
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn recency(&self) -> &Recency {
        &self.recency
    }

    pub fn recent_gains(&self) -> &RecentGains {
        &self.recent_gains
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn outgoing(&self) -> &FeedbackSet {
        &self.outgoing
    }

    pub fn exploration(&self) -> Option<&Exploration> {
        self.exploration.as_ref()
    }

    pub fn actions(&self) -> &[CollabAction] {
        &self.actions
    }

    pub fn last_loss(&self) -> &[f64] {
        &self.last_loss
    }

    pub fn stabilized(&self) -> Option<Stabilization> {
        self.stabilized
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn transmit_probability(&self) -> f64 {
        self.params.transmit_probability
    }

    pub fn set_transmit_probability(&mut self, tick: Tick, probability: f64) {
        if probability != self.params.transmit_probability {
            debug!("t={} agent {} transmit probability {:.3}", tick, self.id, probability);
            self.params.transmit_probability = probability;
        }
    }

    pub fn is_exploring(&self) -> bool {
        self.exploration.as_ref().is_some_and(|e| e.explore)
    }

    /// Mix, check for forced exploration, pick a network and (re)associate.
    pub fn select(&mut self, tick: Tick, pool: &ResourcePool, population: usize) -> SimResult<()> {
        self.actions.clear();
        self.received.clear();

        self.probabilities = self.strategy.mix(&self.weights);
        if self.probabilities.iter().any(|&p| !(p > 0.0)) {
            error!(
                "agent {} has a non-positive probability at tick {}: {:?} (weights {:?})",
                self.id, tick, self.probabilities, self.weights
            );
            return Err(SimError::ZeroProbability {
                agent: self.id,
                tick,
                probabilities: self.probabilities.clone(),
            });
        }
        self.track_stabilization(tick);

        self.exploration = if self.strategy.collaborative() {
            self.exploration_check(tick, population)
        } else {
            None
        };

        let selected = match &self.exploration {
            Some(e) if e.explore => {
                let choice = *e.unheard.choose(&mut self.rng).ok_or(SimError::NoAvailableNetwork(self.id))?;
                info!("t={} agent {} explores unheard network {} (p={:.3})", tick, self.id, choice, e.probability);
                self.reported = exploration_distribution(&self.available, &self.probabilities, e);
                choice
            }
            _ => {
                let dist = WeightedIndex::new(&self.probabilities).map_err(|_| SimError::ZeroProbability {
                    agent: self.id,
                    tick,
                    probabilities: self.probabilities.clone(),
                })?;
                self.reported.clone_from(&self.probabilities);
                self.available[dist.sample(&mut self.rng)]
            }
        };

        let switched = self.current != Some(selected);
        if switched {
            if let Some(previous) = self.current {
                pool.leave(self.id, previous)?;
            }
            pool.join(self.id, selected)?;
        }
        self.delay = self.delay_model.sample(switched, &mut self.rng);
        self.current = Some(selected);
        debug!("t={} agent {} on network {} (switched: {})", tick, self.id, selected, switched);
        Ok(())
    }

    fn exploration_check(&mut self, tick: Tick, population: usize) -> Option<Exploration> {
        let unheard = self.recency.unheard(&self.available, tick, self.params.max_unheard);
        if unheard.is_empty() {
            return None;
        }
        let probability = (unheard.len() as f64 / population.max(1) as f64).clamp(0.0, 1.0);
        let explore = self.rng.gen_bool(probability);
        Some(Exploration {
            unheard,
            probability,
            explore,
        })
    }

    fn track_stabilization(&mut self, tick: Tick) {
        let best = self
            .probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, &p)| (self.available[i], p));
        match best {
            Some((network, p)) if p >= self.params.converged_probability => {
                if tick <= self.params.stabilization_cutoff
                    && self.stabilized.map(|s| s.network) != Some(network)
                {
                    self.stabilized = Some(Stabilization { network, since: tick });
                }
            }
            _ => self.stabilized = None,
        }
    }

    /// Gain is the same for every sub-tick, so it is read once per tick.
    pub fn observe(&mut self, pool: &ResourcePool) -> SimResult<()> {
        let Some(network) = self.current else {
            return Ok(());
        };
        self.gain = pool.per_agent_share(network)?;
        self.max_gain = self.max_gain.max(self.gain);
        self.download = pool.per_agent_download(network, self.params.slot_duration_s, self.delay)?;
        Ok(())
    }

    fn own_observation(&self, tick: Tick, network: NetworkId, pool: &ResourcePool) -> SimResult<Observation> {
        Ok(Observation {
            tick,
            sender: self.id,
            network,
            gain: self.gain,
            occupants: pool.occupant_count(network)?,
            available: self.available.clone(),
            probabilities: self.reported.clone(),
            ttl: self.params.delay + 1,
        })
    }

    /// Decides this sub-tick's action and broadcasts the outgoing message if
    /// transmitting. An exploring agent always transmits.
    pub fn transmit(&mut self, tick: Tick, pool: &ResourcePool, channel: &GossipChannel) -> SimResult<()> {
        self.pending = CollabAction::Idle;
        let Some(network) = self.current else {
            return Ok(());
        };
        if !self.strategy.collaborative() {
            return Ok(());
        }

        let own = self.own_observation(tick, network, pool)?;
        self.outgoing.insert(own);

        let transmit = self.is_exploring() || self.rng.gen_bool(self.params.transmit_probability);
        if transmit {
            channel.broadcast_all(self.area, &self.outgoing);
            self.pending = CollabAction::Transmit;
        } else if self.rng.gen_bool(self.params.listen_probability) {
            self.pending = CollabAction::Listen;
        }
        Ok(())
    }

    /// Runs after every agent of the sub-tick has had its chance to transmit.
    pub fn listen(&mut self, channel: &GossipChannel) {
        if self.pending == CollabAction::Listen {
            self.received.merge(&channel.listen(self.area));
        }
        self.actions.push(self.pending);
    }

    /// End of tick: fold what was learnt, estimate losses, update weights and
    /// age the message carried into the next tick.
    pub fn consolidate(&mut self, tick: Tick, pool: &ResourcePool) -> SimResult<()> {
        let Some(network) = self.current else {
            return Ok(());
        };

        let losses = if self.strategy.collaborative() {
            let mut learnt = self.received.clone();
            learnt.insert(self.own_observation(tick, network, pool)?);
            self.history
                .consolidate(tick, self.id, &self.available, &learnt, &mut self.recency)
                .inspect_err(|e| error!("agent {}: {}", self.id, e))?;

            let estimate = estimate_loss(&self.history, self.id, &self.available, &mut self.max_gain)
                .inspect_err(|e| error!("agent {}: {}", self.id, e))?;
            for (snapshot_tick, row) in &estimate.gains {
                for (&n, &g) in self.available.iter().zip(row) {
                    self.recent_gains.record(n, *snapshot_tick, g);
                }
            }
            estimate.losses
        } else {
            full_information_loss(pool, self.id, &self.available, self.max_gain)?
        };

        self.update_weights(&losses);
        self.last_loss = losses;

        self.outgoing.merge(&self.received);
        self.outgoing.decrement_ttl();
        Ok(())
    }

    /// `w_i <- w_i * exp(-η loss_i)`, rescaled so the largest weight is 1.
    /// A weight never reaches zero: it is floored at `weight_floor`.
    pub fn update_weights(&mut self, losses: &[f64]) {
        for (w, loss) in self.weights.iter_mut().zip(losses) {
            *w *= (-self.params.eta * loss).exp();
        }
        let max = self.weights.iter().copied().fold(0.0, f64::max);
        let floor = self.params.weight_floor;
        for w in &mut self.weights {
            let scaled = if max > 0.0 { *w / max } else { 0.0 };
            *w = if scaled > 0.0 { scaled } else { floor };
        }
    }

    /// Lifecycle hook: the agent walks out of the service area.
    pub fn leave_area(&mut self, pool: &ResourcePool) -> SimResult<()> {
        if let Some(network) = self.current.take() {
            pool.leave(self.id, network)?;
        }
        self.active = false;
        self.outgoing.clear();
        self.received.clear();
        self.exploration = None;
        self.actions.clear();
        self.gain = 0.0;
        self.download = 0.0;
        self.delay = 0.0;
        Ok(())
    }

    /// Lifecycle hook: the agent (re)enters at `tick` and considers every
    /// network heard of just before arriving.
    pub fn enter_area(&mut self, tick: Tick) {
        self.active = true;
        self.history.prefill(tick, &self.available);
        self.recency = Recency::heard_all_at(self.available.len(), tick.saturating_sub(1));
        self.recent_gains.clear();
        let window = self.unknown_window(tick);
        for &network in &self.available {
            self.recent_gains.seed_unknown(network, window.iter().copied());
        }
    }

    /// The ticks an arrival at `tick` can still hear about but has no gain for.
    fn unknown_window(&self, tick: Tick) -> Vec<Tick> {
        (1..=self.params.delay).rev().map(|age| tick.saturating_sub(age)).collect()
    }

    /// Lifecycle hook: the agent moves to another area with a different set of
    /// networks. Knowledge of networks it can still see is kept.
    pub fn migrate(&mut self, tick: Tick, area: AreaId, networks: Vec<NetworkId>, pool: &ResourcePool) -> SimResult<()> {
        let max_gain = max_capacity(self.id, &networks, pool)?;
        let previous = std::mem::replace(&mut self.available, networks);

        // weights survive only if the agent had settled on a network it still sees
        let favoured = self
            .probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .filter(|(_, p)| **p >= self.params.converged_probability)
            .and_then(|(i, _)| previous.get(i).copied());
        let keep_weights = favoured.is_some_and(|n| self.available.contains(&n));

        let old_weights = std::mem::take(&mut self.weights);
        let old_recency = std::mem::replace(
            &mut self.recency,
            Recency::heard_all_at(self.available.len(), tick.saturating_sub(1)),
        );
        self.weights = vec![1.0; self.available.len()];
        for (i, network) in self.available.iter().enumerate() {
            if let Some(j) = previous.iter().position(|n| n == network) {
                if keep_weights {
                    self.weights[i] = old_weights[j];
                }
                self.recency.last_heard[i] = old_recency.last_heard[j];
                self.recency.occupancy[i] = old_recency.occupancy[j];
            }
        }
        if !keep_weights {
            info!("t={} agent {} resets its weights on moving to area {}", tick, self.id, area);
        }

        self.recent_gains.retain(&self.available);
        let window = self.unknown_window(tick);
        for &network in self.available.iter().filter(|n| !previous.contains(*n)) {
            self.recent_gains.seed_unknown(network, window.iter().copied());
        }
        self.history.remap(&self.available);
        self.max_gain = max_gain;
        self.probabilities = self.strategy.mix(&self.weights);
        self.reported.clone_from(&self.probabilities);
        self.last_loss = vec![0.0; self.available.len()];
        self.area = area;
        Ok(())
    }
}

fn max_capacity(agent: AgentId, available: &[NetworkId], pool: &ResourcePool) -> SimResult<f64> {
    if available.is_empty() {
        return Err(SimError::NoAvailableNetwork(agent));
    }
    available
        .iter()
        .map(|&n| pool.capacity(n))
        .try_fold(0.0_f64, |acc, cap| Ok(acc.max(cap?)))
}

/// Distribution reported while exploring: unheard networks share the explore
/// probability evenly, heard ones keep their relative mix in the remainder.
pub fn exploration_distribution(available: &[NetworkId], probabilities: &[f64], exploration: &Exploration) -> Vec<f64> {
    let unheard = exploration.unheard.len() as f64;
    let heard_mass: f64 = available
        .iter()
        .zip(probabilities)
        .filter(|(n, _)| !exploration.unheard.contains(n))
        .map(|(_, p)| p)
        .sum();

    available
        .iter()
        .zip(probabilities)
        .map(|(n, &p)| {
            if exploration.unheard.contains(n) {
                if heard_mass > 0.0 {
                    exploration.probability / unheard
                } else {
                    1.0 / unheard
                }
            } else {
                p * (1.0 - exploration.probability) / heard_mass
            }
        })
        .collect()
}
