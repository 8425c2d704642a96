use crate::network::Tick;
use serde::{Deserialize, Serialize};

/// Admissible occupancy vectors valid from `from_tick` onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumPhase {
    pub from_tick: Tick,
    pub states: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSchedule {
    phases: Vec<EquilibriumPhase>,
}

impl EquilibriumSchedule {
    pub fn new(mut phases: Vec<EquilibriumPhase>) -> Self {
        phases.sort_by_key(|p| p.from_tick);
        Self { phases }
    }

    pub fn single(states: Vec<Vec<usize>>) -> Self {
        Self::new(vec![EquilibriumPhase { from_tick: 0, states }])
    }

    pub fn phases(&self) -> &[EquilibriumPhase] {
        &self.phases
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// States of the last phase starting at or before `tick`.
    pub fn states_at(&self, tick: Tick) -> &[Vec<usize>] {
        self.phases
            .iter()
            .rev()
            .find(|p| p.from_tick <= tick)
            .map(|p| p.states.as_slice())
            .unwrap_or(&[])
    }
}

/// No occupant of any network would get more by moving alone to another one.
pub fn is_nash_equilibrium(state: &[usize], capacities: &[f64]) -> bool {
    for (i, (&si, &ci)) in state.iter().zip(capacities).enumerate() {
        if si == 0 {
            continue;
        }
        let share = ci / si as f64;
        let better = state
            .iter()
            .zip(capacities)
            .enumerate()
            .any(|(j, (&sj, &cj))| i != j && share < cj / (sj + 1) as f64);
        if better {
            return false;
        }
    }
    true
}

/// All equilibrium occupancy vectors for `population` agents, in lexicographic order.
pub fn nash_equilibria(population: usize, capacities: &[f64]) -> Vec<Vec<usize>> {
    fn compose(remaining: usize, slots: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if slots == 1 {
            prefix.push(remaining);
            out.push(prefix.clone());
            prefix.pop();
            return;
        }
        for n in 0..=remaining {
            prefix.push(n);
            compose(remaining - n, slots - 1, prefix, out);
            prefix.pop();
        }
    }

    if capacities.is_empty() {
        return Vec::new();
    }
    let mut all = Vec::new();
    compose(population, capacities.len(), &mut Vec::with_capacity(capacities.len()), &mut all);
    all.retain(|s| is_nash_equilibrium(s, capacities));
    all
}

/// Largest relative gain (in %) an agent would realise by moving the current
/// occupancy to the closest admissible state. Zero when already there, and
/// when the shapes disagree: states or capacities not sized like `occupancy`
/// are ignored.
pub fn distance(occupancy: &[usize], capacities: &[f64], states: &[Vec<usize>]) -> f64 {
    if capacities.len() != occupancy.len() {
        return 0.0;
    }
    let states: Vec<&[usize]> = states
        .iter()
        .map(Vec::as_slice)
        .filter(|s| s.len() == occupancy.len())
        .collect();
    if states.is_empty() || states.contains(&occupancy) {
        return 0.0;
    }

    let diff_to = |target: &[usize]| -> Vec<i64> {
        target
            .iter()
            .zip(occupancy)
            .map(|(&t, &c)| t as i64 - c as i64)
            .collect()
    };
    // fewest arrivals, first one on ties
    let Some(target) = states
        .iter()
        .copied()
        .min_by_key(|s| diff_to(*s).iter().filter(|&&d| d > 0).sum::<i64>())
    else {
        return 0.0;
    };
    let mut diff = diff_to(target);

    let mut distance = 0.0_f64;
    for from in 0..diff.len() {
        if diff[from] >= 0 {
            continue;
        }
        let current = capacities[from] / occupancy[from] as f64;
        for to in 0..diff.len() {
            if diff[to] > 0 {
                let moved = diff[to].min(-diff[from]);
                let improvement = (capacities[to] / target[to] as f64 - current) * 100.0 / current;
                distance = distance.max(improvement);
                diff[from] += moved;
                diff[to] -= moved;
            }
            if diff[from] == 0 {
                if target[from] != 0 {
                    let stay = (capacities[from] / target[from] as f64 - current) * 100.0 / current;
                    distance = distance.max(stay);
                }
                break;
            }
        }
    }
    distance
}

/// Same as numpy's "valid" convolution with a flat kernel.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || window > values.len() {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub ticks: usize,
    pub ticks_at_equilibrium: usize,
    pub percent_at_equilibrium: f64,
    pub mean_distance: f64,
    pub final_window_mean_distance: f64,
    pub distances: Vec<f64>,
    pub moving_average: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct EquilibriumAnalyzer {
    capacities: Vec<f64>,
    schedule: EquilibriumSchedule,
    window: usize,
}

impl EquilibriumAnalyzer {
    pub fn new(capacities: Vec<f64>, schedule: EquilibriumSchedule) -> Self {
        Self {
            capacities,
            schedule,
            window: 20,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn schedule(&self) -> &EquilibriumSchedule {
        &self.schedule
    }

    pub fn distance_at(&self, tick: Tick, occupancy: &[usize]) -> f64 {
        distance(occupancy, &self.capacities, self.schedule.states_at(tick))
    }

    pub fn analyze(&self, occupancy: &[(Tick, Vec<usize>)]) -> AnalysisReport {
        let distances: Vec<f64> = occupancy
            .iter()
            .map(|(tick, counts)| self.distance_at(*tick, counts))
            .collect();
        let ticks = distances.len();
        let at_equilibrium = distances.iter().filter(|&&d| d == 0.0).count();
        let tail = &distances[ticks.saturating_sub(self.window)..];

        AnalysisReport {
            ticks,
            ticks_at_equilibrium: at_equilibrium,
            percent_at_equilibrium: percent(at_equilibrium, ticks),
            mean_distance: mean(&distances),
            final_window_mean_distance: mean(tail),
            moving_average: moving_average(&distances, self.window),
            distances,
        }
    }
}

/// Several runs of the same configuration folded together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedReport {
    pub runs: usize,
    pub mean_distance_per_tick: Vec<f64>,
    pub ticks_at_equilibrium: Vec<usize>,
    pub average_ticks_at_equilibrium: f64,
    pub median_ticks_at_equilibrium: f64,
    pub min_ticks_at_equilibrium: usize,
    pub max_ticks_at_equilibrium: usize,
}

pub fn combine_runs(reports: &[AnalysisReport]) -> CombinedReport {
    let longest = reports.iter().map(|r| r.distances.len()).max().unwrap_or(0);
    let mean_distance_per_tick = (0..longest)
        .map(|t| {
            let at_tick: Vec<f64> = reports.iter().filter_map(|r| r.distances.get(t).copied()).collect();
            mean(&at_tick)
        })
        .collect();

    let ticks_at_equilibrium: Vec<usize> = reports.iter().map(|r| r.ticks_at_equilibrium).collect();
    let mut sorted = ticks_at_equilibrium.clone();
    sorted.sort_unstable();
    let median = match sorted.len() {
        0 => 0.0,
        n if n % 2 == 0 => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
        n => sorted[n / 2] as f64,
    };

    CombinedReport {
        runs: reports.len(),
        mean_distance_per_tick,
        average_ticks_at_equilibrium: mean(&ticks_at_equilibrium.iter().map(|&t| t as f64).collect::<Vec<_>>()),
        median_ticks_at_equilibrium: median,
        min_ticks_at_equilibrium: sorted.first().copied().unwrap_or(0),
        max_ticks_at_equilibrium: sorted.last().copied().unwrap_or(0),
        ticks_at_equilibrium,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
