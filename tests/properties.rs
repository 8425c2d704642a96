use collabnet::agent::{HistoryBuffer, Recency, Snapshot};
use collabnet::metrics::analyzer::{distance, nash_equilibria};
use collabnet::prelude::*;
use proptest::prelude::*;

fn observation(tick: u32, sender: u32, network: u32, ttl: u32) -> Observation {
    Observation {
        tick,
        sender,
        network,
        gain: f64::from(network) * 2.0,
        occupants: 1,
        available: vec![1, 2, 3],
        probabilities: vec![0.2, 0.3, 0.5],
        ttl,
    }
}

proptest! {
    #[test]
    fn mixed_distribution_sums_to_one(
        weights in prop::collection::vec(1e-300f64..1.0, 1..8),
        gamma in 0.0f64..=1.0,
    ) {
        for name in ["collaborative-ewa", "full-information"] {
            let strategy = StrategyRegistry::global().create(name, gamma).unwrap();
            let p = strategy.mix(&weights);
            prop_assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            prop_assert!(p.iter().all(|&x| x >= 0.0));
        }
    }

    #[test]
    fn duplicates_never_grow_a_feedback_set(keys in prop::collection::vec((1u32..5, 1u32..6, 1u32..4), 0..40)) {
        let channel = GossipChannel::new();
        let mut set = FeedbackSet::new();
        for &(tick, sender, network) in &keys {
            set.insert(observation(tick, sender, network, 3));
            channel.broadcast(1, observation(tick, sender, network, 3));
            channel.broadcast(1, observation(tick, sender, network, 1));
        }
        let distinct: std::collections::BTreeSet<_> = keys.iter().collect();
        prop_assert_eq!(set.len(), distinct.len());
        prop_assert_eq!(channel.len(1), distinct.len());

        let before = set.clone();
        set.merge(&before);
        prop_assert_eq!(set, before);
    }

    #[test]
    fn ttl_k_expires_after_k_decrements(k in 1u32..10) {
        let mut set: FeedbackSet = vec![observation(1, 1, 1, k)].into_iter().collect();
        for _ in 1..k {
            set.decrement_ttl();
            prop_assert_eq!(set.len(), 1);
        }
        set.decrement_ttl();
        prop_assert!(set.is_empty());
    }

    #[test]
    fn history_is_bounded_and_fifo(delay in 0u32..6, ticks in 1u32..30) {
        let mut history = HistoryBuffer::new(delay);
        let mut recency = Recency::unknown(3);
        for t in 1..=ticks {
            history.consolidate(t, 1, &[1, 2, 3], &FeedbackSet::new(), &mut recency).unwrap();
            prop_assert!(history.len() <= delay as usize + 1);
        }
        let kept: Vec<u32> = history.iter().map(|s: &Snapshot| s.tick).collect();
        let first = ticks.saturating_sub(delay).max(1);
        prop_assert_eq!(kept, (first..=ticks).collect::<Vec<_>>());
    }

    #[test]
    fn distance_is_zero_exactly_at_an_equilibrium(
        capacities in prop::collection::vec(1.0f64..50.0, 2..4),
        population in 1usize..6,
        seed in any::<u64>(),
    ) {
        let states = nash_equilibria(population, &capacities);
        prop_assume!(!states.is_empty());
        for state in &states {
            prop_assert_eq!(distance(state, &capacities, &states), 0.0);
        }

        // everyone piled on one network
        let mut occupancy = vec![0; capacities.len()];
        occupancy[(seed as usize) % capacities.len()] = population;
        let d = distance(&occupancy, &capacities, &states);
        prop_assert!(d.is_finite() && d >= 0.0);
        if !states.contains(&occupancy) {
            prop_assert!(d > 0.0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn occupancy_always_matches_agent_choices(seed in any::<u64>(), agents in 1u32..8) {
        let config = SimConfig::default().with_agents(agents).with_ticks(15).with_seed(seed);
        let mut scheduler = Scheduler::new(config).unwrap();
        while !scheduler.is_finished() {
            let snapshot = scheduler.step().unwrap();
            let mut counts = vec![0usize; 3];
            for agent in &snapshot.agents {
                counts[agent.network.unwrap() as usize - 1] += 1;
            }
            prop_assert_eq!(snapshot.occupancy(), counts);
            let pool_total: usize = scheduler.pool().occupancy().iter().sum();
            prop_assert_eq!(pool_total, agents as usize);
        }
    }
}
