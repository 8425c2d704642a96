use collabnet::metrics::analyzer::{EquilibriumAnalyzer, EquilibriumPhase, EquilibriumSchedule};
use collabnet::metrics::logger::{load_occupancy, network_file};
use collabnet::prelude::*;
use collabnet::simulation::{AgentSpec, LifecycleEvent, ScheduledEvent};

fn small_pool(strategy: &str, ticks: u32) -> SimConfig {
    SimConfig::default()
        .with_strategy(strategy)
        .with_agents(3)
        .with_capacities(vec![4.0, 7.0, 22.0])
        .with_ticks(ticks)
        .with_equilibria(vec![EquilibriumPhase { from_tick: 0, states: vec![vec![0, 0, 3]] }])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[test]
fn full_information_converges_to_the_only_equilibrium() {
    let config = small_pool("full-information", 200).with_seed(7);
    let schedule = config.equilibrium_schedule().unwrap();
    let metrics = MetricsCollector::new();
    let mut scheduler = Scheduler::new(config.clone()).unwrap();
    scheduler.run(&metrics).unwrap();

    let series = metrics.occupancy_series();
    assert_eq!(series.last().unwrap().1, vec![0, 0, 3]);

    let report = EquilibriumAnalyzer::new(config.capacities.clone(), schedule).analyze(&series);
    let early = mean(&report.distances[..20]);
    let late = mean(&report.distances[report.distances.len() - 50..]);
    assert!(late <= early);
    assert_eq!(late, 0.0);
    assert_eq!(metrics.summary().transmissions, 0);
}

#[test]
fn collaborative_run_keeps_every_invariant() {
    let config = small_pool("collaborative-ewa", 300).with_seed(11);
    let metrics = MetricsCollector::new();
    let mut scheduler = Scheduler::new(config.clone()).unwrap();

    while !scheduler.is_finished() {
        let snapshot = scheduler.step().unwrap();
        let mut counts = vec![0usize; 3];
        for agent in &snapshot.agents {
            let sum: f64 = agent.probabilities.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "probabilities sum to {}", sum);
            assert!(agent.probabilities.iter().all(|&p| p > 0.0));
            assert!(agent.weights.iter().all(|&w| w > 0.0 && w <= 1.0));
            counts[agent.network.unwrap() as usize - 1] += 1;
        }
        assert_eq!(snapshot.occupancy(), counts);
        metrics.record(snapshot);
    }

    for agent in scheduler.agents() {
        assert!(agent.history().len() <= config.delay as usize + 1);
    }
    let report = EquilibriumAnalyzer::new(config.capacities.clone(), config.equilibrium_schedule().unwrap())
        .analyze(&metrics.occupancy_series());
    assert!(report.ticks_at_equilibrium > 0);
    assert!(metrics.summary().transmissions > 0);
}

#[test]
fn joining_agents_start_with_a_full_history_window() {
    let config = SimConfig::default()
        .with_agents(4)
        .with_ticks(30)
        .with_scenario(Scenario::TemporaryJoin);
    let mut scheduler = Scheduler::new(config).unwrap();
    assert!(!scheduler.agent(4).unwrap().is_active());

    for _ in 0..10 {
        let snapshot = scheduler.step().unwrap();
        assert_eq!(snapshot.agents.len(), 2);
    }
    let joined = scheduler.step().unwrap();
    assert_eq!(joined.tick, 11);
    assert_eq!(joined.agents.len(), 4);
    assert_eq!(joined.occupancy().iter().sum::<usize>(), 4);

    let newcomer = scheduler.agent(4).unwrap();
    assert_eq!(newcomer.history().len(), newcomer.history().depth());
    assert_eq!(newcomer.history().latest().unwrap().tick, 11);
}

#[test]
fn migrating_agents_switch_area_and_networks() {
    let config = SimConfig::default()
        .with_agents(20)
        .with_capacities(vec![4.0, 7.0, 22.0, 11.0, 16.0])
        .with_ticks(30)
        .with_scenario(Scenario::Mobility);
    let metrics = MetricsCollector::new();
    let mut scheduler = Scheduler::new(config).unwrap();
    scheduler.run(&metrics).unwrap();

    for id in 1..=8 {
        let agent = scheduler.agent(id).unwrap();
        assert_eq!(agent.area(), 3);
        assert_eq!(agent.available(), &[1, 4, 5]);
        assert!(agent.available().contains(&agent.current().unwrap()));
    }
    assert_eq!(scheduler.agent(9).unwrap().area(), 1);
    // areas hold 2, 5 and 13 agents by now
    assert_eq!(scheduler.agent(1).unwrap().transmit_probability(), 1.0 / 13.0);
    assert_eq!(scheduler.agent(9).unwrap().transmit_probability(), 1.0 / 2.0);
    assert_eq!(metrics.latest().unwrap().occupancy().iter().sum::<usize>(), 20);
}

#[test]
fn custom_events_apply_at_their_tick() {
    let scenario = Scenario::Custom {
        agents: vec![
            AgentSpec { id: 1, area: 1, networks: vec![1, 2], present: true },
            AgentSpec { id: 2, area: 1, networks: vec![2], present: true },
        ],
        events: vec![ScheduledEvent { tick: 4, agent: 2, event: LifecycleEvent::Leave }],
    };
    let config = SimConfig::default()
        .with_agents(2)
        .with_capacities(vec![5.0, 5.0])
        .with_ticks(6)
        .with_scenario(scenario);
    let mut scheduler = Scheduler::new(config).unwrap();
    for _ in 0..3 {
        assert!(scheduler.step().unwrap().occupancy()[1] >= 1);
    }
    let after = scheduler.step().unwrap();
    assert!(after.agents.iter().all(|a| a.agent == 1));
}

#[test]
fn zero_agent_config_is_rejected_before_the_run() {
    let err = Scheduler::new(SimConfig::default().with_agents(0)).err().unwrap();
    assert!(matches!(err, SimError::Config(_)));
    assert!(!err.is_invariant_violation());
}

#[tokio::test]
async fn driver_runs_analyses_and_persists() {
    let config = small_pool("collaborative-ewa", 50).with_name("persist");
    let mut sim = Simulation::new(config.clone()).with_progress(false);
    let report = sim.run().await.unwrap();
    assert_eq!(report.ticks_completed, 50);
    assert!(!report.cancelled);
    let analysis = report.analysis.clone().unwrap();
    assert_eq!(analysis.ticks, 50);

    let root = tempfile::tempdir().unwrap();
    let dir = sim.save_results(&report, root.path()).unwrap();
    assert!(dir.join("report.json").exists());

    let reloaded = load_occupancy(network_file(&dir)).unwrap();
    assert_eq!(reloaded, sim.metrics.occupancy_series());
    let offline = EquilibriumAnalyzer::new(config.capacities, EquilibriumSchedule::single(vec![vec![0, 0, 3]]))
        .analyze(&reloaded);
    assert_eq!(offline.distances, analysis.distances);
}

#[tokio::test]
async fn multi_area_runs_skip_distance_analysis() {
    let config = SimConfig::default()
        .with_agents(20)
        .with_capacities(vec![4.0, 7.0, 22.0, 11.0, 16.0])
        .with_ticks(12)
        .with_scenario(Scenario::Mobility);
    let mut sim = Simulation::new(config).with_progress(false);
    let report = sim.run().await.unwrap();
    assert!(report.analysis.is_none());
    assert_eq!(report.scenario, "mobility");
}

#[tokio::test]
async fn cancelled_run_stops_between_ticks() {
    let mut sim = Simulation::new(small_pool("collaborative-ewa", 100)).with_progress(false);
    sim.cancel_token().cancel();
    let report = sim.run().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.ticks_completed, 0);
    assert!(sim.metrics.is_empty());
}
