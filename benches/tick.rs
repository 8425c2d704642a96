use collabnet::prelude::*;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for agents in [20u32, 100, 400] {
        group.bench_with_input(BenchmarkId::new("collaborative-ewa", agents), &agents, |b, &agents| {
            let config = SimConfig::default()
                .with_agents(agents)
                .with_capacities(vec![4.0, 7.0, 22.0, 11.0, 16.0])
                .with_ticks(u32::MAX);
            let mut scheduler = Scheduler::new(config).expect("valid config");
            b.iter(|| black_box(scheduler.step().expect("tick")));
        });
    }
    group.finish();
}

fn bench_equilibria(c: &mut Criterion) {
    let capacities = [4.0, 7.0, 22.0, 11.0, 16.0];
    c.bench_function("nash_equilibria_20_agents", |b| {
        b.iter(|| collabnet::metrics::analyzer::nash_equilibria(black_box(20), &capacities))
    });
}

criterion_group!(benches, bench_tick, bench_equilibria);
criterion_main!(benches);
