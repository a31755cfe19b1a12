//! Join routine benchmarks (Criterion).
//!
//! Run: `cargo bench` or `cargo bench --bench join`.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use only_one::population_gen::{replay, seed_users, Action, Generator, PopulationConfig};
use only_one::{GatePolicy, Service, Uid};

fn seeded(config: PopulationConfig) -> (Service, Vec<Uid>, Vec<Action>) {
    let svc = Service::in_memory(
        GatePolicy {
            require_verified_email: false,
        },
        5,
    );
    let mut generator = Generator::new(config);
    let uids = seed_users(&svc, &generator.users()).unwrap();
    let actions = generator.actions();
    (svc, uids, actions)
}

fn bench_replay_throughput(c: &mut Criterion) {
    const USERS: usize = 200;
    const ACTIONS: usize = 1000;
    let mut group = c.benchmark_group("join");
    group.throughput(Throughput::Elements(ACTIONS as u64));
    group.bench_function("replay_1000_over_200_users", |b| {
        b.iter_batched(
            || {
                seeded(PopulationConfig {
                    seed: 42,
                    num_users: USERS,
                    num_actions: ACTIONS,
                    ..Default::default()
                })
            },
            |(svc, uids, actions)| {
                replay(svc.store(), &uids, actions).unwrap();
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_join_all_waiting(c: &mut Criterion) {
    const USERS: usize = 300;
    let mut group = c.benchmark_group("join");
    group.throughput(Throughput::Elements(USERS as u64));
    group.bench_function("service_join_300_once_each", |b| {
        b.iter_batched(
            || {
                seeded(PopulationConfig {
                    seed: 7,
                    num_users: USERS,
                    num_actions: 0,
                    ..Default::default()
                })
            },
            |(svc, uids, _)| {
                for uid in &uids {
                    let _ = svc.join(uid).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_replay_throughput, bench_join_all_waiting);
criterion_main!(benches);
