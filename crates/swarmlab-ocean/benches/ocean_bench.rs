use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::time::Duration;
use swarmlab_core::{World, WorldConfig};
use swarmlab_ocean::{Ocean, OceanConfig};

fn bench_ocean_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("ocean_step");
    let steps: usize = std::env::var("SWARMLAB_BENCH_STEPS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64);
    let fish_list: Vec<usize> = std::env::var("SWARMLAB_BENCH_FISH")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![30_usize, 400, 2500]);
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(10));

    for &n_fish in &fish_list {
        group.bench_function(format!("steps{steps}_fish{n_fish}"), |b| {
            b.iter_batched(
                || {
                    let config = OceanConfig {
                        n_fish,
                        fish_space: 5.0,
                        n_sharks: 5 + n_fish / 50,
                        ..OceanConfig::default()
                    };
                    let world = WorldConfig {
                        rng_seed: Some(0xF154_u64),
                        tick_limit: u64::MAX,
                        history_capacity: 1,
                        persistence_interval: 0,
                        ..WorldConfig::default()
                    };
                    World::<Ocean>::new(world, &config).expect("world")
                },
                |mut world| {
                    for _ in 0..steps {
                        world.step();
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ocean_steps);
criterion_main!(benches);
