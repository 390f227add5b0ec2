use swarmlab_core::{Model, Tick, World, WorldConfig};
use swarmlab_village::{Village, VillageConfig, clerics_sweep};

#[test]
fn full_run_reaches_tick_limit_with_consistent_census() {
    let config = WorldConfig {
        rng_seed: Some(8),
        ..WorldConfig::default()
    };
    let mut world: World<Village> = World::new(config, &VillageConfig::default()).expect("world");
    assert_eq!(world.run(), Tick(1_000));

    let log = world.reporters();
    assert_eq!(log.rows().len(), 1_001);
    for row in log.rows() {
        let value = |name: &str| {
            let column = log
                .columns()
                .iter()
                .position(|c| c == name)
                .expect("column");
            row.values[column]
        };
        assert_eq!(value("humans") + value("lycanthropes"), value("population"));
        assert!(value("lycanthropes_transformed") <= value("lycanthropes"));
        assert_eq!(value("clerics"), 1.0);
        assert_eq!(value("hunters"), 2.0);
    }
    let bounds = world.model().bounds();
    assert!(
        world
            .model()
            .inhabitants()
            .all(|(_, inhabitant)| bounds.contains(inhabitant.position))
    );
}

#[test]
fn lycanthropy_needs_a_transformed_carrier() {
    let config = VillageConfig {
        p_attack: 0.0,
        ..VillageConfig::default()
    };
    let world_config = WorldConfig {
        rng_seed: Some(1),
        tick_limit: 200,
        ..WorldConfig::default()
    };
    let mut world: World<Village> = World::new(world_config, &config).expect("world");
    world.run();
    // Nobody ever transforms, so nobody is infected or shot; only cures happen.
    let lycanthropes = world.reporters().series("lycanthropes").expect("series");
    assert!(lycanthropes.windows(2).all(|pair| pair[1] <= pair[0]));
    assert_eq!(world.reporters().latest_value("population"), Some(28.0));
}

#[test]
fn clerics_sweep_covers_zero_to_five() {
    let world = WorldConfig {
        rng_seed: Some(42),
        tick_limit: 50,
        ..WorldConfig::default()
    };
    let rows = clerics_sweep(&world, 2).expect("sweep");
    assert_eq!(rows.len(), 12);
    for row in &rows {
        assert_eq!(row.ticks, 50);
        let clerics = row
            .reporters
            .iter()
            .find(|sample| sample.name == "clerics")
            .expect("clerics");
        assert_eq!(clerics.value, row.parameters as f64);
        assert_eq!(row.seed, 42 + row.run_index as u64);
    }
    let again = clerics_sweep(&world, 2).expect("sweep");
    assert_eq!(rows, again);
}
