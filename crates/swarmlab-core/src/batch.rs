//! Parameter sweeps over independent worlds, executed in parallel.

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::world::{Model, World};
use crate::{MetricSample, WorldConfig, WorldError};

/// One scheduled run of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun<P> {
    pub run_index: usize,
    pub iteration: usize,
    pub parameters: P,
    pub seed: u64,
}

impl<P: Clone> BatchRun<P> {
    /// Cartesian product of `variants` and `iterations`, with one seed per run
    /// derived from `base_seed`.
    #[must_use]
    pub fn plan(variants: &[P], iterations: usize, base_seed: u64) -> Vec<Self> {
        let mut runs = Vec::with_capacity(variants.len() * iterations);
        for parameters in variants {
            for iteration in 0..iterations {
                let run_index = runs.len();
                runs.push(Self {
                    run_index,
                    iteration,
                    parameters: parameters.clone(),
                    seed: base_seed.wrapping_add(run_index as u64),
                });
            }
        }
        runs
    }
}

/// Final reporter values of one finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow<P> {
    pub run_index: usize,
    pub iteration: usize,
    pub parameters: P,
    pub seed: u64,
    pub ticks: u64,
    pub reporters: Vec<MetricSample>,
}

/// Run every planned world to completion on the rayon pool.
///
/// Each world owns its RNG, so rows only depend on their run's seed. Rows come
/// back in `run_index` order.
pub fn run_batch<M, P, F>(
    world: &WorldConfig,
    runs: Vec<BatchRun<P>>,
    make_config: F,
) -> Result<Vec<BatchRow<P>>, WorldError>
where
    M: Model,
    P: Clone + Send + Sync,
    F: Fn(&P) -> M::Config + Sync,
{
    world.validate()?;
    let total = runs.len();
    let rows = runs
        .into_par_iter()
        .map(|run| {
            let config = WorldConfig {
                rng_seed: Some(run.seed),
                run_id: run.run_index as u64,
                ..world.clone()
            };
            let model_config = make_config(&run.parameters);
            let mut instance: World<M> = World::new(config, &model_config)?;
            let ticks = instance.run().0;
            Ok(BatchRow {
                run_index: run.run_index,
                iteration: run.iteration,
                parameters: run.parameters,
                seed: run.seed,
                ticks,
                reporters: instance.reporters().latest_samples(),
            })
        })
        .collect::<Result<Vec<_>, WorldError>>()?;
    info!(model = M::NAME, runs = total, "batch complete");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_enumerates_variants_and_iterations() {
        let runs = BatchRun::plan(&[0_u32, 1, 2], 2, 100);
        assert_eq!(runs.len(), 6);
        assert_eq!(runs[3].parameters, 1);
        assert_eq!(runs[3].iteration, 1);
        assert_eq!(runs[3].seed, 103);
        assert!(runs.iter().enumerate().all(|(i, run)| run.run_index == i));
    }

    #[test]
    fn plan_with_no_iterations_is_empty() {
        assert!(BatchRun::plan(&["a"], 0, 1).is_empty());
    }
}
