//! Shared plumbing for the `swarmlab` command-line runner.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use swarmlab_auction::{AuctionConfig, AuctionOutcome, PricingRule, run_auction};
use swarmlab_core::{Model, NullPersistence, Tick, World, WorldConfig};
use swarmlab_storage::{Storage, StoragePipeline};
use swarmlab_village::clerics_sweep;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "swarmlab",
    version,
    about = "Run the swarmlab agent simulations headlessly"
)]
pub struct Cli {
    /// JSON file with the model configuration; missing fields keep their defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Seed for the world RNG; random when omitted.
    #[arg(long, global = true, env = "SWARMLAB_SEED")]
    pub seed: Option<u64>,

    /// Stop after this many ticks.
    #[arg(long, global = true)]
    pub ticks: Option<u64>,

    /// DuckDB file receiving tick summaries, reporters and events.
    #[arg(long, global = true, env = "SWARMLAB_DB")]
    pub db: Option<PathBuf>,

    /// Export the reporter table (or batch results) to this CSV file.
    #[arg(long, global = true)]
    pub csv: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fish school, sharks and seagulls.
    Ocean {
        /// Write one JSON render frame per line to this file.
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Villagers, lycanthropes, clerics and hunters.
    Village {
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Village sweep over 0 to 5 clerics, run in parallel.
    VillageBatch {
        /// Runs per cleric count.
        #[arg(long, default_value_t = 5)]
        iterations: usize,
    },
    /// Mine-clearing robots.
    Demining {
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Sealed-bid auction between the auctioneer and its bidders.
    Auction {
        /// Charge winners their own bid instead of the runner-up's.
        #[arg(long)]
        first_price: bool,
        /// Run every bidder on its own thread.
        #[arg(long)]
        threaded: bool,
    },
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Read a model configuration from `path`, or fall back to its defaults.
pub fn load_config<C: DeserializeOwned + Default>(path: Option<&Path>) -> Result<C> {
    let Some(path) = path else {
        return Ok(C::default());
    };
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("config file {} did not contain valid JSON", path.display()))
}

impl Cli {
    fn world_config(&self) -> WorldConfig {
        let defaults = WorldConfig::default();
        WorldConfig {
            rng_seed: self.seed,
            tick_limit: self.ticks.unwrap_or(defaults.tick_limit),
            ..defaults
        }
    }

    /// Storage backing `--db`, or a scratch in-memory one when only `--csv` is set.
    fn open_storage(&self) -> Result<Option<Storage>> {
        match (&self.db, &self.csv) {
            (Some(path), _) => Storage::open(path)
                .map(Some)
                .with_context(|| format!("failed to open database {}", path.display())),
            (None, Some(_)) => Ok(Some(Storage::in_memory()?)),
            (None, None) => Ok(None),
        }
    }

    pub fn run(&self) -> Result<()> {
        match &self.command {
            Command::Ocean { frames } => {
                self.run_world::<swarmlab_ocean::Ocean>(frames.as_deref())
            }
            Command::Village { frames } => {
                self.run_world::<swarmlab_village::Village>(frames.as_deref())
            }
            Command::Demining { frames } => {
                self.run_world::<swarmlab_demining::MinedZone>(frames.as_deref())
            }
            Command::VillageBatch { iterations } => self.run_village_batch(*iterations),
            Command::Auction {
                first_price,
                threaded,
            } => self.run_auction(*first_price, *threaded),
        }
    }

    fn run_world<M>(&self, frames: Option<&Path>) -> Result<()>
    where
        M: Model,
        M::Config: DeserializeOwned + Default,
    {
        let model_config: M::Config = load_config(self.config.as_deref())?;
        let world_config = self.world_config();
        let run_id = world_config.run_id;

        let pipeline = self.open_storage()?.map(StoragePipeline::spawn).transpose()?;
        let storage = pipeline.as_ref().map(StoragePipeline::storage);
        let mut world: World<M> = match pipeline {
            Some(pipeline) => World::with_persistence(world_config, &model_config, Box::new(pipeline))?,
            None => World::new(world_config, &model_config)?,
        };

        let mut frame_sink = frames
            .map(|path| {
                File::create(path)
                    .map(BufWriter::new)
                    .with_context(|| format!("failed to create frame file {}", path.display()))
            })
            .transpose()?;

        info!(model = M::NAME, agents = world.model().population(), "starting run");
        loop {
            if let Some(sink) = frame_sink.as_mut() {
                serde_json::to_writer(&mut *sink, &world.frame())?;
                sink.write_all(b"\n")?;
            }
            if world.step().is_none() {
                break;
            }
        }
        if let Some(mut sink) = frame_sink {
            sink.flush()?;
        }

        // Swapping the sink out drains and joins the storage worker.
        world.set_persistence(Box::new(NullPersistence));
        print_reporters(M::NAME, world.tick(), &world);

        if let (Some(storage), Some(csv)) = (storage, &self.csv) {
            let mut storage = storage
                .lock()
                .map_err(|_| anyhow::anyhow!("storage mutex poisoned"))?;
            storage.export_metrics_csv(run_id, csv)?;
            info!(path = %csv.display(), "reporters exported");
        }
        Ok(())
    }

    fn run_village_batch(&self, iterations: usize) -> Result<()> {
        let rows = clerics_sweep(&self.world_config(), iterations)?;
        println!("{:>4} {:>8} {:>6} {:>8} {:>7}", "run", "clerics", "ticks", "humans", "lycans");
        for row in &rows {
            let value = |name: &str| {
                row.reporters
                    .iter()
                    .find(|sample| sample.name == name)
                    .map_or(f64::NAN, |sample| sample.value)
            };
            println!(
                "{:>4} {:>8} {:>6} {:>8} {:>7}",
                row.run_index,
                row.parameters,
                row.ticks,
                value("humans"),
                value("lycanthropes")
            );
        }

        if let Some(mut storage) = self.open_storage()? {
            storage.record_batch("clerics", &rows)?;
            if let Some(csv) = &self.csv {
                storage.export_batch_csv("clerics", csv)?;
                info!(path = %csv.display(), runs = rows.len(), "batch exported");
            }
        }
        Ok(())
    }

    fn run_auction(&self, first_price: bool, threaded: bool) -> Result<()> {
        let mut config: AuctionConfig = load_config(self.config.as_deref())?;
        if self.seed.is_some() {
            config.rng_seed = self.seed;
        }
        if first_price {
            config.pricing = PricingRule::FirstPrice;
        }
        if self.db.is_some() || self.csv.is_some() {
            warn!("the auction keeps no reporter table; --db and --csv are ignored");
        }
        let outcome = run_auction(&config, threaded)?;
        print_auction(&outcome);
        Ok(())
    }
}

fn print_reporters<M: Model>(name: &str, tick: Tick, world: &World<M>) {
    println!("{name} finished at tick {}", tick.0);
    for sample in world.reporters().latest_samples() {
        println!("  {:<28} {}", sample.name, sample.value);
    }
}

fn print_auction(outcome: &AuctionOutcome) {
    println!(
        "{:?} auction over {} goods",
        outcome.pricing,
        outcome.rounds.len()
    );
    println!("  {:<16} {:>5} {:>10} {:>10}", "bidder", "wins", "utility", "budget");
    for report in &outcome.reports {
        println!(
            "  {:<16} {:>5} {:>10.3} {:>10.3}",
            report.name,
            outcome.wins(&report.name),
            report.utility,
            report.budget
        );
    }
}
