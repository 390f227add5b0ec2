//! Core types shared across the swarmlab workspace.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::borrow::Cow;
use thiserror::Error;

pub mod batch;
pub mod feature;
pub mod geometry;
pub mod portrayal;
pub mod world;

pub use batch::{BatchRow, BatchRun, run_batch};
pub use feature::{DecayingMarker, Disc, age_markers};
pub use geometry::{Approach, Bounds, Position};
pub use portrayal::{Frame, Portray, Portrayal, Shape};
pub use world::{Model, ReporterLog, ReporterRow, World};

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// High level simulation clock (ticks processed since the world was built).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors that can occur when constructing a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Random placement could not find a free spot.
    #[error("could not place {what} after {attempts} attempts")]
    Placement { what: &'static str, attempts: u32 },
}

/// Model-independent settings for the stepping driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// The world stops once this many ticks have been processed.
    pub tick_limit: u64,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Interval (ticks) between persistence flushes. 0 disables persistence.
    pub persistence_interval: u32,
    /// Identifier stamped on every persisted record.
    pub run_id: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_limit: 1_000,
            rng_seed: None,
            history_capacity: 256,
            persistence_interval: 1,
            run_id: 0,
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.tick_limit == 0 {
            return Err(WorldError::InvalidConfig("tick_limit must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Summary emitted to persistence hooks each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub population: usize,
    pub removed: usize,
    pub expired_features: usize,
    pub finished: bool,
}

/// Scalar metric sampled during persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: Cow<'static, str>,
    pub value: f64,
}

impl MetricSample {
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Helper for population counts.
    #[must_use]
    pub fn count(name: &'static str, value: usize) -> Self {
        Self::new(name, value as f64)
    }
}

/// Event type recorded for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceEventKind {
    Removals,
    ExpiredFeatures,
    Custom(Cow<'static, str>),
}

impl PersistenceEventKind {
    /// Stable label used by storage backends.
    #[must_use]
    pub fn label(&self) -> Cow<'static, str> {
        match self {
            Self::Removals => Cow::Borrowed("removals"),
            Self::ExpiredFeatures => Cow::Borrowed("expired_features"),
            Self::Custom(name) => name.clone(),
        }
    }
}

/// Structured persistence event entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceEvent {
    pub kind: PersistenceEventKind,
    pub count: usize,
}

impl PersistenceEvent {
    #[must_use]
    pub fn new(kind: PersistenceEventKind, count: usize) -> Self {
        Self { kind, count }
    }

    /// Shorthand for a model-specific event.
    #[must_use]
    pub fn custom(name: &'static str, count: usize) -> Self {
        Self::new(PersistenceEventKind::Custom(Cow::Borrowed(name)), count)
    }
}

/// Aggregate payload forwarded to persistence sinks.
#[derive(Debug, Clone)]
pub struct PersistenceBatch {
    pub run_id: u64,
    pub model: &'static str,
    pub summary: TickSummary,
    pub metrics: Vec<MetricSample>,
    pub events: Vec<PersistenceEvent>,
}

/// Persistence sink invoked after each tick.
pub trait WorldPersistence: Send {
    fn on_tick(&mut self, payload: &PersistenceBatch);
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl WorldPersistence for NullPersistence {
    fn on_tick(&mut self, _payload: &PersistenceBatch) {}
}
