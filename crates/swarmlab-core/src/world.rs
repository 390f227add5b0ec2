//! Generic stepping driver shared by every spatial model.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;

use rand::RngCore;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geometry::Bounds;
use crate::portrayal::{Frame, Portrayal};
use crate::{
    AgentId, MetricSample, NullPersistence, PersistenceBatch, PersistenceEvent,
    PersistenceEventKind, Tick, TickSummary, WorldConfig, WorldError, WorldPersistence,
};

/// A population of agents and features that the [`World`] driver can step.
///
/// Agents are visited through their ids so that a model can consult the whole
/// population while updating a single agent.
pub trait Model: Sized {
    /// Model-specific parameters.
    type Config: Clone;

    /// Short identifier stamped on persisted records.
    const NAME: &'static str;

    /// Build the initial population.
    fn build(config: &Self::Config, rng: &mut dyn RngCore) -> Result<Self, WorldError>;

    fn bounds(&self) -> Bounds;

    /// Ids of every live agent, in storage order.
    fn agent_ids(&self) -> Vec<AgentId>;

    fn contains_agent(&self, id: AgentId) -> bool;

    fn population(&self) -> usize;

    /// Recompute world-level aggregates before any agent moves.
    fn prepare_tick(&mut self, _rng: &mut dyn RngCore) {}

    /// Run one agent's behavior for the current tick.
    fn step_agent(&mut self, id: AgentId, rng: &mut dyn RngCore);

    /// Age decaying features, returning how many expired.
    fn age_features(&mut self) -> usize {
        0
    }

    /// Named reporter values sampled after every tick.
    fn reporters(&self) -> Vec<MetricSample>;

    /// Model events accumulated since the last call.
    fn drain_events(&mut self) -> Vec<PersistenceEvent> {
        Vec::new()
    }

    /// Whether the model has nothing left to simulate.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Render descriptions for every agent and feature, in world coordinates.
    fn portrayals(&self) -> Vec<Portrayal>;
}

/// Reporter values captured at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterRow {
    pub tick: Tick,
    pub values: Vec<f64>,
}

/// Columnar log of reporter samples, one row per tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReporterLog {
    columns: Vec<Cow<'static, str>>,
    rows: Vec<ReporterRow>,
}

impl ReporterLog {
    /// Append a row. The first call fixes the column set; later samples are
    /// matched by name and missing ones are recorded as NaN.
    pub fn record(&mut self, tick: Tick, samples: &[MetricSample]) {
        if self.columns.is_empty() {
            self.columns = samples.iter().map(|sample| sample.name.clone()).collect();
        }
        let values = self
            .columns
            .iter()
            .map(|column| {
                samples
                    .iter()
                    .find(|sample| sample.name == *column)
                    .map_or(f64::NAN, |sample| sample.value)
            })
            .collect();
        self.rows.push(ReporterRow { tick, values });
    }

    #[must_use]
    pub fn columns(&self) -> &[Cow<'static, str>] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[ReporterRow] {
        &self.rows
    }

    #[must_use]
    pub fn latest(&self) -> Option<&ReporterRow> {
        self.rows.last()
    }

    /// Full time series for one reporter.
    #[must_use]
    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        let column = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| row.values[column]).collect())
    }

    /// Most recent value for one reporter.
    #[must_use]
    pub fn latest_value(&self, name: &str) -> Option<f64> {
        let column = self.columns.iter().position(|c| c == name)?;
        self.rows.last().map(|row| row.values[column])
    }

    /// Latest row as named samples.
    #[must_use]
    pub fn latest_samples(&self) -> Vec<MetricSample> {
        self.rows
            .last()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(&row.values)
                    .map(|(name, value)| MetricSample::new(name.clone(), *value))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Owns a model plus the clock, RNG, reporters and persistence hooks around it.
pub struct World<M: Model> {
    config: WorldConfig,
    model: M,
    tick: Tick,
    running: bool,
    rng: SmallRng,
    persistence: Box<dyn WorldPersistence>,
    reporters: ReporterLog,
    history: VecDeque<TickSummary>,
}

impl<M: Model> fmt::Debug for World<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("model", &M::NAME)
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("running", &self.running)
            .field("population", &self.model.population())
            .finish()
    }
}

impl<M: Model> World<M> {
    /// Build a world and its initial population from configuration.
    pub fn new(config: WorldConfig, model_config: &M::Config) -> Result<Self, WorldError> {
        Self::with_persistence(config, model_config, Box::new(NullPersistence))
    }

    /// Build a world that forwards tick batches to `persistence`.
    pub fn with_persistence(
        config: WorldConfig,
        model_config: &M::Config,
        persistence: Box<dyn WorldPersistence>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let model = M::build(model_config, &mut rng)?;
        Ok(Self::assemble(config, model, rng, persistence))
    }

    /// Wrap an already populated model.
    pub fn from_model(config: WorldConfig, model: M) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        Ok(Self::assemble(config, model, rng, Box::new(NullPersistence)))
    }

    fn assemble(
        config: WorldConfig,
        model: M,
        rng: SmallRng,
        persistence: Box<dyn WorldPersistence>,
    ) -> Self {
        let history_capacity = config.history_capacity;
        let mut world = Self {
            config,
            model,
            tick: Tick::zero(),
            running: true,
            rng,
            persistence,
            reporters: ReporterLog::default(),
            history: VecDeque::with_capacity(history_capacity),
        };
        let initial = world.model.reporters();
        world.reporters.record(Tick::zero(), &initial);
        world.running = !world.model.is_exhausted();
        world
    }

    fn stage_agents(&mut self) {
        let mut order = self.model.agent_ids();
        order.shuffle(&mut self.rng);
        for id in order {
            if self.model.contains_agent(id) {
                self.model.step_agent(id, &mut self.rng);
            }
        }
    }

    fn stage_persistence(&mut self, summary: &TickSummary, metrics: Vec<MetricSample>) {
        let mut events = self.model.drain_events();
        if summary.removed > 0 {
            events.push(PersistenceEvent::new(
                PersistenceEventKind::Removals,
                summary.removed,
            ));
        }
        if summary.expired_features > 0 {
            events.push(PersistenceEvent::new(
                PersistenceEventKind::ExpiredFeatures,
                summary.expired_features,
            ));
        }

        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());

        let interval = u64::from(self.config.persistence_interval);
        if interval == 0 || !(summary.finished || summary.tick.0.is_multiple_of(interval)) {
            return;
        }
        let batch = PersistenceBatch {
            run_id: self.config.run_id,
            model: M::NAME,
            summary: summary.clone(),
            metrics,
            events,
        };
        self.persistence.on_tick(&batch);
    }

    /// Advance one tick. Returns `None` once the world has finished.
    pub fn step(&mut self) -> Option<TickSummary> {
        if !self.running {
            return None;
        }
        let next_tick = self.tick.next();
        let before = self.model.population();

        self.model.prepare_tick(&mut self.rng);
        self.stage_agents();
        let expired_features = self.model.age_features();
        self.tick = next_tick;

        let finished = next_tick.0 >= self.config.tick_limit || self.model.is_exhausted();
        let summary = TickSummary {
            tick: next_tick,
            population: self.model.population(),
            removed: before.saturating_sub(self.model.population()),
            expired_features,
            finished,
        };
        let metrics = self.model.reporters();
        self.reporters.record(next_tick, &metrics);
        self.stage_persistence(&summary, metrics);

        if summary.removed > 0 {
            debug!(model = M::NAME, tick = next_tick.0, removed = summary.removed, "agents removed");
        }
        if finished {
            self.running = false;
            info!(
                model = M::NAME,
                run_id = self.config.run_id,
                tick = next_tick.0,
                population = summary.population,
                "run finished"
            );
        }
        Some(summary)
    }

    /// Step up to `ticks` times, returning how many ticks actually ran.
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        let mut executed = 0;
        while executed < ticks && self.step().is_some() {
            executed += 1;
        }
        executed
    }

    /// Step until the world finishes, returning the final tick.
    pub fn run(&mut self) -> Tick {
        while self.step().is_some() {}
        self.tick
    }

    /// Render description of the current state.
    #[must_use]
    pub fn frame(&self) -> Frame {
        Frame::build(self.tick, &self.model.bounds(), self.model.portrayals())
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn reporters(&self) -> &ReporterLog {
        &self.reporters
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Replace the persistence sink.
    pub fn set_persistence(&mut self, persistence: Box<dyn WorldPersistence>) {
        self.persistence = persistence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;
    use slotmap::SlotMap;
    use std::sync::{Arc, Mutex};

    /// Agents count down and leave when they reach zero; an agent carrying a
    /// victim removes it on its first turn.
    #[derive(Debug, Default)]
    struct Countdown {
        agents: SlotMap<AgentId, (u32, Option<AgentId>)>,
        visits: Vec<AgentId>,
        exhaust_when_empty: bool,
    }

    #[derive(Debug, Clone)]
    struct CountdownConfig {
        lifetimes: Vec<u32>,
    }

    impl Model for Countdown {
        type Config = CountdownConfig;
        const NAME: &'static str = "countdown";

        fn build(config: &Self::Config, _rng: &mut dyn RngCore) -> Result<Self, WorldError> {
            let mut model = Countdown {
                exhaust_when_empty: true,
                ..Countdown::default()
            };
            for lifetime in &config.lifetimes {
                model.agents.insert((*lifetime, None));
            }
            Ok(model)
        }

        fn bounds(&self) -> Bounds {
            Bounds::new(10.0, 10.0)
        }

        fn agent_ids(&self) -> Vec<AgentId> {
            self.agents.keys().collect()
        }

        fn contains_agent(&self, id: AgentId) -> bool {
            self.agents.contains_key(id)
        }

        fn population(&self) -> usize {
            self.agents.len()
        }

        fn step_agent(&mut self, id: AgentId, _rng: &mut dyn RngCore) {
            self.visits.push(id);
            let Some((remaining, victim)) = self.agents.get_mut(id) else {
                return;
            };
            *remaining = remaining.saturating_sub(1);
            let done = *remaining == 0;
            if let Some(victim) = victim.take() {
                self.agents.remove(victim);
            }
            if done {
                self.agents.remove(id);
            }
        }

        fn reporters(&self) -> Vec<MetricSample> {
            vec![MetricSample::count("agents", self.agents.len())]
        }

        fn is_exhausted(&self) -> bool {
            self.exhaust_when_empty && self.agents.is_empty()
        }

        fn portrayals(&self) -> Vec<Portrayal> {
            self.agents
                .values()
                .map(|_| Portrayal::circle(Position::new(5.0, 5.0), "black", 1.0))
                .collect()
        }
    }

    #[derive(Clone, Default)]
    struct SpyPersistence {
        logs: Arc<Mutex<Vec<PersistenceBatch>>>,
    }

    impl WorldPersistence for SpyPersistence {
        fn on_tick(&mut self, payload: &PersistenceBatch) {
            self.logs.lock().unwrap().push(payload.clone());
        }
    }

    fn seeded(tick_limit: u64) -> WorldConfig {
        WorldConfig {
            tick_limit,
            rng_seed: Some(7),
            ..WorldConfig::default()
        }
    }

    #[test]
    fn reporters_sampled_at_construction() {
        let world: World<Countdown> = World::new(
            seeded(10),
            &CountdownConfig {
                lifetimes: vec![3, 3],
            },
        )
        .expect("world");
        assert_eq!(world.reporters().rows().len(), 1);
        assert_eq!(world.reporters().latest_value("agents"), Some(2.0));
        assert_eq!(world.frame().len(), 2);
    }

    #[test]
    fn stops_at_tick_limit_and_ignores_further_steps() {
        let mut world: World<Countdown> = World::new(
            seeded(3),
            &CountdownConfig {
                lifetimes: vec![100],
            },
        )
        .expect("world");
        assert_eq!(world.run(), Tick(3));
        assert!(!world.is_running());
        assert!(world.step().is_none());
        assert_eq!(world.tick(), Tick(3));
        assert_eq!(world.reporters().rows().len(), 4);
    }

    #[test]
    fn stops_when_model_exhausted() {
        let mut world: World<Countdown> = World::new(
            seeded(1_000),
            &CountdownConfig {
                lifetimes: vec![2, 4],
            },
        )
        .expect("world");
        assert_eq!(world.run(), Tick(4));
        let series = world.reporters().series("agents").expect("series");
        assert_eq!(series, vec![2.0, 2.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn removed_agents_are_not_stepped() {
        let mut model = Countdown::default();
        let victim = model.agents.insert((5, None));
        let hunter = model.agents.insert((5, Some(victim)));
        let mut world = World::from_model(seeded(1), model).expect("world");
        let summary = world.step().expect("summary");
        assert_eq!(summary.removed, 1);
        assert!(summary.finished);
        let visits = &world.model().visits;
        assert!(visits.contains(&hunter));
        // The victim may have moved before the hunter, but never after it.
        if let Some(pos) = visits.iter().position(|id| *id == victim) {
            assert!(pos < visits.iter().position(|id| *id == hunter).unwrap_or(0));
        }
    }

    #[test]
    fn persistence_respects_interval_and_final_tick() {
        let spy = SpyPersistence::default();
        let logs = spy.logs.clone();
        let config = WorldConfig {
            persistence_interval: 2,
            history_capacity: 2,
            run_id: 42,
            ..seeded(5)
        };
        let mut world: World<Countdown> = World::with_persistence(
            config,
            &CountdownConfig {
                lifetimes: vec![1, 10],
            },
            Box::new(spy),
        )
        .expect("world");
        world.run();

        let entries = logs.lock().unwrap();
        let ticks: Vec<u64> = entries.iter().map(|b| b.summary.tick.0).collect();
        assert_eq!(ticks, vec![2, 4, 5]);
        assert!(entries.iter().all(|b| b.run_id == 42 && b.model == "countdown"));
        assert!(entries[2].summary.finished);

        let history: Vec<_> = world.history().map(|s| s.tick).collect();
        assert_eq!(history, vec![Tick(4), Tick(5)]);
    }

    #[test]
    fn removal_event_reported() {
        let spy = SpyPersistence::default();
        let logs = spy.logs.clone();
        let mut world: World<Countdown> = World::with_persistence(
            seeded(5),
            &CountdownConfig {
                lifetimes: vec![1, 10],
            },
            Box::new(spy),
        )
        .expect("world");
        world.step();
        let entries = logs.lock().unwrap();
        assert_eq!(
            entries[0].events,
            vec![PersistenceEvent::new(PersistenceEventKind::Removals, 1)]
        );
    }

    #[test]
    fn seeded_activation_order_is_reproducible() {
        let config = CountdownConfig {
            lifetimes: vec![50; 12],
        };
        let visits = |seed| {
            let mut world: World<Countdown> = World::new(
                WorldConfig {
                    rng_seed: Some(seed),
                    tick_limit: 3,
                    ..WorldConfig::default()
                },
                &config,
            )
            .expect("world");
            world.run();
            world.model().visits.clone()
        };
        assert_eq!(visits(5), visits(5));
        assert_ne!(visits(5), visits(6));
    }

    #[test]
    fn empty_model_never_runs() {
        let mut world: World<Countdown> =
            World::new(seeded(10), &CountdownConfig { lifetimes: vec![] }).expect("world");
        assert!(!world.is_running());
        assert!(world.step().is_none());
    }
}
