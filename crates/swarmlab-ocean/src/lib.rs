//! Fish school, sharks and seagulls sharing a bounded ocean.
//!
//! Fish flock along the mean heading of the school and flee toward sand banks
//! when a shark comes close. Sharks chase fish or trail blood markers, slow down
//! on sand and occasionally strand there. Seagulls dive on a fish, fly off toward
//! the nearer shore and rest.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use swarmlab_core::geometry::{Bounds, Position, is_blocked, random_heading};
use swarmlab_core::portrayal::fading_red;
use swarmlab_core::{
    AgentId, DecayingMarker, Disc, MetricSample, Model, PersistenceEvent, Portray, Portrayal,
    WorldError, age_markers,
};
use swarmlab_index::{NeighborhoodIndex, UniformGridIndex};
use tracing::debug;

mod fish;
mod seagull;
mod shark;

pub use fish::{Fish, FISH_MOVE_ATTEMPTS, Threat};
pub use seagull::{Seagull, SeagullPhase};
pub use shark::Shark;

/// Ocean extent used by the default configuration.
pub const OCEAN_SIDE: f64 = 600.0;

const SHORE_ATTEMPTS: u32 = 1_000;

/// Fish parameters shared by the whole school.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FishParams {
    /// Weight of the school's mean heading against a fresh random direction.
    pub following_rate: f64,
    pub vision: f64,
    pub max_speed: f64,
    /// Weight of the flee direction toward sand when a shark is near.
    pub alarmed_rate: f64,
    /// Ticks a fish stays alarmed after its last sighting.
    pub encounter_memory: u32,
    /// Clearance kept from land.
    pub land_margin: f64,
}

impl Default for FishParams {
    fn default() -> Self {
        Self {
            following_rate: 0.8,
            vision: 40.0,
            max_speed: 10.0,
            alarmed_rate: 0.8,
            encounter_memory: 8,
            land_margin: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SharkParams {
    pub vision: f64,
    pub distance_eat: f64,
    pub max_speed: f64,
    pub proba_change_angle: f64,
    /// Ticks during which a shark that just ate cannot eat or chase.
    pub rest_time: u32,
    /// Speed factor applied on sand.
    pub slowing_factor: f64,
    /// Per-tick probability of stranding while on sand.
    pub stranded_proba: f64,
}

impl Default for SharkParams {
    fn default() -> Self {
        Self {
            vision: 40.0,
            distance_eat: 6.0,
            max_speed: 16.0,
            proba_change_angle: 0.3,
            rest_time: 5,
            slowing_factor: 0.2,
            stranded_proba: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeagullParams {
    pub vision: f64,
    pub max_speed: f64,
    pub rest_time: u32,
    pub distance_eat: f64,
    /// Distance under which a pursued or fled-to point counts as reached.
    pub arrival_distance: f64,
}

impl Default for SeagullParams {
    fn default() -> Self {
        Self {
            vision: 300.0,
            max_speed: 50.0,
            rest_time: 10,
            distance_eat: 3.0,
            arrival_distance: 5.0,
        }
    }
}

/// Shape of the blood markers left by predation and stranding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BloodParams {
    pub min_radius: f64,
    pub max_radius: f64,
    pub duration: u32,
}

impl Default for BloodParams {
    fn default() -> Self {
        Self {
            min_radius: 1.0,
            max_radius: 80.0,
            duration: 40,
        }
    }
}

impl BloodParams {
    #[must_use]
    pub fn marker_at(&self, position: Position) -> DecayingMarker {
        DecayingMarker::new(position, self.min_radius, self.max_radius, self.duration)
    }
}

/// Full ocean configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OceanConfig {
    pub width: f64,
    pub height: f64,
    pub n_fish: usize,
    pub n_sharks: usize,
    pub n_seagulls: usize,
    /// Spacing of the initial fish grid.
    pub fish_space: f64,
    pub fish: FishParams,
    pub shark: SharkParams,
    pub seagull: SeagullParams,
    pub blood: BloodParams,
    /// Sand banks: sharks slow down and may strand, fish flee toward them.
    pub sands: Vec<Disc>,
    /// Impassable land.
    pub land: Vec<Disc>,
    /// Cell edge of the fish neighborhood index.
    pub index_cell_size: f64,
}

/// Sand banks lining the two corners, plus the large one in the far corner.
#[must_use]
pub fn default_sands() -> Vec<Disc> {
    let mut sands: Vec<Disc> = [
        (150.0, 0.0),
        (100.0, 50.0),
        (50.0, 100.0),
        (0.0, 150.0),
        (450.0, 600.0),
        (500.0, 550.0),
        (550.0, 500.0),
        (600.0, 450.0),
    ]
    .into_iter()
    .map(|(x, y)| Disc::new(Position::new(x, y), 40.0))
    .collect();
    sands.push(Disc::new(Position::new(600.0, 600.0), 120.0));
    sands
}

impl Default for OceanConfig {
    fn default() -> Self {
        Self {
            width: OCEAN_SIDE,
            height: OCEAN_SIDE,
            n_fish: 30,
            n_sharks: 5,
            n_seagulls: 2,
            fish_space: 20.0,
            fish: FishParams::default(),
            shark: SharkParams::default(),
            seagull: SeagullParams::default(),
            blood: BloodParams::default(),
            sands: default_sands(),
            land: vec![Disc::new(Position::new(0.0, 0.0), 120.0)],
            index_cell_size: 40.0,
        }
    }
}

fn is_probability(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

impl OceanConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(WorldError::InvalidConfig("ocean dimensions must be positive"));
        }
        if self.fish_space < 0.0 {
            return Err(WorldError::InvalidConfig("fish_space must be non-negative"));
        }
        if !(self.fish.max_speed > 0.0
            && self.shark.max_speed > 0.0
            && self.seagull.max_speed > 0.0)
        {
            return Err(WorldError::InvalidConfig("speeds must be positive"));
        }
        if !(is_probability(self.fish.following_rate)
            && is_probability(self.fish.alarmed_rate)
            && is_probability(self.shark.proba_change_angle)
            && is_probability(self.shark.slowing_factor)
            && is_probability(self.shark.stranded_proba))
        {
            return Err(WorldError::InvalidConfig(
                "rates and probabilities must lie in [0, 1]",
            ));
        }
        if self.blood.duration == 0 || self.blood.min_radius > self.blood.max_radius {
            return Err(WorldError::InvalidConfig(
                "blood markers need a positive duration and min_radius <= max_radius",
            ));
        }
        if !(self.index_cell_size > 0.0) {
            return Err(WorldError::InvalidConfig("index_cell_size must be positive"));
        }
        Ok(())
    }
}

/// Any inhabitant of the ocean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OceanAgent {
    Fish(Fish),
    Shark(Shark),
    Seagull(Seagull),
}

impl OceanAgent {
    #[must_use]
    pub fn position(&self) -> Position {
        match self {
            Self::Fish(fish) => fish.position,
            Self::Shark(shark) => shark.position,
            Self::Seagull(seagull) => seagull.position,
        }
    }
}

/// Side effects a behavior asks the ocean to apply.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub prey: Option<AgentId>,
    pub marker: Option<DecayingMarker>,
    pub stranded: bool,
}

/// Running totals of predation, reported as persistence events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PredationTally {
    pub eaten_by_sharks: usize,
    pub eaten_by_seagulls: usize,
    pub sharks_stranded: usize,
}

/// The ocean model driven by [`swarmlab_core::World`].
#[derive(Debug, Clone)]
pub struct Ocean {
    config: OceanConfig,
    bounds: Bounds,
    agents: SlotMap<AgentId, OceanAgent>,
    fish_index: UniformGridIndex<AgentId>,
    markers: Vec<DecayingMarker>,
    mean_fish_heading: f64,
    totals: PredationTally,
    pending: PredationTally,
}

impl Ocean {
    /// Ocean with its sand banks and land but no inhabitants.
    pub fn empty(config: OceanConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let fish_index = UniformGridIndex::new(config.index_cell_size)
            .map_err(|_| WorldError::InvalidConfig("index_cell_size must be positive"))?;
        Ok(Self {
            bounds: Bounds::new(config.width, config.height),
            config,
            agents: SlotMap::with_key(),
            fish_index,
            markers: Vec::new(),
            mean_fish_heading: 0.0,
            totals: PredationTally::default(),
            pending: PredationTally::default(),
        })
    }

    /// Place the initial school on a regular grid with a random origin.
    fn populate_fish(&mut self, rng: &mut dyn RngCore) {
        let n = self.config.n_fish;
        let side = (n as f64).sqrt().floor() as usize;
        if side == 0 {
            return;
        }
        let per_column = n.div_ceil(side);
        let columns = n.div_ceil(per_column);
        let space = self.config.fish_space;
        let slack_x = (self.config.width - space * columns as f64).max(0.0);
        let slack_y = (self.config.height - space * per_column as f64).max(0.0);
        let origin = Position::new(rng.random::<f64>() * slack_x, rng.random::<f64>() * slack_y);
        for i in 0..n {
            let column = (i / per_column) as f64;
            let row = (i % per_column) as f64;
            let position = self.bounds.clamp(Position::new(
                origin.x + column * space,
                origin.y + row * space,
            ));
            let fish = Fish::new(position, random_heading(rng), &self.config.fish);
            self.spawn(OceanAgent::Fish(fish));
        }
    }

    /// Add an agent, keeping the fish index in sync.
    pub fn spawn(&mut self, agent: OceanAgent) -> AgentId {
        let position = agent.position();
        let is_fish = matches!(agent, OceanAgent::Fish(_));
        let id = self.agents.insert(agent);
        if is_fish {
            self.fish_index.insert(id, (position.x, position.y));
        }
        id
    }

    /// Remove an agent, returning it.
    pub fn remove(&mut self, id: AgentId) -> Option<OceanAgent> {
        let agent = self.agents.remove(id)?;
        if matches!(agent, OceanAgent::Fish(_)) {
            self.fish_index.remove(id);
        }
        Some(agent)
    }

    pub fn add_marker(&mut self, marker: DecayingMarker) {
        self.markers.push(marker);
    }

    #[must_use]
    pub fn config(&self) -> &OceanConfig {
        &self.config
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&OceanAgent> {
        self.agents.get(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &OceanAgent)> {
        self.agents.iter()
    }

    pub fn fish(&self) -> impl Iterator<Item = (AgentId, &Fish)> {
        self.agents.iter().filter_map(|(id, agent)| match agent {
            OceanAgent::Fish(fish) => Some((id, fish)),
            _ => None,
        })
    }

    pub fn sharks(&self) -> impl Iterator<Item = (AgentId, &Shark)> {
        self.agents.iter().filter_map(|(id, agent)| match agent {
            OceanAgent::Shark(shark) => Some((id, shark)),
            _ => None,
        })
    }

    pub fn seagulls(&self) -> impl Iterator<Item = (AgentId, &Seagull)> {
        self.agents.iter().filter_map(|(id, agent)| match agent {
            OceanAgent::Seagull(seagull) => Some((id, seagull)),
            _ => None,
        })
    }

    #[must_use]
    pub fn fish_count(&self) -> usize {
        self.fish_index.len()
    }

    #[must_use]
    pub fn markers(&self) -> &[DecayingMarker] {
        &self.markers
    }

    #[must_use]
    pub fn sands(&self) -> &[Disc] {
        &self.config.sands
    }

    #[must_use]
    pub fn land(&self) -> &[Disc] {
        &self.config.land
    }

    /// Speed-weighted circular mean of fish headings for the current tick.
    #[must_use]
    pub const fn mean_fish_heading(&self) -> f64 {
        self.mean_fish_heading
    }

    /// Predation totals since the ocean was built.
    #[must_use]
    pub const fn totals(&self) -> PredationTally {
        self.totals
    }

    pub(crate) fn bounds_ref(&self) -> &Bounds {
        &self.bounds
    }

    /// Nearest fish within `radius` of `pos`, with its distance.
    pub(crate) fn nearest_fish(&self, pos: Position, radius: f64) -> Option<(AgentId, f64)> {
        self.fish_index.nearest_within((pos.x, pos.y), radius)
    }

    fn apply(&mut self, actor: AgentId, outcome: Outcome, by_seagull: bool) {
        if let Some(prey) = outcome.prey
            && self.remove(prey).is_some()
        {
            if by_seagull {
                self.pending.eaten_by_seagulls += 1;
                self.totals.eaten_by_seagulls += 1;
            } else {
                self.pending.eaten_by_sharks += 1;
                self.totals.eaten_by_sharks += 1;
            }
            debug!(fish_left = self.fish_count(), by_seagull, "fish eaten");
        }
        if let Some(marker) = outcome.marker {
            self.markers.push(marker);
        }
        if outcome.stranded {
            self.remove(actor);
            self.pending.sharks_stranded += 1;
            self.totals.sharks_stranded += 1;
            debug!("shark stranded");
        }
    }
}

impl Ocean {
    /// Random point on the top or bottom edge clear of land.
    fn shore_spot(&self, rng: &mut dyn RngCore) -> Result<Position, WorldError> {
        for _ in 0..SHORE_ATTEMPTS {
            let y = if rng.random_bool(0.5) { self.config.height } else { 0.0 };
            let position = Position::new(rng.random::<f64>() * self.config.width, y);
            if !is_blocked(position, &self.config.land, 0.0) {
                return Ok(position);
            }
        }
        Err(WorldError::Placement {
            what: "seagull",
            attempts: SHORE_ATTEMPTS,
        })
    }
}

impl Model for Ocean {
    type Config = OceanConfig;
    const NAME: &'static str = "ocean";

    fn build(config: &Self::Config, rng: &mut dyn RngCore) -> Result<Self, WorldError> {
        let mut ocean = Self::empty(config.clone())?;
        ocean.populate_fish(rng);
        for _ in 0..config.n_sharks {
            let position = ocean.bounds.sample(rng);
            let shark = Shark::new(position, random_heading(rng), &config.shark);
            ocean.spawn(OceanAgent::Shark(shark));
        }
        for _ in 0..config.n_seagulls {
            let position = ocean.shore_spot(rng)?;
            ocean.spawn(OceanAgent::Seagull(Seagull::new(position)));
        }
        Ok(ocean)
    }

    fn bounds(&self) -> Bounds {
        self.bounds
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

    fn prepare_tick(&mut self, rng: &mut dyn RngCore) {
        let max_speed = self.config.fish.max_speed;
        let (mut x, mut y, mut weight) = (0.0, 0.0, 0.0);
        for (_, fish) in self.fish() {
            let ratio = fish.speed / max_speed;
            x += ratio * fish.heading.cos();
            y += ratio * fish.heading.sin();
            weight += ratio;
        }
        self.mean_fish_heading = if weight > 0.0 {
            y.atan2(x)
        } else {
            random_heading(rng)
        };
    }

    fn step_agent(&mut self, id: AgentId, rng: &mut dyn RngCore) {
        let Some(agent) = self.agents.get(id).cloned() else {
            return;
        };
        match agent {
            OceanAgent::Fish(mut fish) => {
                fish.step(self, rng);
                self.fish_index
                    .insert(id, (fish.position.x, fish.position.y));
                self.agents[id] = OceanAgent::Fish(fish);
            }
            OceanAgent::Shark(mut shark) => {
                let outcome = shark.step(self, rng);
                self.agents[id] = OceanAgent::Shark(shark);
                self.apply(id, outcome, false);
            }
            OceanAgent::Seagull(mut seagull) => {
                let outcome = seagull.step(self, rng);
                self.agents[id] = OceanAgent::Seagull(seagull);
                self.apply(id, outcome, true);
            }
        }
    }

    fn age_features(&mut self) -> usize {
        age_markers(&mut self.markers)
    }

    fn reporters(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::count("nb_fish", self.fish_count()),
            MetricSample::count("nb_sharks", self.sharks().count()),
            MetricSample::count("nb_seagulls", self.seagulls().count()),
            MetricSample::count("nb_markers", self.markers.len()),
        ]
    }

    fn drain_events(&mut self) -> Vec<PersistenceEvent> {
        let pending = std::mem::take(&mut self.pending);
        [
            ("fish_eaten_by_sharks", pending.eaten_by_sharks),
            ("fish_eaten_by_seagulls", pending.eaten_by_seagulls),
            ("sharks_stranded", pending.sharks_stranded),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| PersistenceEvent::custom(name, count))
        .collect()
    }

    fn is_exhausted(&self) -> bool {
        self.fish_count() == 0
    }

    fn portrayals(&self) -> Vec<Portrayal> {
        let mut out = Vec::with_capacity(
            self.config.sands.len() + self.config.land.len() + self.markers.len() + self.agents.len(),
        );
        out.extend(
            self.config
                .sands
                .iter()
                .map(|sand| Portrayal::circle(sand.center, "yellow", sand.radius).on_layer(0)),
        );
        out.extend(
            self.config
                .land
                .iter()
                .map(|land| Portrayal::circle(land.center, "green", land.radius).on_layer(0)),
        );
        out.extend(self.markers.iter().map(|marker| {
            Portrayal::circle(marker.position, fading_red(marker.progress()), marker.radius)
                .on_layer(0)
        }));
        out.extend(self.agents.values().map(|agent| match agent {
            OceanAgent::Fish(fish) => fish.portrayal(),
            OceanAgent::Shark(shark) => shark.portrayal(),
            OceanAgent::Seagull(seagull) => seagull.portrayal(),
        }));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn default_config_validates() {
        assert!(OceanConfig::default().validate().is_ok());
        let bad = OceanConfig {
            shark: SharkParams {
                stranded_proba: 1.5,
                ..SharkParams::default()
            },
            ..OceanConfig::default()
        };
        assert!(matches!(bad.validate(), Err(WorldError::InvalidConfig(_))));
    }

    #[test]
    fn build_places_every_agent_inside_bounds() {
        let mut rng = SmallRng::seed_from_u64(11);
        let ocean = Ocean::build(&OceanConfig::default(), &mut rng).expect("ocean");
        assert_eq!(ocean.fish_count(), 30);
        assert_eq!(ocean.sharks().count(), 5);
        assert_eq!(ocean.seagulls().count(), 2);
        let bounds = ocean.bounds();
        assert!(ocean.agents().all(|(_, agent)| bounds.contains(agent.position())));
        for (_, seagull) in ocean.seagulls() {
            assert!(seagull.position.y == 0.0 || seagull.position.y == 600.0);
        }
    }

    #[test]
    fn seagulls_start_off_land() {
        let config = OceanConfig {
            n_fish: 0,
            n_sharks: 0,
            n_seagulls: 40,
            land: vec![Disc::new(Position::new(300.0, 0.0), 250.0)],
            ..OceanConfig::default()
        };
        let mut rng = SmallRng::seed_from_u64(6);
        let ocean = Ocean::build(&config, &mut rng).expect("ocean");
        assert_eq!(ocean.seagulls().count(), 40);
        assert!(
            ocean
                .seagulls()
                .all(|(_, seagull)| !ocean.land()[0].contains(seagull.position, 0.0))
        );

        let shut = OceanConfig {
            land: vec![
                Disc::new(Position::new(300.0, 0.0), 500.0),
                Disc::new(Position::new(300.0, 600.0), 500.0),
            ],
            ..config
        };
        assert!(matches!(
            Ocean::build(&shut, &mut rng),
            Err(WorldError::Placement { what: "seagull", .. })
        ));
    }

    #[test]
    fn fish_grid_keeps_uneven_counts() {
        let mut rng = SmallRng::seed_from_u64(2);
        for n in [0, 1, 2, 10, 17] {
            let config = OceanConfig {
                n_fish: n,
                n_sharks: 0,
                n_seagulls: 0,
                ..OceanConfig::default()
            };
            let ocean = Ocean::build(&config, &mut rng).expect("ocean");
            assert_eq!(ocean.fish_count(), n);
        }
    }

    #[test]
    fn mean_heading_weights_by_speed() {
        let mut ocean = Ocean::empty(OceanConfig::default()).expect("ocean");
        let params = FishParams::default();
        let mut fast = Fish::new(Position::new(300.0, 300.0), 0.0, &params);
        fast.speed = params.max_speed;
        let mut still = Fish::new(Position::new(310.0, 300.0), std::f64::consts::PI, &params);
        still.speed = 0.0;
        ocean.spawn(OceanAgent::Fish(fast));
        ocean.spawn(OceanAgent::Fish(still));
        let mut rng = SmallRng::seed_from_u64(1);
        ocean.prepare_tick(&mut rng);
        assert!(ocean.mean_fish_heading().abs() < 1e-12);
    }

    #[test]
    fn reporters_and_frame_cover_everything() {
        let mut ocean = Ocean::empty(OceanConfig::default()).expect("ocean");
        ocean.spawn(OceanAgent::Seagull(Seagull::new(Position::new(10.0, 0.0))));
        ocean.add_marker(BloodParams::default().marker_at(Position::new(300.0, 300.0)));
        let reporters = ocean.reporters();
        let names: Vec<_> = reporters.iter().map(|r| r.name.as_ref()).collect();
        assert_eq!(names, ["nb_fish", "nb_sharks", "nb_seagulls", "nb_markers"]);
        assert_eq!(reporters[2].value, 1.0);
        assert_eq!(reporters[3].value, 1.0);
        // 9 sand banks, 1 land, 1 marker, 1 seagull.
        assert_eq!(ocean.portrayals().len(), 12);
        assert!(ocean.is_exhausted());
    }
}
