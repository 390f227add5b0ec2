//! Robots clearing a mined zone.
//!
//! Robots wander until a mine comes into sight, walk onto it and defuse it.
//! Quicksand halves their speed; leaving it drops a danger marker so others turn
//! back. Robots walking toward a mine drop indication markers that steer readers
//! perpendicular to the path, spreading the swarm out.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use swarmlab_core::geometry::{Bounds, Position, random_heading};
use swarmlab_core::{
    AgentId, Disc, MetricSample, Model, PersistenceEvent, Portray, Portrayal, WorldError,
};
use tracing::debug;

mod robot;

pub use robot::{Robot, best_spread_heading, closing_collision};

/// Two positions closer than this are the same spot.
pub const SAME_SPOT: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeminingConfig {
    pub width: f64,
    pub height: f64,
    /// Random features, robots and mines are placed in `[0, extent)²`.
    pub placement_extent: f64,
    pub n_robots: usize,
    pub n_obstacles: usize,
    pub n_quicksands: usize,
    pub n_mines: usize,
    /// Robot speed; sight is twice this.
    pub speed: f64,
    /// Per-tick probability that a wandering robot turns away from its neighbors.
    pub proba_change_angle: f64,
    /// Random headings tried before a blocked robot gives up for the tick.
    pub wander_attempts: u32,
    /// Rejection-sampling budget per placed robot or mine.
    pub placement_attempts: u32,
}

impl Default for DeminingConfig {
    fn default() -> Self {
        Self {
            width: 600.0,
            height: 600.0,
            placement_extent: 500.0,
            n_robots: 7,
            n_obstacles: 5,
            n_quicksands: 5,
            n_mines: 15,
            speed: 15.0,
            proba_change_angle: 0.05,
            wander_attempts: 100,
            placement_attempts: 10_000,
        }
    }
}

impl DeminingConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(WorldError::InvalidConfig("zone dimensions must be positive"));
        }
        if !(self.placement_extent > 0.0
            && self.placement_extent <= self.width.min(self.height))
        {
            return Err(WorldError::InvalidConfig(
                "placement_extent must be positive and fit in the zone",
            ));
        }
        if !(self.speed > 0.0) {
            return Err(WorldError::InvalidConfig("speed must be positive"));
        }
        if !(0.0..=1.0).contains(&self.proba_change_angle) {
            return Err(WorldError::InvalidConfig(
                "proba_change_angle must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sight(&self) -> f64 {
        2.0 * self.speed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MarkerPurpose {
    /// Quicksand behind this point: turn around.
    Danger,
    /// A robot headed toward a mine along `direction`: go perpendicular.
    Indication { direction: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub position: Position,
    pub purpose: MarkerPurpose,
}

impl Portray for Marker {
    fn portrayal(&self) -> Portrayal {
        let color = match self.purpose {
            MarkerPurpose::Danger => "red",
            MarkerPurpose::Indication { .. } => "green",
        };
        Portrayal::circle(self.position, color, 2.0).on_layer(2)
    }
}

/// Static part of the zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terrain {
    pub bounds: Bounds,
    pub obstacles: Vec<Disc>,
    pub quicksands: Vec<Disc>,
}

impl Terrain {
    /// Whether `pos` lies strictly inside an obstacle or quicksand.
    fn is_hazard(&self, pos: Position) -> bool {
        self.obstacles
            .iter()
            .chain(&self.quicksands)
            .any(|disc| disc.center.distance(pos) < disc.radius)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub defused: usize,
    pub danger_dropped: usize,
    pub indication_dropped: usize,
    pub markers_picked: usize,
}

#[derive(Debug, Clone)]
pub struct MinedZone {
    config: DeminingConfig,
    terrain: Terrain,
    robots: SlotMap<AgentId, Robot>,
    mines: Vec<Position>,
    markers: Vec<Marker>,
    totals: Tally,
    pending: Tally,
}

impl MinedZone {
    /// Zone with the given terrain and nothing else.
    pub fn with_terrain(config: DeminingConfig, terrain: Terrain) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            config,
            terrain,
            robots: SlotMap::with_key(),
            mines: Vec::new(),
            markers: Vec::new(),
            totals: Tally::default(),
            pending: Tally::default(),
        })
    }

    fn random_disc(&self, rng: &mut dyn RngCore) -> Disc {
        let extent = self.config.placement_extent;
        Disc::new(
            Position::new(rng.random::<f64>() * extent, rng.random::<f64>() * extent),
            10.0 + 20.0 * rng.random::<f64>(),
        )
    }

    fn free_spot(&self, what: &'static str, rng: &mut dyn RngCore) -> Result<Position, WorldError> {
        let extent = self.config.placement_extent;
        for _ in 0..self.config.placement_attempts {
            let candidate =
                Position::new(rng.random::<f64>() * extent, rng.random::<f64>() * extent);
            if !self.terrain.is_hazard(candidate) {
                return Ok(candidate);
            }
        }
        Err(WorldError::Placement {
            what,
            attempts: self.config.placement_attempts,
        })
    }

    pub fn spawn_robot(&mut self, robot: Robot) -> AgentId {
        self.robots.insert(robot)
    }

    pub fn add_mine(&mut self, position: Position) {
        self.mines.push(position);
    }

    pub fn add_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    #[must_use]
    pub fn config(&self) -> &DeminingConfig {
        &self.config
    }

    #[must_use]
    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    #[must_use]
    pub fn robot(&self, id: AgentId) -> Option<&Robot> {
        self.robots.get(id)
    }

    pub fn robots(&self) -> impl Iterator<Item = (AgentId, &Robot)> {
        self.robots.iter()
    }

    #[must_use]
    pub fn mines(&self) -> &[Position] {
        &self.mines
    }

    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    #[must_use]
    pub const fn totals(&self) -> Tally {
        self.totals
    }

    fn count_markers(&self, danger: bool) -> usize {
        self.markers
            .iter()
            .filter(|marker| matches!(marker.purpose, MarkerPurpose::Danger) == danger)
            .count()
    }
}

/// Mutable view of the zone handed to a robot for its turn.
pub(crate) struct Surroundings<'a> {
    pub id: AgentId,
    pub config: &'a DeminingConfig,
    pub terrain: &'a Terrain,
    pub robots: &'a SlotMap<AgentId, Robot>,
    pub mines: &'a mut Vec<Position>,
    pub markers: &'a mut Vec<Marker>,
    pub tally: &'a mut Tally,
}

impl Model for MinedZone {
    type Config = DeminingConfig;
    const NAME: &'static str = "demining";

    fn build(config: &Self::Config, rng: &mut dyn RngCore) -> Result<Self, WorldError> {
        let terrain = Terrain {
            bounds: Bounds::new(config.width, config.height),
            obstacles: Vec::new(),
            quicksands: Vec::new(),
        };
        let mut zone = Self::with_terrain(config.clone(), terrain)?;
        for _ in 0..config.n_obstacles {
            let disc = zone.random_disc(rng);
            zone.terrain.obstacles.push(disc);
        }
        for _ in 0..config.n_quicksands {
            let disc = zone.random_disc(rng);
            zone.terrain.quicksands.push(disc);
        }
        for _ in 0..config.n_robots {
            let position = zone.free_spot("robot", rng)?;
            let robot = Robot::new(position, random_heading(rng), config.speed);
            zone.spawn_robot(robot);
        }
        for _ in 0..config.n_mines {
            let position = zone.free_spot("mine", rng)?;
            zone.add_mine(position);
        }
        Ok(zone)
    }

    fn bounds(&self) -> Bounds {
        self.terrain.bounds
    }

    fn agent_ids(&self) -> Vec<AgentId> {
        self.robots.keys().collect()
    }

    fn contains_agent(&self, id: AgentId) -> bool {
        self.robots.contains_key(id)
    }

    fn population(&self) -> usize {
        self.robots.len()
    }

    fn step_agent(&mut self, id: AgentId, rng: &mut dyn RngCore) {
        let Some(mut robot) = self.robots.get(id).cloned() else {
            return;
        };
        let before = self.pending;
        let mut surroundings = Surroundings {
            id,
            config: &self.config,
            terrain: &self.terrain,
            robots: &self.robots,
            mines: &mut self.mines,
            markers: &mut self.markers,
            tally: &mut self.pending,
        };
        robot.step(&mut surroundings, rng);
        self.robots[id] = robot;

        let defused = self.pending.defused - before.defused;
        if defused > 0 {
            debug!(defused, remaining = self.mines.len(), "mine defused");
        }
        self.totals.defused += defused;
        self.totals.danger_dropped += self.pending.danger_dropped - before.danger_dropped;
        self.totals.indication_dropped +=
            self.pending.indication_dropped - before.indication_dropped;
        self.totals.markers_picked += self.pending.markers_picked - before.markers_picked;
    }

    fn reporters(&self) -> Vec<MetricSample> {
        let quicksand_ticks: u64 = self.robots.values().map(|robot| robot.quicksand_ticks).sum();
        vec![
            MetricSample::count("mines", self.mines.len()),
            MetricSample::count("defused_mines", self.totals.defused),
            MetricSample::count("danger_markers", self.count_markers(true)),
            MetricSample::count("indication_markers", self.count_markers(false)),
            MetricSample::new("quicksand_ticks", quicksand_ticks as f64),
        ]
    }

    fn drain_events(&mut self) -> Vec<PersistenceEvent> {
        let pending = std::mem::take(&mut self.pending);
        [
            ("mines_defused", pending.defused),
            ("danger_markers_dropped", pending.danger_dropped),
            ("indication_markers_dropped", pending.indication_dropped),
            ("markers_picked", pending.markers_picked),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| PersistenceEvent::custom(name, count))
        .collect()
    }

    fn is_exhausted(&self) -> bool {
        self.mines.is_empty()
    }

    fn portrayals(&self) -> Vec<Portrayal> {
        let terrain = &self.terrain;
        let mut out = Vec::with_capacity(
            terrain.obstacles.len()
                + terrain.quicksands.len()
                + self.mines.len()
                + self.markers.len()
                + self.robots.len(),
        );
        out.extend(
            terrain
                .obstacles
                .iter()
                .map(|disc| Portrayal::circle(disc.center, "black", disc.radius)),
        );
        out.extend(
            terrain
                .quicksands
                .iter()
                .map(|disc| Portrayal::circle(disc.center, "olive", disc.radius)),
        );
        out.extend(
            self.mines
                .iter()
                .map(|mine| Portrayal::circle(*mine, "black", 2.0).on_layer(2)),
        );
        out.extend(self.markers.iter().map(Portray::portrayal));
        out.extend(self.robots.values().map(Portray::portrayal));
        out
    }
}
