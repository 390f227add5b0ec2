//! Lycanthropy spreading through a village of wanderers.
//!
//! Transformed lycanthropes infect nearby villagers, clerics cure the ones that
//! are not transformed and hunters shoot the transformed ones.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use swarmlab_core::batch::{BatchRow, BatchRun, run_batch};
use swarmlab_core::geometry::{Bounds, Position, move_within, random_heading};
use swarmlab_core::{
    AgentId, MetricSample, Model, PersistenceEvent, Portray, Portrayal, WorldConfig, WorldError,
};
use swarmlab_index::{NeighborhoodIndex, UniformGridIndex};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VillageConfig {
    pub width: f64,
    pub height: f64,
    /// Distance every inhabitant wanders per tick.
    pub speed: f64,
    pub n_villagers: usize,
    pub n_lycanthropes: usize,
    pub n_clerics: usize,
    pub n_hunters: usize,
    pub distance_attack: f64,
    /// Per-tick probability that a lycanthrope is transformed next tick.
    pub p_attack: f64,
    pub distance_care: f64,
    pub distance_shoot: f64,
    pub index_cell_size: f64,
}

impl Default for VillageConfig {
    fn default() -> Self {
        Self {
            width: 600.0,
            height: 600.0,
            speed: 10.0,
            n_villagers: 20,
            n_lycanthropes: 5,
            n_clerics: 1,
            n_hunters: 2,
            distance_attack: 40.0,
            p_attack: 0.1,
            distance_care: 30.0,
            distance_shoot: 40.0,
            index_cell_size: 40.0,
        }
    }
}

impl VillageConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(WorldError::InvalidConfig("village dimensions must be positive"));
        }
        if self.speed < 0.0
            || self.distance_attack < 0.0
            || self.distance_care < 0.0
            || self.distance_shoot < 0.0
        {
            return Err(WorldError::InvalidConfig(
                "speed and interaction distances must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.p_attack) {
            return Err(WorldError::InvalidConfig("p_attack must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Villager { lycanthrope: bool, transformed: bool },
    Cleric,
    Hunter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inhabitant {
    pub position: Position,
    pub role: Role,
}

impl Inhabitant {
    #[must_use]
    pub const fn villager(position: Position) -> Self {
        Self {
            position,
            role: Role::Villager {
                lycanthrope: false,
                transformed: false,
            },
        }
    }

    #[must_use]
    pub const fn lycanthrope(position: Position, transformed: bool) -> Self {
        Self {
            position,
            role: Role::Villager {
                lycanthrope: true,
                transformed,
            },
        }
    }

    #[must_use]
    pub const fn is_villager(&self) -> bool {
        matches!(self.role, Role::Villager { .. })
    }

    #[must_use]
    pub const fn is_lycanthrope(&self) -> bool {
        matches!(
            self.role,
            Role::Villager {
                lycanthrope: true,
                ..
            }
        )
    }

    #[must_use]
    pub const fn is_transformed(&self) -> bool {
        matches!(
            self.role,
            Role::Villager {
                transformed: true,
                ..
            }
        )
    }
}

impl Portray for Inhabitant {
    fn portrayal(&self) -> Portrayal {
        match self.role {
            Role::Villager {
                lycanthrope: true,
                transformed,
            } => Portrayal::circle(self.position, "red", if transformed { 6.0 } else { 3.0 }),
            Role::Villager { .. } => Portrayal::circle(self.position, "blue", 3.0),
            Role::Cleric => Portrayal::circle(self.position, "green", 3.0),
            Role::Hunter => Portrayal::circle(self.position, "black", 3.0),
        }
    }
}

/// Headcount by role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Census {
    pub population: usize,
    pub lycanthropes: usize,
    pub transformed: usize,
    pub clerics: usize,
    pub hunters: usize,
}

impl Census {
    /// Everyone who is not a lycanthrope, clerics and hunters included.
    #[must_use]
    pub const fn humans(&self) -> usize {
        self.population - self.lycanthropes
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    infections: usize,
    cures: usize,
    shootings: usize,
}

#[derive(Debug, Clone)]
pub struct Village {
    config: VillageConfig,
    bounds: Bounds,
    inhabitants: SlotMap<AgentId, Inhabitant>,
    villager_index: UniformGridIndex<AgentId>,
    pending: Tally,
}

impl Village {
    /// Village with nobody in it.
    pub fn empty(config: VillageConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let villager_index = UniformGridIndex::new(config.index_cell_size)
            .map_err(|_| WorldError::InvalidConfig("index_cell_size must be positive"))?;
        Ok(Self {
            bounds: Bounds::new(config.width, config.height),
            config,
            inhabitants: SlotMap::with_key(),
            villager_index,
            pending: Tally::default(),
        })
    }

    pub fn spawn(&mut self, inhabitant: Inhabitant) -> AgentId {
        let position = inhabitant.position;
        let is_villager = inhabitant.is_villager();
        let id = self.inhabitants.insert(inhabitant);
        if is_villager {
            self.villager_index.insert(id, (position.x, position.y));
        }
        id
    }

    fn remove(&mut self, id: AgentId) {
        if self.inhabitants.remove(id).is_some() {
            self.villager_index.remove(id);
        }
    }

    #[must_use]
    pub fn inhabitant(&self, id: AgentId) -> Option<&Inhabitant> {
        self.inhabitants.get(id)
    }

    pub fn inhabitants(&self) -> impl Iterator<Item = (AgentId, &Inhabitant)> {
        self.inhabitants.iter()
    }

    #[must_use]
    pub fn config(&self) -> &VillageConfig {
        &self.config
    }

    #[must_use]
    pub fn census(&self) -> Census {
        let mut census = Census {
            population: self.inhabitants.len(),
            ..Census::default()
        };
        for inhabitant in self.inhabitants.values() {
            match inhabitant.role {
                Role::Villager {
                    lycanthrope: true,
                    transformed,
                } => {
                    census.lycanthropes += 1;
                    census.transformed += usize::from(transformed);
                }
                Role::Villager { .. } => {}
                Role::Cleric => census.clerics += 1,
                Role::Hunter => census.hunters += 1,
            }
        }
        census
    }

    fn villagers_near(&self, center: Position, radius: f64) -> Vec<AgentId> {
        let mut found = Vec::new();
        self.villager_index
            .neighbors_within((center.x, center.y), radius, &mut |id, _| found.push(id));
        found
    }

    fn infect_around(&mut self, center: Position) {
        for id in self.villagers_near(center, self.config.distance_attack) {
            if let Some(Inhabitant {
                role: Role::Villager { lycanthrope, .. },
                ..
            }) = self.inhabitants.get_mut(id)
                && !*lycanthrope
            {
                *lycanthrope = true;
                self.pending.infections += 1;
            }
        }
    }

    fn cure_around(&mut self, center: Position) {
        for id in self.villagers_near(center, self.config.distance_care) {
            if let Some(Inhabitant {
                role:
                    Role::Villager {
                        lycanthrope,
                        transformed: false,
                    },
                ..
            }) = self.inhabitants.get_mut(id)
                && *lycanthrope
            {
                *lycanthrope = false;
                self.pending.cures += 1;
            }
        }
    }

    fn shoot_around(&mut self, center: Position) {
        for id in self.villagers_near(center, self.config.distance_shoot) {
            if self
                .inhabitants
                .get(id)
                .is_some_and(Inhabitant::is_transformed)
            {
                self.remove(id);
                self.pending.shootings += 1;
                debug!("transformed lycanthrope shot");
            }
        }
    }
}

impl Model for Village {
    type Config = VillageConfig;
    const NAME: &'static str = "village";

    fn build(config: &Self::Config, rng: &mut dyn RngCore) -> Result<Self, WorldError> {
        let mut village = Self::empty(config.clone())?;
        let bounds = village.bounds;
        for _ in 0..config.n_villagers {
            village.spawn(Inhabitant::villager(bounds.sample(rng)));
        }
        for _ in 0..config.n_lycanthropes {
            village.spawn(Inhabitant::lycanthrope(bounds.sample(rng), false));
        }
        for _ in 0..config.n_clerics {
            village.spawn(Inhabitant {
                position: bounds.sample(rng),
                role: Role::Cleric,
            });
        }
        for _ in 0..config.n_hunters {
            village.spawn(Inhabitant {
                position: bounds.sample(rng),
                role: Role::Hunter,
            });
        }
        Ok(village)
    }

    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn agent_ids(&self) -> Vec<AgentId> {
        self.inhabitants.keys().collect()
    }

    fn contains_agent(&self, id: AgentId) -> bool {
        self.inhabitants.contains_key(id)
    }

    fn population(&self) -> usize {
        self.inhabitants.len()
    }

    fn step_agent(&mut self, id: AgentId, rng: &mut dyn RngCore) {
        let Some(inhabitant) = self.inhabitants.get_mut(id) else {
            return;
        };
        let heading = random_heading(rng);
        inhabitant.position = move_within(
            inhabitant.position,
            self.config.speed,
            heading,
            &self.bounds,
            &[],
            0.0,
        );
        let position = inhabitant.position;
        let role = inhabitant.role;
        if inhabitant.is_villager() {
            self.villager_index.insert(id, (position.x, position.y));
        }

        match role {
            Role::Villager {
                lycanthrope: true,
                transformed,
            } => {
                if transformed {
                    self.infect_around(position);
                }
                let roll = rng.random::<f64>() < self.config.p_attack;
                if let Some(Inhabitant {
                    role: Role::Villager { transformed, .. },
                    ..
                }) = self.inhabitants.get_mut(id)
                {
                    *transformed = roll;
                }
            }
            Role::Villager { .. } => {}
            Role::Cleric => self.cure_around(position),
            Role::Hunter => self.shoot_around(position),
        }
    }

    fn reporters(&self) -> Vec<MetricSample> {
        let census = self.census();
        vec![
            MetricSample::count("humans", census.humans()),
            MetricSample::count("population", census.population),
            MetricSample::count("lycanthropes", census.lycanthropes),
            MetricSample::count("lycanthropes_transformed", census.transformed),
            MetricSample::count("clerics", census.clerics),
            MetricSample::count("hunters", census.hunters),
        ]
    }

    fn drain_events(&mut self) -> Vec<PersistenceEvent> {
        let pending = std::mem::take(&mut self.pending);
        [
            ("infections", pending.infections),
            ("cures", pending.cures),
            ("shootings", pending.shootings),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| PersistenceEvent::custom(name, count))
        .collect()
    }

    fn portrayals(&self) -> Vec<Portrayal> {
        self.inhabitants.values().map(Portray::portrayal).collect()
    }
}

/// Sweep the number of clerics from 0 to 5 in a village of 50 villagers,
/// 5 lycanthropes and 1 hunter, `iterations` runs per setting.
pub fn clerics_sweep(
    world: &WorldConfig,
    iterations: usize,
) -> Result<Vec<BatchRow<usize>>, WorldError> {
    let clerics: Vec<usize> = (0..=5).collect();
    let base_seed = world.rng_seed.unwrap_or_else(rand::random);
    let runs = BatchRun::plan(&clerics, iterations, base_seed);
    info!(runs = runs.len(), "starting clerics sweep");
    run_batch::<Village, _, _>(world, runs, |n_clerics| VillageConfig {
        n_villagers: 50,
        n_lycanthropes: 5,
        n_clerics: *n_clerics,
        n_hunters: 1,
        ..VillageConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    /// Inhabitants do not move, so effects depend only on placement.
    fn still_village() -> Village {
        Village::empty(VillageConfig {
            speed: 0.0,
            ..VillageConfig::default()
        })
        .expect("village")
    }

    #[test]
    fn partial_json_config_keeps_defaults() {
        let config: VillageConfig =
            serde_json::from_str(r#"{"n_clerics": 4, "p_attack": 0.5}"#).expect("config");
        assert_eq!(config.n_clerics, 4);
        assert_eq!(config.p_attack, 0.5);
        assert_eq!(config.n_villagers, VillageConfig::default().n_villagers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn transformed_lycanthrope_infects_neighbors() {
        let mut village = still_village();
        let wolf = village.spawn(Inhabitant::lycanthrope(Position::new(100.0, 100.0), true));
        let near = village.spawn(Inhabitant::villager(Position::new(130.0, 100.0)));
        let far = village.spawn(Inhabitant::villager(Position::new(200.0, 100.0)));
        let mut rng = SmallRng::seed_from_u64(1);
        village.step_agent(wolf, &mut rng);
        assert!(village.inhabitant(near).is_some_and(Inhabitant::is_lycanthrope));
        assert!(!village.inhabitant(far).is_some_and(Inhabitant::is_lycanthrope));
        assert_eq!(village.drain_events(), vec![PersistenceEvent::custom("infections", 1)]);
    }

    #[test]
    fn dormant_lycanthrope_does_not_infect() {
        let mut village = still_village();
        let wolf = village.spawn(Inhabitant::lycanthrope(Position::new(100.0, 100.0), false));
        let near = village.spawn(Inhabitant::villager(Position::new(110.0, 100.0)));
        let mut rng = SmallRng::seed_from_u64(1);
        village.step_agent(wolf, &mut rng);
        assert!(!village.inhabitant(near).is_some_and(Inhabitant::is_lycanthrope));
    }

    #[test]
    fn cleric_cures_only_untransformed() {
        let mut village = still_village();
        let cleric = village.spawn(Inhabitant {
            position: Position::new(300.0, 300.0),
            role: Role::Cleric,
        });
        let dormant = village.spawn(Inhabitant::lycanthrope(Position::new(320.0, 300.0), false));
        let raging = village.spawn(Inhabitant::lycanthrope(Position::new(300.0, 320.0), true));
        let mut rng = SmallRng::seed_from_u64(1);
        village.step_agent(cleric, &mut rng);
        assert!(!village.inhabitant(dormant).is_some_and(Inhabitant::is_lycanthrope));
        assert!(village.inhabitant(raging).is_some_and(Inhabitant::is_lycanthrope));
    }

    #[test]
    fn hunter_shoots_transformed_within_range() {
        let mut village = still_village();
        let hunter = village.spawn(Inhabitant {
            position: Position::new(300.0, 300.0),
            role: Role::Hunter,
        });
        let raging = village.spawn(Inhabitant::lycanthrope(Position::new(340.0, 300.0), true));
        let dormant = village.spawn(Inhabitant::lycanthrope(Position::new(310.0, 300.0), false));
        let mut rng = SmallRng::seed_from_u64(1);
        village.step_agent(hunter, &mut rng);
        assert!(village.inhabitant(raging).is_none());
        assert!(village.inhabitant(dormant).is_some());
        assert_eq!(village.census().population, 2);
    }

    #[test]
    fn p_attack_one_keeps_lycanthrope_transformed() {
        let mut village = Village::empty(VillageConfig {
            p_attack: 1.0,
            ..VillageConfig::default()
        })
        .expect("village");
        let wolf = village.spawn(Inhabitant::lycanthrope(Position::new(100.0, 100.0), false));
        let mut rng = SmallRng::seed_from_u64(4);
        village.step_agent(wolf, &mut rng);
        assert!(village.inhabitant(wolf).is_some_and(Inhabitant::is_transformed));
    }

    #[test]
    fn census_counts_clerics_and_hunters_as_humans() {
        let mut rng = SmallRng::seed_from_u64(2);
        let village = Village::build(&VillageConfig::default(), &mut rng).expect("village");
        let census = village.census();
        assert_eq!(census.population, 28);
        assert_eq!(census.lycanthropes, 5);
        assert_eq!(census.humans(), 23);
        let reporters = village.reporters();
        assert_eq!(reporters[0].name, "humans");
        assert_eq!(reporters[0].value, 23.0);
    }

    #[test]
    fn rejects_bad_probability() {
        let config = VillageConfig {
            p_attack: -0.1,
            ..VillageConfig::default()
        };
        assert!(matches!(config.validate(), Err(WorldError::InvalidConfig(_))));
    }
}
