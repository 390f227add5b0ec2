use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use swarmlab_core::geometry::{Position, bearing, is_blocked, move_within, random_heading};
use swarmlab_core::{Portray, Portrayal};

use crate::{FishParams, Ocean};

/// Attempts at a legal move before a fish gives up for the tick.
pub const FISH_MOVE_ATTEMPTS: u32 = 500;

/// What a fish last saw coming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Threat {
    /// A shark: flee toward sand.
    Predator,
    /// A seagull: scatter.
    Aerial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fish {
    pub position: Position,
    pub heading: f64,
    pub speed: f64,
    /// Remaining alarmed ticks.
    pub alarm: u32,
    pub threat: Option<Threat>,
}

impl Fish {
    #[must_use]
    pub fn new(position: Position, heading: f64, params: &FishParams) -> Self {
        Self {
            position,
            heading,
            speed: params.max_speed,
            alarm: 0,
            threat: None,
        }
    }

    fn sense(&mut self, ocean: &Ocean, params: &FishParams) {
        let vision_sq = params.vision * params.vision;
        if ocean
            .sharks()
            .any(|(_, shark)| shark.position.distance_sq(self.position) <= vision_sq)
        {
            self.alarm = params.encounter_memory;
            self.threat = Some(Threat::Predator);
        }
        if ocean
            .seagulls()
            .any(|(_, seagull)| seagull.position.distance_sq(self.position) <= vision_sq)
        {
            self.alarm = params.encounter_memory;
            self.threat = Some(Threat::Aerial);
        }
    }

    /// Noisy midpoint of the two sand banks closest to the fish.
    fn refuge(&self, ocean: &Ocean, rng: &mut dyn RngCore) -> Option<Position> {
        let mut sands: Vec<_> = ocean.sands().iter().collect();
        sands.sort_by(|a, b| {
            a.center
                .distance_sq(self.position)
                .total_cmp(&b.center.distance_sq(self.position))
        });
        sands.truncate(2);
        let radius = sands.first()?.radius;
        let count = sands.len() as f64;
        let mut x = rng.random::<f64>() * radius / 2.0 - radius / 4.0;
        let mut y = rng.random::<f64>() * radius / 2.0 - radius / 4.0;
        for sand in &sands {
            x += sand.center.x / count;
            y += sand.center.y / count;
        }
        Some(Position::new(x, y))
    }

    fn choose_heading(
        &self,
        ocean: &Ocean,
        params: &FishParams,
        alarmed: bool,
        rng: &mut dyn RngCore,
    ) -> f64 {
        let own = random_heading(rng);
        let mean = ocean.mean_fish_heading();
        let ratio = params.following_rate * self.speed / params.max_speed;
        let mut x = ratio * mean.cos() + (1.0 - ratio) * own.cos();
        let mut y = ratio * mean.sin() + (1.0 - ratio) * own.sin();

        if alarmed {
            match self.threat {
                Some(Threat::Predator) => {
                    if let Some(refuge) = self.refuge(ocean, rng)
                        && let Some(flee) = bearing(self.position, refuge)
                    {
                        x = x * (1.0 - params.alarmed_rate) + params.alarmed_rate * flee.cos();
                        y = y * (1.0 - params.alarmed_rate) + params.alarmed_rate * flee.sin();
                    }
                }
                Some(Threat::Aerial) => return random_heading(rng),
                None => {}
            }
        }
        y.atan2(x)
    }

    /// Flock, flee if alarmed, and move somewhere legal at the highest speed that allows it.
    pub(crate) fn step(&mut self, ocean: &Ocean, rng: &mut dyn RngCore) {
        let params = &ocean.config().fish;
        let bounds = ocean.bounds_ref();
        self.speed = params.max_speed;
        self.sense(ocean, params);

        let alarmed = self.alarm > 0;
        for attempt in 0..FISH_MOVE_ATTEMPTS {
            self.heading = self.choose_heading(ocean, params, alarmed && attempt == 0, rng);
            let candidate = move_within(
                self.position,
                self.speed,
                self.heading,
                bounds,
                ocean.land(),
                0.0,
            );
            if !bounds.is_outside(candidate)
                && !is_blocked(candidate, ocean.land(), params.land_margin)
            {
                self.position = candidate;
                self.alarm = self.alarm.saturating_sub(1);
                return;
            }
            self.speed /= 2.0;
        }
        self.speed = 0.0;
        self.alarm = self.alarm.saturating_sub(1);
    }
}

impl Portray for Fish {
    fn portrayal(&self) -> Portrayal {
        Portrayal::circle(self.position, "blue", 3.0)
    }
}
