use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use swarmlab_core::geometry::{Position, go_to, move_within, random_heading};
use swarmlab_core::{Portray, Portrayal};

use crate::{Ocean, Outcome, SharkParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shark {
    pub position: Position,
    pub heading: f64,
    pub speed: f64,
    pub in_sand: bool,
    pub rest_remaining: u32,
    /// Blood markers whose countdown is below this are ignored.
    pub marker_threshold: i64,
}

impl Shark {
    #[must_use]
    pub fn new(position: Position, heading: f64, params: &SharkParams) -> Self {
        Self {
            position,
            heading,
            speed: params.max_speed / 2.0,
            in_sand: false,
            rest_remaining: 0,
            marker_threshold: 0,
        }
    }

    #[must_use]
    pub const fn is_resting(&self) -> bool {
        self.rest_remaining > 0
    }

    fn hunting_speed(&self, params: &SharkParams) -> f64 {
        if self.in_sand {
            params.slowing_factor * params.max_speed
        } else {
            params.max_speed
        }
    }

    /// Pick the freshest blood marker in range, raising the threshold as markers are seen.
    fn scent(&mut self, ocean: &Ocean, params: &SharkParams) -> Option<Position> {
        let mut target = None;
        for marker in ocean.markers() {
            let distance = marker.position.distance(self.position);
            let countdown = i64::from(marker.countdown);
            if distance < params.vision + marker.radius && self.marker_threshold <= countdown {
                self.marker_threshold = countdown;
                target = Some(marker.position);
            }
            if distance < params.distance_eat && self.marker_threshold <= countdown {
                self.marker_threshold = countdown + 1;
            }
        }
        target
    }

    pub(crate) fn step(&mut self, ocean: &Ocean, rng: &mut dyn RngCore) -> Outcome {
        let params = &ocean.config().shark;
        let bounds = ocean.bounds_ref();
        let land = ocean.land();

        if ocean
            .sands()
            .iter()
            .any(|sand| sand.contains(self.position, 0.0))
        {
            if !self.in_sand {
                self.speed = params.slowing_factor * params.max_speed / 2.0;
                self.in_sand = true;
            }
            if rng.random::<f64>() < params.stranded_proba {
                return Outcome {
                    marker: Some(ocean.config().blood.marker_at(self.position)),
                    stranded: true,
                    ..Outcome::default()
                };
            }
        } else if self.in_sand {
            self.speed = params.max_speed / 2.0;
            self.in_sand = false;
        }

        self.rest_remaining = self.rest_remaining.saturating_sub(1);
        self.marker_threshold -= 1;
        let resting = self.is_resting();

        let nearest = ocean.nearest_fish(self.position, params.vision.max(params.distance_eat));
        match nearest {
            Some((prey, distance)) if distance <= params.distance_eat && !resting => {
                let at = ocean
                    .agent(prey)
                    .map_or(self.position, |agent| agent.position());
                self.rest_remaining = params.rest_time;
                Outcome {
                    prey: Some(prey),
                    marker: Some(ocean.config().blood.marker_at(at)),
                    stranded: false,
                }
            }
            Some((prey, distance)) if distance <= params.vision && !resting => {
                self.speed = self.hunting_speed(params);
                if let Some(agent) = ocean.agent(prey) {
                    (self.position, self.heading) =
                        go_to(agent.position(), self.position, self.speed, bounds, land, rng);
                }
                Outcome::default()
            }
            _ => {
                match self.scent(ocean, params) {
                    Some(target) if !resting => {
                        self.speed = self.hunting_speed(params);
                        (self.position, self.heading) =
                            go_to(target, self.position, self.speed, bounds, land, rng);
                    }
                    _ => {
                        if rng.random::<f64>() < params.proba_change_angle {
                            self.heading = random_heading(rng);
                        }
                        self.position =
                            move_within(self.position, self.speed, self.heading, bounds, land, 0.0);
                    }
                }
                Outcome::default()
            }
        }
    }
}

impl Portray for Shark {
    fn portrayal(&self) -> Portrayal {
        Portrayal::circle(self.position, "black", 6.0)
    }
}
