use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use swarmlab_core::geometry::{Position, go_to, move_within};
use swarmlab_core::{Portray, Portrayal};

use crate::{Ocean, Outcome};

/// Where a seagull is in its dive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SeagullPhase {
    Exploring,
    /// Diving on the spot where a fish was seen.
    Pursuing(Position),
    /// Flying off toward the shore.
    Fleeing(Position),
    Resting(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seagull {
    pub position: Position,
    pub phase: SeagullPhase,
}

impl Seagull {
    #[must_use]
    pub const fn new(position: Position) -> Self {
        Self {
            position,
            phase: SeagullPhase::Exploring,
        }
    }

    /// One tick of the dive cycle. A seagull coming off its rest explores in the same tick.
    pub(crate) fn step(&mut self, ocean: &Ocean, rng: &mut dyn RngCore) -> Outcome {
        let params = &ocean.config().seagull;
        let bounds = ocean.bounds_ref();
        let mut outcome = Outcome::default();

        let phase = self.phase;
        self.phase = match phase {
            SeagullPhase::Resting(remaining) => match remaining.saturating_sub(1) {
                0 => self.explore(ocean, rng),
                left => SeagullPhase::Resting(left),
            },
            SeagullPhase::Exploring => self.explore(ocean, rng),
            SeagullPhase::Pursuing(target) => {
                let clear = self.fly(target, ocean, rng);
                if self.position.distance(target) < params.arrival_distance {
                    if let Some((prey, _)) = ocean.nearest_fish(self.position, params.distance_eat)
                        && let Some(fish) = ocean.agent(prey)
                    {
                        outcome.prey = Some(prey);
                        outcome.marker = Some(ocean.config().blood.marker_at(fish.position()));
                    }
                    SeagullPhase::Fleeing(self.shore(bounds.height))
                } else if clear {
                    SeagullPhase::Pursuing(target)
                } else {
                    // Land in the way: the dive is off.
                    SeagullPhase::Fleeing(self.shore(bounds.height))
                }
            }
            SeagullPhase::Fleeing(target) => {
                let clear = self.fly(target, ocean, rng);
                let arrived = self.position.distance(target) < params.arrival_distance;
                if arrived {
                    self.position = target;
                }
                if arrived || !clear {
                    match params.rest_time {
                        0 => SeagullPhase::Exploring,
                        rest => SeagullPhase::Resting(rest),
                    }
                } else {
                    SeagullPhase::Fleeing(target)
                }
            }
        };
        outcome
    }

    fn explore(&mut self, ocean: &Ocean, rng: &mut dyn RngCore) -> SeagullPhase {
        let params = &ocean.config().seagull;
        match ocean
            .nearest_fish(self.position, params.vision)
            .and_then(|(prey, _)| ocean.agent(prey))
        {
            Some(prey) => SeagullPhase::Pursuing(prey.position()),
            None => {
                let drift = (2.0 * rng.random::<f64>() - 1.0) * params.max_speed / 2.0;
                self.position =
                    move_within(self.position, drift, 0.0, ocean.bounds_ref(), ocean.land(), 0.0);
                SeagullPhase::Exploring
            }
        }
    }

    /// Step toward `target` around land; false when land cut the step short.
    fn fly(&mut self, target: Position, ocean: &Ocean, rng: &mut dyn RngCore) -> bool {
        let speed = ocean.config().seagull.max_speed;
        let start = self.position;
        let full = start.distance(target).min(speed);
        (self.position, _) = go_to(target, start, speed, ocean.bounds_ref(), ocean.land(), rng);
        self.position.distance(start) >= full / 2.0 - 1e-9
    }

    /// Nearer horizontal edge, straight above or below.
    fn shore(&self, height: f64) -> Position {
        let y = if self.position.y <= height / 2.0 {
            0.0
        } else {
            height
        };
        Position::new(self.position.x, y)
    }
}

impl Portray for Seagull {
    fn portrayal(&self) -> Portrayal {
        Portrayal::circle(self.position, "black", 5.0).hollow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fish, OceanAgent, OceanConfig};
    use rand::{SeedableRng, rngs::SmallRng};

    fn ocean_with_fish(at: Position) -> (Ocean, swarmlab_core::AgentId) {
        let mut ocean = Ocean::empty(OceanConfig::default()).expect("ocean");
        let params = ocean.config().fish.clone();
        let id = ocean.spawn(OceanAgent::Fish(Fish::new(at, 0.0, &params)));
        (ocean, id)
    }

    #[test]
    fn full_dive_cycle() {
        let fish_at = Position::new(300.0, 380.0);
        let (ocean, prey) = ocean_with_fish(fish_at);
        let mut seagull = Seagull::new(Position::new(300.0, 400.0));
        let mut rng = SmallRng::seed_from_u64(3);

        seagull.step(&ocean, &mut rng);
        assert_eq!(seagull.phase, SeagullPhase::Pursuing(fish_at));

        let outcome = seagull.step(&ocean, &mut rng);
        assert_eq!(outcome.prey, Some(prey));
        assert_eq!(seagull.position, fish_at);
        // 380 is in the lower half of a 600 tall ocean: head for y = 600.
        assert_eq!(
            seagull.phase,
            SeagullPhase::Fleeing(Position::new(300.0, 600.0))
        );

        for _ in 0..10 {
            if matches!(seagull.phase, SeagullPhase::Resting(_)) {
                break;
            }
            seagull.step(&ocean, &mut rng);
        }
        assert_eq!(seagull.position, Position::new(300.0, 600.0));
        assert_eq!(seagull.phase, SeagullPhase::Resting(10));

        for _ in 0..9 {
            seagull.step(&ocean, &mut rng);
        }
        assert_eq!(seagull.phase, SeagullPhase::Resting(1));
        // The last rest tick already spots the fish 220 away.
        seagull.step(&ocean, &mut rng);
        assert_eq!(seagull.phase, SeagullPhase::Pursuing(fish_at));
    }

    #[test]
    fn missed_dive_still_flees() {
        let (ocean, _) = ocean_with_fish(Position::new(300.0, 100.0));
        let mut seagull = Seagull {
            position: Position::new(300.0, 210.0),
            phase: SeagullPhase::Pursuing(Position::new(300.0, 200.0)),
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let outcome = seagull.step(&ocean, &mut rng);
        assert!(outcome.prey.is_none());
        assert_eq!(
            seagull.phase,
            SeagullPhase::Fleeing(Position::new(300.0, 0.0))
        );
    }

    #[test]
    fn explorer_drifts_horizontally_without_fish() {
        let ocean = Ocean::empty(OceanConfig::default()).expect("ocean");
        let mut seagull = Seagull::new(Position::new(300.0, 600.0));
        let mut rng = SmallRng::seed_from_u64(12);
        for _ in 0..20 {
            seagull.step(&ocean, &mut rng);
            assert_eq!(seagull.position.y, 600.0);
            assert_eq!(seagull.phase, SeagullPhase::Exploring);
        }
    }

    #[test]
    fn land_breaks_off_a_dive() {
        let config = OceanConfig {
            land: vec![swarmlab_core::Disc::new(Position::new(300.0, 300.0), 50.0)],
            ..OceanConfig::default()
        };
        let mut ocean = Ocean::empty(config).expect("ocean");
        let params = ocean.config().fish.clone();
        ocean.spawn(OceanAgent::Fish(Fish::new(Position::new(300.0, 180.0), 0.0, &params)));
        let land = ocean.land()[0];
        let mut seagull = Seagull {
            position: Position::new(300.0, 420.0),
            phase: SeagullPhase::Pursuing(Position::new(300.0, 180.0)),
        };
        let mut rng = SmallRng::seed_from_u64(8);

        seagull.step(&ocean, &mut rng);
        assert_eq!(seagull.position, Position::new(300.0, 370.0));
        let outcome = seagull.step(&ocean, &mut rng);
        assert!(outcome.prey.is_none());
        assert_eq!(seagull.position, Position::new(300.0, 357.5));
        assert_eq!(
            seagull.phase,
            SeagullPhase::Fleeing(Position::new(300.0, 600.0))
        );
        for _ in 0..30 {
            seagull.step(&ocean, &mut rng);
            assert!(!land.contains(seagull.position, 0.0));
        }
    }

    #[test]
    fn blocked_flight_rests_on_the_coast() {
        let config = OceanConfig {
            land: vec![swarmlab_core::Disc::new(Position::new(300.0, 60.0), 40.0)],
            ..OceanConfig::default()
        };
        let ocean = Ocean::empty(config).expect("ocean");
        let mut seagull = Seagull {
            position: Position::new(300.0, 110.0),
            phase: SeagullPhase::Fleeing(Position::new(300.0, 0.0)),
        };
        let mut rng = SmallRng::seed_from_u64(2);
        seagull.step(&ocean, &mut rng);
        assert!(!ocean.land()[0].contains(seagull.position, 0.0));
        assert_eq!(seagull.phase, SeagullPhase::Resting(10));
    }
}
