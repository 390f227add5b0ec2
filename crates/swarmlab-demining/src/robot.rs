use std::f64::consts::{FRAC_PI_2, PI};

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use swarmlab_core::geometry::{
    Approach, Position, approach, project, random_heading, wrap_unsigned_angle,
};
use swarmlab_core::{Portray, Portrayal};

use crate::{Marker, MarkerPurpose, SAME_SPOT, Surroundings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub position: Position,
    pub heading: f64,
    /// Current speed, halved while in quicksand.
    pub speed: f64,
    pub base_speed: f64,
    pub sight: f64,
    /// Markers are only read and dropped once this falls below zero.
    pub counter: f64,
    pub in_quicksand: bool,
    pub quicksand_ticks: u64,
    pub defused: usize,
}

impl Robot {
    #[must_use]
    pub fn new(position: Position, heading: f64, speed: f64) -> Self {
        Self {
            position,
            heading,
            speed,
            base_speed: speed,
            sight: 2.0 * speed,
            counter: 0.0,
            in_quicksand: false,
            quicksand_ticks: 0,
            defused: 0,
        }
    }

    fn moves_to(&mut self, next: Position, heading: f64) {
        self.position = next;
        self.heading = wrap_unsigned_angle(heading);
    }

    /// Whether moving to `next` hits the border, an obstacle or the path of a visible robot.
    pub(crate) fn collides(&self, next: Position, s: &Surroundings<'_>) -> bool {
        if !s.terrain.bounds.contains(next) {
            return true;
        }
        if s.terrain
            .obstacles
            .iter()
            .any(|disc| disc.contains(next, 0.0))
        {
            return true;
        }
        s.robots.iter().any(|(id, other)| {
            let distance = self.position.distance(other.position);
            id != s.id
                && distance > 0.0
                && distance <= self.sight
                && closing_collision(self.position, next, other.position, other.base_speed)
        })
    }

    /// Step toward `target` without clamping; returns the candidate position and heading.
    fn toward(&self, target: Position) -> (Position, f64) {
        match approach(target, self.position, self.speed) {
            Approach::Arrived => {
                let heading = if self.position.distance(target) > SAME_SPOT {
                    self.position.angle_to(target)
                } else {
                    self.heading
                };
                (target, heading)
            }
            Approach::Heading(angle) => (project(self.position, self.speed, angle), angle),
        }
    }

    fn defuse(&mut self, s: &mut Surroundings<'_>) {
        let before = s.mines.len();
        let here = self.position;
        s.mines.retain(|mine| mine.distance(here) > SAME_SPOT);
        let defused = before - s.mines.len();
        self.defused += defused;
        s.tally.defused += defused;
    }

    fn wade(&mut self, s: &mut Surroundings<'_>) {
        let in_sand = s
            .terrain
            .quicksands
            .iter()
            .any(|disc| disc.contains(self.position, 0.0));
        if in_sand {
            if !self.in_quicksand {
                self.speed = self.base_speed / 2.0;
                self.in_quicksand = true;
            }
            self.quicksand_ticks += 1;
        } else if self.in_quicksand {
            self.in_quicksand = false;
            self.speed = self.base_speed;
            s.markers.push(Marker {
                position: self.position,
                purpose: MarkerPurpose::Danger,
            });
            s.tally.danger_dropped += 1;
            self.counter = self.speed / 2.0;
        }
    }

    /// Obey the first marker on this exact spot that leads somewhere free, picking it up.
    fn follow_marker(&mut self, s: &mut Surroundings<'_>) -> bool {
        let here = self.position;
        let candidates: Vec<(usize, MarkerPurpose)> = s
            .markers
            .iter()
            .enumerate()
            .filter(|(_, marker)| marker.position.distance(here) <= SAME_SPOT)
            .map(|(index, marker)| (index, marker.purpose))
            .collect();
        for (index, purpose) in candidates {
            let angles = match purpose {
                MarkerPurpose::Danger => vec![self.heading + PI],
                MarkerPurpose::Indication { direction } => {
                    vec![direction + FRAC_PI_2, direction - FRAC_PI_2]
                }
            };
            for angle in angles {
                let next = project(self.position, self.speed, angle);
                if !self.collides(next, s) {
                    self.moves_to(next, angle);
                    s.markers.remove(index);
                    s.tally.markers_picked += 1;
                    return true;
                }
            }
        }
        false
    }

    fn seek_mine(&mut self, s: &mut Surroundings<'_>) -> bool {
        let visible: Vec<Position> = s
            .mines
            .iter()
            .copied()
            .filter(|mine| mine.distance(self.position) <= self.sight)
            .collect();
        for mine in visible {
            let (next, heading) = self.toward(mine);
            if self.collides(next, s) {
                continue;
            }
            self.moves_to(next, heading);
            if self.counter < self.speed / 2.0 - 1.0 {
                s.markers.push(Marker {
                    position: self.position,
                    purpose: MarkerPurpose::Indication {
                        direction: self.heading,
                    },
                });
                s.tally.indication_dropped += 1;
                self.counter = self.speed / 2.0;
            }
            return true;
        }
        false
    }

    fn seek_marker(&mut self, s: &Surroundings<'_>) -> bool {
        for marker in s.markers.iter() {
            let distance = marker.position.distance(self.position);
            if distance <= SAME_SPOT || distance > self.sight {
                continue;
            }
            let (next, heading) = self.toward(marker.position);
            if !self.collides(next, s) {
                self.moves_to(next, heading);
                return true;
            }
        }
        false
    }

    fn wander(&mut self, s: &Surroundings<'_>, rng: &mut dyn RngCore) {
        if rng.random::<f64>() < s.config.proba_change_angle {
            self.heading = match self.spread_heading(s) {
                Some(heading) => heading,
                None => random_heading(rng),
            };
        }
        let mut next = project(self.position, self.speed, self.heading);
        let mut attempts = 0;
        while self.collides(next, s) {
            if attempts == s.config.wander_attempts {
                return;
            }
            self.heading = random_heading(rng);
            next = project(self.position, self.speed, self.heading);
            attempts += 1;
        }
        self.position = next;
    }

    fn spread_heading(&self, s: &Surroundings<'_>) -> Option<f64> {
        let mut others: Vec<Position> = s
            .robots
            .iter()
            .filter(|(id, _)| *id != s.id)
            .map(|(_, robot)| robot.position)
            .collect();
        others.sort_by(|a, b| {
            a.distance_sq(self.position)
                .total_cmp(&b.distance_sq(self.position))
        });
        match others.as_slice() {
            [first, second, ..] => Some(best_spread_heading(self.position, *first, *second)),
            _ => None,
        }
    }

    pub(crate) fn step(&mut self, s: &mut Surroundings<'_>, rng: &mut dyn RngCore) {
        self.counter -= 1.0;
        self.defuse(s);
        self.wade(s);

        if self.counter < 0.0 && self.follow_marker(s) {
            return;
        }
        if self.seek_mine(s) {
            return;
        }
        if self.counter < 0.0 && self.seek_marker(s) {
            return;
        }
        self.wander(s, rng);
    }
}

/// Whether the segment `from → to` crosses the circle of `radius` around `other`.
///
/// Solves `|from + c·(to − from) − other|² = radius²` and reports a hit when a root
/// falls in `[0, 1]`. A robot that does not move never collides.
#[must_use]
pub fn closing_collision(from: Position, to: Position, other: Position, radius: f64) -> bool {
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let (ox, oy) = (from.x - other.x, from.y - other.y);
    let a = dx * dx + dy * dy;
    if a == 0.0 {
        return false;
    }
    let b = 2.0 * (dx * ox + dy * oy);
    let c = ox * ox + oy * oy - radius * radius;
    let delta = b * b - 4.0 * a * c;
    if delta < 0.0 {
        return false;
    }
    let root = delta.sqrt();
    [(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
        .into_iter()
        .any(|t| (0.0..=1.0).contains(&t))
}

/// Heading bisecting the widest gap between the directions to two neighbors.
#[must_use]
pub fn best_spread_heading(pos: Position, first: Position, second: Position) -> f64 {
    let a0 = wrap_unsigned_angle(pos.angle_to(first));
    let a1 = wrap_unsigned_angle(pos.angle_to(second));
    let alpha = (a0 - a1).abs();
    let beta = std::f64::consts::TAU - alpha;
    let heading = if alpha > beta {
        alpha / 2.0 + a0.min(a1)
    } else {
        beta / 2.0 + a0.max(a1)
    };
    wrap_unsigned_angle(heading)
}

impl Portray for Robot {
    fn portrayal(&self) -> Portrayal {
        Portrayal::arrow(self.position, "red", self.heading).on_layer(3)
    }
}
