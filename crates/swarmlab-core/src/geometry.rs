//! Plane geometry and the movement primitives shared by every spatial model.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::feature::Disc;

pub(crate) const FULL_TURN: f64 = std::f64::consts::TAU;

/// Number of times a blocked move is retried at half speed before giving up.
pub const MAX_MOVE_RETRIES: u32 = 10;

/// Point on the continuous plane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Squared distance, for comparisons that do not need the root.
    #[must_use]
    pub fn distance_sq(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Angle (radians, `atan2` convention) of the vector from `self` to `other`.
    #[must_use]
    pub fn angle_to(self, other: Self) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Midpoint between two positions.
    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

/// Rectangular world extent anchored at the origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Clamp `pos` into `[0, width] x [0, height]`.
    #[must_use]
    pub fn clamp(&self, pos: Position) -> Position {
        Position::new(pos.x.clamp(0.0, self.width), pos.y.clamp(0.0, self.height))
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        (0.0..=self.width).contains(&pos.x) && (0.0..=self.height).contains(&pos.y)
    }

    /// True when `pos` touches or crosses the border.
    #[must_use]
    pub fn is_outside(&self, pos: Position) -> bool {
        pos.x <= 0.0 || pos.y <= 0.0 || pos.x >= self.width || pos.y >= self.height
    }

    /// Map a position into the unit square used by render consumers.
    #[must_use]
    pub fn normalize(&self, pos: Position) -> (f64, f64) {
        (pos.x / self.width, pos.y / self.height)
    }

    /// Uniformly sample a position inside the bounds.
    pub fn sample(&self, rng: &mut dyn RngCore) -> Position {
        Position::new(
            rng.random::<f64>() * self.width,
            rng.random::<f64>() * self.height,
        )
    }
}

/// Wrap an angle into `[0, 2π)`.
#[must_use]
pub fn wrap_unsigned_angle(angle: f64) -> f64 {
    if angle.is_nan() {
        return 0.0;
    }
    angle.rem_euclid(FULL_TURN)
}

/// Uniformly random heading.
pub fn random_heading(rng: &mut dyn RngCore) -> f64 {
    rng.random::<f64>() * FULL_TURN
}

/// Raw projection of `pos` by `speed` along `angle`, without any bounds handling.
#[must_use]
pub fn project(pos: Position, speed: f64, angle: f64) -> Position {
    Position::new(pos.x + angle.cos() * speed, pos.y + angle.sin() * speed)
}

/// Bearing from `pos` toward `target` computed from the arc-cosine of the x offset.
///
/// `acos` only covers `[0, π]`, so the sign is flipped for targets that lie below
/// the current `y`. Returns `None` when both points coincide.
#[must_use]
pub fn bearing(pos: Position, target: Position) -> Option<f64> {
    let dist = pos.distance(target);
    if dist <= f64::EPSILON {
        return None;
    }
    let angle = ((target.x - pos.x) / dist).clamp(-1.0, 1.0).acos();
    Some(if target.y < pos.y { -angle } else { angle })
}

/// Whether a point is blocked by any disc of `obstacles`, widened by `margin`.
#[must_use]
pub fn is_blocked(pos: Position, obstacles: &[Disc], margin: f64) -> bool {
    obstacles.iter().any(|disc| disc.contains(pos, margin))
}

/// Move `pos` by `speed` along `angle`, clamped to `bounds`.
///
/// A step that would land on an obstacle (widened by `margin`) is retried with half the speed, at most
/// [`MAX_MOVE_RETRIES`] times; past that the position is returned unchanged.
#[must_use]
pub fn move_within(
    pos: Position,
    speed: f64,
    angle: f64,
    bounds: &Bounds,
    obstacles: &[Disc],
    margin: f64,
) -> Position {
    let mut speed = speed;
    for _ in 0..=MAX_MOVE_RETRIES {
        let next = bounds.clamp(project(pos, speed, angle));
        if !is_blocked(next, obstacles, margin) {
            return next;
        }
        speed *= 0.5;
    }
    pos
}

/// Outcome of a single approach step toward a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Approach {
    /// The target is closer than one step.
    Arrived,
    /// The target is farther; travel along this bearing.
    Heading(f64),
}

/// Decide whether `pos` reaches `target` this step, and along which bearing otherwise.
#[must_use]
pub fn approach(target: Position, pos: Position, speed: f64) -> Approach {
    if pos.distance(target) < speed {
        return Approach::Arrived;
    }
    match bearing(pos, target) {
        Some(angle) => Approach::Heading(angle),
        None => Approach::Arrived,
    }
}

/// Step toward `target`, returning the new position and heading.
///
/// On arrival the agent snaps onto the target and receives a random heading so it
/// resumes wandering from there.
pub fn go_to(
    target: Position,
    pos: Position,
    speed: f64,
    bounds: &Bounds,
    obstacles: &[Disc],
    rng: &mut dyn RngCore,
) -> (Position, f64) {
    match approach(target, pos, speed) {
        Approach::Arrived => (target, random_heading(rng)),
        Approach::Heading(angle) => (
            move_within(pos, speed, angle, bounds, obstacles, 0.0),
            angle,
        ),
    }
}
