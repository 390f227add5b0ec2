//! Static and decaying environment features.

use serde::{Deserialize, Serialize};

use crate::geometry::Position;

/// Circular static feature (obstacle, sand bank, quicksand).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Disc {
    pub center: Position,
    pub radius: f64,
}

impl Disc {
    #[must_use]
    pub const fn new(center: Position, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Whether `pos` lies within the disc widened by `margin`.
    #[must_use]
    pub fn contains(&self, pos: Position, margin: f64) -> bool {
        self.center.distance(pos) <= self.radius + margin
    }
}

/// Scent-like marker whose radius grows linearly while its countdown runs out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DecayingMarker {
    pub position: Position,
    pub radius: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    pub duration: u32,
    pub countdown: u32,
}

impl DecayingMarker {
    /// Fresh marker at `position` living for `duration` ticks.
    #[must_use]
    pub fn new(position: Position, min_radius: f64, max_radius: f64, duration: u32) -> Self {
        Self {
            position,
            radius: min_radius,
            min_radius,
            max_radius,
            duration,
            countdown: duration,
        }
    }

    /// Fraction of the lifetime already elapsed, in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.duration == 0 {
            return 1.0;
        }
        f64::from(self.duration - self.countdown.min(self.duration)) / f64::from(self.duration)
    }

    /// Advance the marker by one tick.
    pub fn age(&mut self) {
        self.countdown = self.countdown.saturating_sub(1);
        self.radius = self.min_radius + (self.max_radius - self.min_radius) * self.progress();
    }

    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.countdown == 0
    }
}

/// Age every marker by one tick and drop the expired ones, returning how many expired.
pub fn age_markers(markers: &mut Vec<DecayingMarker>) -> usize {
    let before = markers.len();
    for marker in markers.iter_mut() {
        marker.age();
    }
    markers.retain(|marker| !marker.is_expired());
    before - markers.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disc_margin_extends_boundary() {
        let disc = Disc::new(Position::new(0.0, 0.0), 10.0);
        assert!(disc.contains(Position::new(10.0, 0.0), 0.0));
        assert!(!disc.contains(Position::new(10.5, 0.0), 0.0));
        assert!(disc.contains(Position::new(10.5, 0.0), 1.0));
    }

    #[test]
    fn marker_grows_then_expires() {
        let mut marker = DecayingMarker::new(Position::new(5.0, 5.0), 1.0, 81.0, 4);
        assert_eq!(marker.radius, 1.0);
        marker.age();
        assert_eq!(marker.countdown, 3);
        assert!((marker.radius - 21.0).abs() < 1e-9);
        marker.age();
        marker.age();
        assert!(!marker.is_expired());
        marker.age();
        assert!(marker.is_expired());
        assert!((marker.radius - 81.0).abs() < 1e-9);
    }

    #[test]
    fn age_markers_removes_only_expired() {
        let mut markers = vec![
            DecayingMarker::new(Position::new(0.0, 0.0), 1.0, 2.0, 1),
            DecayingMarker::new(Position::new(1.0, 1.0), 1.0, 2.0, 3),
        ];
        assert_eq!(age_markers(&mut markers), 1);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].countdown, 2);
    }
}
