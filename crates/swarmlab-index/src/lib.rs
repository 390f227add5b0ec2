//! Spatial indexing abstractions for agent neighborhood queries.

use std::collections::HashMap;
use std::hash::Hash;

use ordered_float::OrderedFloat;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// A point on the plane as `(x, y)`.
pub type Point = (f64, f64);

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex<K> {
    /// Rebuild internal structures from keyed positions.
    fn rebuild(&mut self, entries: &[(K, Point)]);

    /// Track `key` at `point`, replacing any previous location.
    fn insert(&mut self, key: K, point: Point);

    /// Stop tracking `key`. Returns whether it was present.
    fn remove(&mut self, key: K) -> bool;

    /// Visit entries within `radius` of `point` (inclusive), passing the squared distance.
    fn neighbors_within(
        &self,
        point: Point,
        radius: f64,
        visitor: &mut dyn FnMut(K, OrderedFloat<f64>),
    );

    /// Number of tracked entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closest entry within `radius`, with its distance. Ties keep the first visited.
    fn nearest_within(&self, point: Point, radius: f64) -> Option<(K, f64)> {
        let mut best: Option<(K, OrderedFloat<f64>)> = None;
        self.neighbors_within(point, radius, &mut |key, dist_sq| match best {
            Some((_, current)) if current <= dist_sq => {}
            _ => best = Some((key, dist_sq)),
        });
        best.map(|(key, dist_sq)| (key, dist_sq.0.sqrt()))
    }
}

type Cell = (i64, i64);

/// Uniform grid bucketing entries by square cells of `cell_size`.
///
/// Cells are scanned row by row and entries within a cell in insertion order,
/// so visits are deterministic for a given sequence of updates.
#[derive(Debug, Clone)]
pub struct UniformGridIndex<K: Copy + Eq + Hash> {
    /// Edge length of each grid cell used for bucketing agents.
    pub cell_size: f64,
    cells: HashMap<Cell, Vec<(K, Point)>>,
    locations: HashMap<K, Cell>,
}

impl<K: Copy + Eq + Hash> UniformGridIndex<K> {
    /// Create a new uniform grid with the provided cell size.
    pub fn new(cell_size: f64) -> Result<Self, IndexError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
            locations: HashMap::new(),
        })
    }

    fn cell_of(&self, (x, y): Point) -> Cell {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// Current location of `key`, if tracked.
    #[must_use]
    pub fn position(&self, key: K) -> Option<Point> {
        let cell = self.locations.get(&key)?;
        self.cells
            .get(cell)?
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, point)| *point)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.locations.clear();
    }

    fn visit_cell(
        &self,
        cell: &Cell,
        point: Point,
        radius_sq: f64,
        visitor: &mut dyn FnMut(K, OrderedFloat<f64>),
    ) {
        let Some(bucket) = self.cells.get(cell) else {
            return;
        };
        for (key, (x, y)) in bucket {
            let dx = x - point.0;
            let dy = y - point.1;
            let dist_sq = dx * dx + dy * dy;
            if dist_sq <= radius_sq {
                visitor(*key, OrderedFloat(dist_sq));
            }
        }
    }
}

impl<K: Copy + Eq + Hash> Default for UniformGridIndex<K> {
    fn default() -> Self {
        Self {
            cell_size: 50.0,
            cells: HashMap::new(),
            locations: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> NeighborhoodIndex<K> for UniformGridIndex<K> {
    fn rebuild(&mut self, entries: &[(K, Point)]) {
        self.clear();
        for (key, point) in entries {
            self.insert(*key, *point);
        }
    }

    fn insert(&mut self, key: K, point: Point) {
        self.remove(key);
        let cell = self.cell_of(point);
        self.cells.entry(cell).or_default().push((key, point));
        self.locations.insert(key, cell);
    }

    fn remove(&mut self, key: K) -> bool {
        let Some(cell) = self.locations.remove(&key) else {
            return false;
        };
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.retain(|(k, _)| *k != key);
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
        true
    }

    fn neighbors_within(
        &self,
        point: Point,
        radius: f64,
        visitor: &mut dyn FnMut(K, OrderedFloat<f64>),
    ) {
        if radius < 0.0 || radius.is_nan() || self.cells.is_empty() {
            return;
        }
        let radius_sq = radius * radius;
        let (min_x, min_y) = self.cell_of((point.0 - radius, point.1 - radius));
        let (max_x, max_y) = self.cell_of((point.0 + radius, point.1 + radius));
        let span = (max_x.saturating_sub(min_x) as u128 + 1)
            * (max_y.saturating_sub(min_y) as u128 + 1);

        if !radius.is_finite() || span > self.cells.len() as u128 {
            let mut occupied: Vec<&Cell> = self.cells.keys().collect();
            occupied.sort_unstable_by_key(|(cx, cy)| (*cy, *cx));
            for cell in occupied {
                self.visit_cell(cell, point, radius_sq, visitor);
            }
            return;
        }
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                self.visit_cell(&(cx, cy), point, radius_sq, visitor);
            }
        }
    }

    fn len(&self) -> usize {
        self.locations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(index: &UniformGridIndex<u32>, point: Point, radius: f64) -> Vec<u32> {
        let mut found = Vec::new();
        index.neighbors_within(point, radius, &mut |key, _| found.push(key));
        found.sort_unstable();
        found
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        assert!(matches!(
            UniformGridIndex::<u32>::new(0.0),
            Err(IndexError::InvalidConfig(_))
        ));
        assert!(UniformGridIndex::<u32>::new(-3.0).is_err());
    }

    #[test]
    fn finds_neighbors_across_cells() {
        let mut index = UniformGridIndex::new(10.0).expect("index");
        index.rebuild(&[(1, (5.0, 5.0)), (2, (14.0, 5.0)), (3, (40.0, 40.0))]);
        assert_eq!(collect(&index, (9.0, 5.0), 5.0), vec![1, 2]);
        assert_eq!(collect(&index, (9.0, 5.0), 3.0), Vec::<u32>::new());
        assert_eq!(collect(&index, (0.0, 0.0), f64::INFINITY), vec![1, 2, 3]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn radius_is_inclusive() {
        let mut index = UniformGridIndex::new(4.0).expect("index");
        index.insert(7, (3.0, 4.0));
        assert_eq!(collect(&index, (0.0, 0.0), 5.0), vec![7]);
    }

    #[test]
    fn insert_relocates_existing_key() {
        let mut index = UniformGridIndex::new(10.0).expect("index");
        index.insert(1, (1.0, 1.0));
        index.insert(1, (95.0, 95.0));
        assert_eq!(index.len(), 1);
        assert_eq!(index.position(1), Some((95.0, 95.0)));
        assert!(collect(&index, (1.0, 1.0), 5.0).is_empty());
        assert_eq!(collect(&index, (90.0, 90.0), 10.0), vec![1]);
    }

    #[test]
    fn remove_forgets_key() {
        let mut index = UniformGridIndex::new(10.0).expect("index");
        index.insert(1, (1.0, 1.0));
        assert!(index.remove(1));
        assert!(!index.remove(1));
        assert!(index.is_empty());
        assert!(index.nearest_within((1.0, 1.0), 100.0).is_none());
    }

    #[test]
    fn nearest_prefers_closest_then_first_visited() {
        let mut index = UniformGridIndex::new(10.0).expect("index");
        index.rebuild(&[(1, (0.0, 3.0)), (2, (4.0, 0.0)), (3, (0.0, -3.0))]);
        let (key, dist) = index.nearest_within((0.0, 0.0), 10.0).expect("nearest");
        assert!((dist - 3.0).abs() < 1e-12);
        // Equal distances: the row with the lowest y is scanned first.
        assert_eq!(key, 3);
        assert!(index.nearest_within((0.0, 0.0), 2.0).is_none());
    }
}
