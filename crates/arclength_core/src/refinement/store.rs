//! Append-only storage of solved points, one sequence per refinement level.

use serde::{Deserialize, Serialize};

use crate::continuation::SolutionPoint;

/// Logical reference to a stored point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PointRef {
    pub level: usize,
    pub index: usize,
}

/// Solved points per level.
///
/// Every level starts with the reference point `(0, 0)`; afterwards points are
/// only ever appended. `path` records every stored point in the order it was
/// produced, across levels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelSolutionStore {
    dimension: usize,
    levels: Vec<Vec<SolutionPoint>>,
    path: Vec<PointRef>,
}

impl LevelSolutionStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            levels: Vec::new(),
            path: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Creates every missing level up to and including `level`.
    pub fn ensure_level(&mut self, level: usize) {
        while self.levels.len() <= level {
            let created = self.levels.len();
            self.levels.push(vec![SolutionPoint::reference(self.dimension)]);
            self.path.push(PointRef {
                level: created,
                index: 0,
            });
        }
    }

    /// Appends a point to `level`, creating the level if needed, and returns its index.
    pub fn append(&mut self, level: usize, point: SolutionPoint) -> usize {
        assert_eq!(
            point.dimension(),
            self.dimension,
            "point dimension does not match the store"
        );
        self.ensure_level(level);
        let points = &mut self.levels[level];
        points.push(point);
        let index = points.len() - 1;
        self.path.push(PointRef { level, index });
        index
    }

    /// Point `index` of `level`.
    ///
    /// # Panics
    ///
    /// Panics when the point has not been stored.
    pub fn at(&self, level: usize, index: usize) -> &SolutionPoint {
        match self.get(level, index) {
            Some(point) => point,
            None => panic!(
                "point {index} of level {level} is not stored (level holds {} points)",
                self.size(level)
            ),
        }
    }

    pub fn get(&self, level: usize, index: usize) -> Option<&SolutionPoint> {
        self.levels.get(level).and_then(|points| points.get(index))
    }

    pub fn resolve(&self, point: PointRef) -> Option<&SolutionPoint> {
        self.get(point.level, point.index)
    }

    /// Number of points in `level`; zero for levels that were never created.
    pub fn size(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[SolutionPoint] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every stored point in the order it was produced.
    pub fn path(&self) -> &[PointRef] {
        &self.path
    }
}

/// Posterior errors per level, one slot per interval of that level.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorTable {
    levels: Vec<Vec<Option<f64>>>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_level(&mut self, level: usize) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
    }

    pub fn set(&mut self, level: usize, interval: usize, error: f64) {
        self.ensure_level(level);
        let errors = &mut self.levels[level];
        if errors.len() <= interval {
            errors.resize(interval + 1, None);
        }
        errors[interval] = Some(error);
    }

    pub fn get(&self, level: usize, interval: usize) -> Option<f64> {
        self.levels
            .get(level)
            .and_then(|errors| errors.get(interval).copied().flatten())
    }

    pub fn level(&self, level: usize) -> &[Option<f64>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}
