// src/geometry/mod.rs

pub mod electrodes;
pub mod morphology;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A position in tissue coordinates (µm).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn with_offset(&self, axis: Axis, offset: f64) -> Self {
        let mut moved = *self;
        match axis {
            Axis::X => moved.x += offset,
            Axis::Y => moved.y += offset,
            Axis::Z => moved.z += offset,
        }
        moved
    }
}

impl From<[f64; 3]> for Point3 {
    fn from(xyz: [f64; 3]) -> Self {
        Self::new(xyz[0], xyz[1], xyz[2])
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Euclidean distance between an electrode and a compartment.
///
/// `axis_mask` restricts the displacement to a subset of axes, e.g.
/// `Some(&[Axis::X, Axis::Y])` ignores depth and `Some(&[Axis::Z])` measures
/// depth only. Axes are taken in x, y, z order regardless of the order in the
/// mask. Colocated points give 0.0; rejecting that is the field coupler's job.
pub fn distance(electrode: Point3, compartment: Point3, axis_mask: Option<&[Axis]>) -> f64 {
    let d = electrode - compartment;
    Axis::ALL
        .iter()
        .filter(|axis| axis_mask.map_or(true, |mask| mask.contains(axis)))
        .map(|&axis| d.coordinate(axis).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Distances from one electrode to every compartment, in input order.
pub fn distances_over_population(
    electrode: Point3,
    compartments: &[Point3],
    axis_mask: Option<&[Axis]>,
) -> Vec<f64> {
    compartments
        .par_iter()
        .map(|&compartment| distance(electrode, compartment, axis_mask))
        .collect()
}

/// Row-major (cell, compartment) -> distance (µm) table for one electrode and
/// one compartment class.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    cells: usize,
    compartments: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Builds the matrix from the compartment positions of each cell. Every
    /// cell must expose the same number of compartments.
    pub fn from_positions(electrode: Point3, positions: &[Vec<Point3>]) -> Self {
        let compartments = positions.first().map_or(0, Vec::len);
        debug_assert!(positions.iter().all(|row| row.len() == compartments));

        let values = positions
            .par_iter()
            .flat_map_iter(|row| row.iter().map(move |&p| distance(electrode, p, None)))
            .collect();

        Self {
            cells: positions.len(),
            compartments,
            values,
        }
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn compartments(&self) -> usize {
        self.compartments
    }

    pub fn get(&self, cell: usize, compartment: usize) -> Option<f64> {
        if cell >= self.cells || compartment >= self.compartments {
            return None;
        }
        self.values.get(cell * self.compartments + compartment).copied()
    }

    pub fn row(&self, cell: usize) -> &[f64] {
        let start = cell * self.compartments;
        &self.values[start..start + self.compartments]
    }

    /// Iterates `(cell, compartment, distance)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let width = self.compartments.max(1);
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &d)| (i / width, i % width, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_distance_uses_only_selected_axes() {
        let origin = Point3::new(0.0, 0.0, 0.0);
        let target = Point3::new(3.0, 4.0, 5.0);

        assert_eq!(distance(origin, target, Some(&[Axis::Z])), 5.0);
        assert_eq!(distance(origin, target, Some(&[Axis::X, Axis::Y])), 5.0);
        assert!((distance(origin, target, None) - 50f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_mask_order_does_not_matter() {
        let a = Point3::new(1.0, -2.0, 7.0);
        let b = Point3::new(4.0, 2.0, -1.0);
        assert_eq!(
            distance(a, b, Some(&[Axis::Z, Axis::X])),
            distance(a, b, Some(&[Axis::X, Axis::Z]))
        );
    }

    #[test]
    fn test_colocated_points_have_zero_distance() {
        let e = Point3::new(12.5, -3.0, 250.0);
        assert_eq!(distance(e, e, None), 0.0);
    }

    #[test]
    fn test_population_distances_keep_input_order() {
        let electrode = Point3::new(0.0, 0.0, 0.0);
        let cells: Vec<Point3> = (1..=50).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let distances = distances_over_population(electrode, &cells, None);

        assert_eq!(distances.len(), cells.len());
        for (i, d) in distances.iter().enumerate() {
            assert_eq!(*d, (i + 1) as f64);
        }
    }

    #[test]
    fn test_distance_matrix_indexing() {
        let electrode = Point3::new(0.0, 0.0, 0.0);
        let positions = vec![
            vec![Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)],
            vec![Point3::new(0.0, 3.0, 0.0), Point3::new(0.0, 0.0, 4.0)],
        ];
        let matrix = DistanceMatrix::from_positions(electrode, &positions);

        assert_eq!(matrix.cells(), 2);
        assert_eq!(matrix.compartments(), 2);
        assert_eq!(matrix.get(1, 1), Some(4.0));
        assert_eq!(matrix.row(0), &[1.0, 2.0]);
        assert_eq!(matrix.get(2, 0), None);

        let triples: Vec<_> = matrix.iter().collect();
        assert_eq!(triples[2], (1, 0, 3.0));
    }
}
