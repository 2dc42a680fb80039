// src/geometry/morphology.rs
//
// Procedural compartment geometry for the cortical cell: a collateral running
// along z through the cell plane, and an axon running along y made of nodes
// of Ranvier (most distal first), followed by the axon initial segment and
// the soma.

use super::{Axis, Point3};
use crate::error::{NeurostimError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompartmentClass {
    Soma,
    Collateral,
    AxonNode,
    Ais,
}

impl fmt::Display for CompartmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompartmentClass::Soma => "soma",
            CompartmentClass::Collateral => "collateral",
            CompartmentClass::AxonNode => "axon node",
            CompartmentClass::Ais => "ais",
        };
        f.write_str(name)
    }
}

/// How a block of `n` segments is reduced to representative positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPlacement {
    /// Boundary segments sit on the block ends (0 and 1), interior segments
    /// on their bin centres.
    #[default]
    Pinned,
    /// Every segment sits on its bin centre.
    Centered,
}

/// Fractional positions in [0, 1] of the `n_segments` segments of a block.
///
/// The unit interval is split into `n_segments` equal bins. With pinned
/// placement the first value is 0, the last is 1, and interior values are
/// bin centres `(2i + 1) / 2n`. A single segment is its own centre, 0.5.
pub fn segment_centers(n_segments: usize, placement: SegmentPlacement) -> Result<Vec<f64>> {
    if n_segments < 1 {
        return Err(NeurostimError::InvalidSegmentCount {
            block: "segment block",
            count: n_segments,
        });
    }

    let bins = n_segments as f64;
    let mut centers: Vec<f64> = (0..n_segments)
        .map(|i| (2 * i + 1) as f64 / (2.0 * bins))
        .collect();

    if placement == SegmentPlacement::Pinned && n_segments >= 2 {
        centers[0] = 0.0;
        centers[n_segments - 1] = 1.0;
    }

    Ok(centers)
}

/// Scalar morphology of a cortical cell (lengths in µm).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CorticalMorphology {
    pub collateral_length: f64,
    pub collateral_nseg: usize,
    pub node_length: f64,
    pub myelin_length: f64,
    /// Myelin between the most proximal node and the AIS.
    pub initial_myelin_length: f64,
    pub num_axon_nodes: usize,
    pub ais_length: f64,
    pub ais_nseg: usize,
    pub soma_length: f64,
    pub soma_nseg: usize,
    pub segment_placement: SegmentPlacement,
}

impl Default for CorticalMorphology {
    fn default() -> Self {
        Self {
            collateral_length: 500.0,
            collateral_nseg: 11,
            node_length: 1.0,
            myelin_length: 100.0,
            initial_myelin_length: 80.0,
            num_axon_nodes: 10,
            ais_length: 20.0,
            ais_nseg: 5,
            soma_length: 20.0,
            soma_nseg: 1,
            segment_placement: SegmentPlacement::Pinned,
        }
    }
}

/// Compartment centroids of one cell, grouped by class.
#[derive(Debug, Clone, PartialEq)]
pub struct CellCompartments {
    pub collateral: Vec<Point3>,
    pub axon_nodes: Vec<Point3>,
    pub ais: Vec<Point3>,
    pub soma: Vec<Point3>,
}

impl CellCompartments {
    pub fn class(&self, class: CompartmentClass) -> &[Point3] {
        match class {
            CompartmentClass::Collateral => &self.collateral,
            CompartmentClass::AxonNode => &self.axon_nodes,
            CompartmentClass::Ais => &self.ais,
            CompartmentClass::Soma => &self.soma,
        }
    }
}

impl CorticalMorphology {
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("collateral", self.collateral_nseg),
            ("axon nodes", self.num_axon_nodes),
            ("ais", self.ais_nseg),
            ("soma", self.soma_nseg),
        ];
        for (block, count) in counts {
            if count < 1 {
                return Err(NeurostimError::InvalidSegmentCount { block, count });
            }
        }

        let lengths = [
            ("collateral_length", self.collateral_length),
            ("node_length", self.node_length),
            ("myelin_length", self.myelin_length),
            ("initial_myelin_length", self.initial_myelin_length),
            ("ais_length", self.ais_length),
            ("soma_length", self.soma_length),
        ];
        for (name, length) in lengths {
            if !(length.is_finite() && length >= 0.0) {
                return Err(NeurostimError::InvalidConfig(format!(
                    "morphology {} must be finite and non-negative, got {}",
                    name, length
                )));
            }
        }
        Ok(())
    }

    /// Offset of each node along the axon axis, index 0 being the most
    /// distal node.
    pub fn axon_node_offsets(&self) -> Vec<f64> {
        let n = self.num_axon_nodes;
        let pitch = self.node_length + self.myelin_length;
        (0..n)
            .map(|i| (n - 1 - i) as f64 * pitch + self.node_length * 0.5)
            .collect()
    }

    /// Axon length up to the start of the AIS block.
    pub fn axon_length(&self) -> f64 {
        let distal = self.axon_node_offsets().first().copied().unwrap_or(0.0);
        distal + self.node_length + self.initial_myelin_length
    }

    pub fn ais_offsets(&self) -> Result<Vec<f64>> {
        self.block_offsets("ais", self.ais_nseg, self.ais_length, self.axon_length())
    }

    pub fn soma_offsets(&self) -> Result<Vec<f64>> {
        let start = self.axon_length() + self.ais_length;
        self.block_offsets("soma", self.soma_nseg, self.soma_length, start)
    }

    /// Collateral offsets along z, centred on the cell plane.
    pub fn collateral_offsets(&self) -> Result<Vec<f64>> {
        let half = self.collateral_length / 2.0;
        self.block_offsets("collateral", self.collateral_nseg, self.collateral_length, -half)
    }

    fn block_offsets(
        &self,
        block: &'static str,
        nseg: usize,
        length: f64,
        start: f64,
    ) -> Result<Vec<f64>> {
        let centers = segment_centers(nseg, self.segment_placement)
            .map_err(|_| NeurostimError::InvalidSegmentCount { block, count: nseg })?;
        Ok(centers.into_iter().map(|c| start + length * c).collect())
    }

    /// All compartment centroids of a cell whose reference position is
    /// `reference`.
    pub fn compartments(&self, reference: Point3) -> Result<CellCompartments> {
        let along = |axis: Axis, offsets: Vec<f64>| -> Vec<Point3> {
            offsets
                .into_iter()
                .map(|offset| reference.with_offset(axis, offset))
                .collect()
        };

        Ok(CellCompartments {
            collateral: along(Axis::Z, self.collateral_offsets()?),
            axon_nodes: along(Axis::Y, self.axon_node_offsets()),
            ais: along(Axis::Y, self.ais_offsets()?),
            soma: along(Axis::Y, self.soma_offsets()?),
        })
    }
}
