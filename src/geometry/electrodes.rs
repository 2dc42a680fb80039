// src/geometry/electrodes.rs

use super::morphology::{CompartmentClass, CorticalMorphology};
use super::{distances_over_population, DistanceMatrix, Point3};
use crate::error::Result;

use serde::{Deserialize, Serialize};

/// Differential recording pair; the LFP is contact 1 minus contact 2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BipolarElectrode {
    pub contact_1: Point3,
    pub contact_2: Point3,
}

/// Electrode positions for one run. Never mutated after placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectrodeLayout {
    pub recording: BipolarElectrode,
    pub stimulating: Point3,
}

/// Every electrode/compartment distance the run needs.
#[derive(Debug, Clone)]
pub struct ElectrodeDistances {
    /// STN cells to recording contact 1 (point cells, one value per cell).
    pub recording_1: Vec<f64>,
    /// STN cells to recording contact 2.
    pub recording_2: Vec<f64>,
    pub collateral: DistanceMatrix,
    pub axon_nodes: DistanceMatrix,
    pub ais: DistanceMatrix,
    pub soma: DistanceMatrix,
}

impl ElectrodeDistances {
    pub fn compute(
        layout: &ElectrodeLayout,
        stn_positions: &[Point3],
        cortical_positions: &[Point3],
        morphology: &CorticalMorphology,
    ) -> Result<Self> {
        morphology.validate()?;

        let cells = cortical_positions
            .iter()
            .map(|&reference| morphology.compartments(reference))
            .collect::<Result<Vec<_>>>()?;

        let matrix_for = |class: CompartmentClass| {
            let positions: Vec<Vec<Point3>> =
                cells.iter().map(|cell| cell.class(class).to_vec()).collect();
            DistanceMatrix::from_positions(layout.stimulating, &positions)
        };

        Ok(Self {
            recording_1: distances_over_population(layout.recording.contact_1, stn_positions, None),
            recording_2: distances_over_population(layout.recording.contact_2, stn_positions, None),
            collateral: matrix_for(CompartmentClass::Collateral),
            axon_nodes: matrix_for(CompartmentClass::AxonNode),
            ais: matrix_for(CompartmentClass::Ais),
            soma: matrix_for(CompartmentClass::Soma),
        })
    }

    pub fn for_class(&self, class: CompartmentClass) -> &DistanceMatrix {
        match class {
            CompartmentClass::Collateral => &self.collateral,
            CompartmentClass::AxonNode => &self.axon_nodes,
            CompartmentClass::Ais => &self.ais,
            CompartmentClass::Soma => &self.soma,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ElectrodeLayout {
        ElectrodeLayout {
            recording: BipolarElectrode {
                contact_1: Point3::new(0.0, -1500.0, 250.0),
                contact_2: Point3::new(0.0, 1500.0, 250.0),
            },
            stimulating: Point3::new(0.0, 0.0, 250.0),
        }
    }

    #[test]
    fn test_distance_set_shapes() {
        let morphology = CorticalMorphology::default();
        let stn = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(100.0, 0.0, 0.0)];
        let cortex = vec![
            Point3::new(10.0, 20.0, 0.0),
            Point3::new(-30.0, 40.0, 0.0),
            Point3::new(0.0, -60.0, 0.0),
        ];

        let distances = ElectrodeDistances::compute(&layout(), &stn, &cortex, &morphology).unwrap();

        assert_eq!(distances.recording_1.len(), 2);
        assert_eq!(distances.collateral.cells(), 3);
        assert_eq!(distances.collateral.compartments(), morphology.collateral_nseg);
        assert_eq!(distances.axon_nodes.compartments(), morphology.num_axon_nodes);
        assert_eq!(distances.ais.compartments(), morphology.ais_nseg);
        assert_eq!(distances.soma.compartments(), morphology.soma_nseg);
    }

    #[test]
    fn test_symmetric_recording_contacts() {
        let stn = vec![Point3::new(0.0, 0.0, 0.0)];
        let distances =
            ElectrodeDistances::compute(&layout(), &stn, &[], &CorticalMorphology::default())
                .unwrap();
        assert_eq!(distances.recording_1, distances.recording_2);
        assert_eq!(distances.collateral.cells(), 0);
    }
}
