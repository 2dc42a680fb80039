// src/field/mod.rs
//
// Homogeneous, isotropic point-source field model.
//
// Units: distances in µm, conductivity in S/m, resistivity in Ω·cm,
// transfer resistances in MΩ, synaptic currents in nA, LFP in mV.

use crate::error::{NeurostimError, Result};
use crate::geometry::morphology::CompartmentClass;
use crate::geometry::DistanceMatrix;

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// µm and Ω·cm to MΩ for the extracellular transfer resistance.
pub const TRANSFER_RESISTANCE_SCALE: f64 = 0.01;
/// µm to m for LFP distances.
pub const LFP_DISTANCE_SCALE: f64 = 1e-6;
/// nA·Ω to mV for the LFP sum.
pub const LFP_OUTPUT_SCALE: f64 = 1e-6;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Tissue {
    /// S/m
    pub conductivity: f64,
}

impl Default for Tissue {
    fn default() -> Self {
        // Brain tissue conductivity
        Self { conductivity: 0.27 }
    }
}

impl Tissue {
    /// Ω·cm (S/m -> S/cm, then inverted).
    pub fn resistivity(&self) -> f64 {
        1.0 / (self.conductivity * 1e-2)
    }
}

/// `scale · ρ / 4π · 1/d`. Callers must reject `distance == 0` first.
pub fn transfer_resistance(distance: f64, resistivity: f64, scale: f64) -> f64 {
    scale * (resistivity / (4.0 * PI)) * (1.0 / distance)
}

/// Per-compartment transfer resistances (MΩ) of one compartment class,
/// laid out like the distance matrix they come from.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResistances {
    pub class: CompartmentClass,
    compartments: usize,
    values: Vec<f64>,
}

impl TransferResistances {
    pub fn from_distances(
        class: CompartmentClass,
        distances: &DistanceMatrix,
        tissue: &Tissue,
    ) -> Result<Self> {
        let resistivity = tissue.resistivity();
        let values = distances
            .iter()
            .map(|(cell, compartment, d)| {
                if d == 0.0 {
                    Err(NeurostimError::ZeroDistance {
                        class,
                        cell,
                        compartment,
                    })
                } else {
                    Ok(transfer_resistance(d, resistivity, TRANSFER_RESISTANCE_SCALE))
                }
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(Self {
            class,
            compartments: distances.compartments(),
            values,
        })
    }

    pub fn cells(&self) -> usize {
        if self.compartments == 0 {
            0
        } else {
            self.values.len() / self.compartments
        }
    }

    /// Resistances of one cell's compartments, in compartment order.
    pub fn cell(&self, cell: usize) -> &[f64] {
        let start = cell * self.compartments;
        &self.values[start..start + self.compartments]
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

/// Per-unit current time series, all of the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentTraces {
    series: Vec<Vec<f64>>,
}

impl CurrentTraces {
    pub fn new(series: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(first) = series.first() {
            if series.iter().any(|s| s.len() != first.len()) {
                return Err(NeurostimError::Backend(
                    "current traces have mismatched sample counts".to_string(),
                ));
            }
        }
        Ok(Self { series })
    }

    pub fn units(&self) -> usize {
        self.series.len()
    }

    pub fn samples(&self) -> usize {
        self.series.first().map_or(0, Vec::len)
    }

    pub fn unit(&self, index: usize) -> &[f64] {
        &self.series[index]
    }

    /// Element-wise sum, e.g. AMPA + GABAa.
    pub fn combined(&self, other: &CurrentTraces) -> Result<CurrentTraces> {
        if self.units() != other.units() || self.samples() != other.samples() {
            return Err(NeurostimError::Backend(
                "cannot combine current traces of different shapes".to_string(),
            ));
        }
        let series = self
            .series
            .iter()
            .zip(&other.series)
            .map(|(a, b)| a.iter().zip(b).map(|(x, y)| x + y).collect())
            .collect();
        Ok(CurrentTraces { series })
    }
}

/// Point-source potential at one electrode from the local units' currents:
/// `1/(4πσ) · Σ_units I[t] / d`, one value per time sample.
pub fn lfp_contribution(
    currents: &CurrentTraces,
    distances: &[f64],
    conductivity: f64,
) -> Result<Vec<f64>> {
    if distances.len() != currents.units() {
        return Err(NeurostimError::InvalidConfig(format!(
            "{} distances for {} current traces",
            distances.len(),
            currents.units()
        )));
    }
    if let Some(unit) = distances.iter().position(|&d| d == 0.0) {
        return Err(NeurostimError::ZeroDistance {
            class: CompartmentClass::Soma,
            cell: unit,
            compartment: 0,
        });
    }

    let coefficient = 1.0 / (4.0 * PI * conductivity);
    let weights: Vec<f64> = distances
        .iter()
        .map(|d| 1.0 / (d * LFP_DISTANCE_SCALE))
        .collect();

    let lfp = (0..currents.samples())
        .map(|t| {
            let summed: f64 = weights
                .iter()
                .enumerate()
                .map(|(unit, w)| w * currents.unit(unit)[t])
                .sum();
            coefficient * summed * LFP_OUTPUT_SCALE
        })
        .collect();

    Ok(lfp)
}

/// Differential LFP between the two contacts of a bipolar electrode.
pub fn bipolar_lfp(
    currents: &CurrentTraces,
    distances_1: &[f64],
    distances_2: &[f64],
    conductivity: f64,
) -> Result<Vec<f64>> {
    let lfp_1 = lfp_contribution(currents, distances_1, conductivity)?;
    let lfp_2 = lfp_contribution(currents, distances_2, conductivity)?;
    Ok(lfp_1.iter().zip(&lfp_2).map(|(a, b)| a - b).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;

    #[test]
    fn test_resistivity_conversion() {
        let tissue = Tissue { conductivity: 0.25 };
        assert!((tissue.resistivity() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_transfer_resistance_decreases_with_distance() {
        let rho = Tissue::default().resistivity();
        let near = transfer_resistance(10.0, rho, TRANSFER_RESISTANCE_SCALE);
        let far = transfer_resistance(100.0, rho, TRANSFER_RESISTANCE_SCALE);
        assert!(near > far);
        assert!(far > 0.0 && far.is_finite());
        assert!((near / far - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_distance_is_rejected() {
        let electrode = Point3::new(0.0, 0.0, 0.0);
        let positions = vec![
            vec![Point3::new(1.0, 0.0, 0.0)],
            vec![Point3::new(0.0, 0.0, 0.0)],
        ];
        let distances = DistanceMatrix::from_positions(electrode, &positions);
        let err = TransferResistances::from_distances(
            CompartmentClass::Collateral,
            &distances,
            &Tissue::default(),
        )
        .unwrap_err();

        match err {
            NeurostimError::ZeroDistance {
                class,
                cell,
                compartment,
            } => {
                assert_eq!(class, CompartmentClass::Collateral);
                assert_eq!(cell, 1);
                assert_eq!(compartment, 0);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_transfer_resistances_follow_matrix_layout() {
        let electrode = Point3::new(0.0, 0.0, 0.0);
        let positions = vec![
            vec![Point3::new(10.0, 0.0, 0.0), Point3::new(20.0, 0.0, 0.0)],
            vec![Point3::new(40.0, 0.0, 0.0), Point3::new(80.0, 0.0, 0.0)],
        ];
        let distances = DistanceMatrix::from_positions(electrode, &positions);
        let rx = TransferResistances::from_distances(
            CompartmentClass::Ais,
            &distances,
            &Tissue::default(),
        )
        .unwrap();

        assert_eq!(rx.cells(), 2);
        let first = rx.cell(0);
        let second = rx.cell(1);
        assert!(first[0] > first[1]);
        assert!(first[1] > second[0]);
        assert!((first[0] / second[1] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_lfp_matches_point_source_formula() {
        let currents = CurrentTraces::new(vec![vec![1.0, 2.0], vec![-1.0, 4.0]]).unwrap();
        let distances = [100.0, 200.0];
        let sigma = 0.27;
        let lfp = lfp_contribution(&currents, &distances, sigma).unwrap();

        let k = 1.0 / (4.0 * PI * sigma);
        let expected_0 = k * (1.0 / 100e-6 - 1.0 / 200e-6) * 1e-6;
        let expected_1 = k * (2.0 / 100e-6 + 4.0 / 200e-6) * 1e-6;
        assert!((lfp[0] - expected_0).abs() < 1e-12);
        assert!((lfp[1] - expected_1).abs() < 1e-12);
    }

    #[test]
    fn test_bipolar_lfp_cancels_for_symmetric_contacts() {
        let currents = CurrentTraces::new(vec![vec![0.5, -0.25, 3.0]]).unwrap();
        let lfp = bipolar_lfp(&currents, &[150.0], &[150.0], 0.27).unwrap();
        assert!(lfp.iter().all(|v| v.abs() < 1e-15));
    }

    #[test]
    fn test_lfp_rejects_zero_distance() {
        let currents = CurrentTraces::new(vec![vec![1.0]]).unwrap();
        assert!(lfp_contribution(&currents, &[0.0], 0.27).is_err());
    }

    #[test]
    fn test_combined_currents() {
        let ampa = CurrentTraces::new(vec![vec![1.0, 2.0]]).unwrap();
        let gaba = CurrentTraces::new(vec![vec![0.5, -2.0]]).unwrap();
        let total = ampa.combined(&gaba).unwrap();
        assert_eq!(total.unit(0), &[1.5, 0.0]);

        let mismatched = CurrentTraces::new(vec![vec![1.0]]).unwrap();
        assert!(ampa.combined(&mismatched).is_err());
        assert!(CurrentTraces::new(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
