// src/stimulation/entrainment.rs

use super::pulse_train::{PulseSegment, PulseTrainParams};
use crate::error::{NeurostimError, Result};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Stimulation amplitude (mA) to number of entrained secondary units.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EntrainmentTable {
    pub amplitudes: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Default for EntrainmentTable {
    fn default() -> Self {
        Self {
            amplitudes: vec![
                0.0, 0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0, 2.25, 2.5, 3.0, 4.0, 5.0,
            ],
            counts: vec![
                0.0, 0.0, 0.0, 1.0, 4.0, 8.0, 19.0, 30.0, 43.0, 59.0, 82.0, 100.0, 100.0, 100.0,
            ],
        }
    }
}

impl EntrainmentTable {
    pub fn new(amplitudes: Vec<f64>, counts: Vec<f64>) -> Result<Self> {
        let table = Self { amplitudes, counts };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        if self.amplitudes.is_empty() {
            return Err(NeurostimError::InvalidConfig(
                "entrainment table needs at least one control point".to_string(),
            ));
        }
        if self.amplitudes.len() != self.counts.len() {
            return Err(NeurostimError::InvalidConfig(format!(
                "entrainment table has {} amplitudes but {} counts",
                self.amplitudes.len(),
                self.counts.len()
            )));
        }
        if self.amplitudes.windows(2).any(|w| w[1] <= w[0]) {
            return Err(NeurostimError::InvalidConfig(
                "entrainment amplitudes must be strictly increasing".to_string(),
            ));
        }
        if self.counts.iter().any(|&c| !(c >= 0.0)) {
            return Err(NeurostimError::InvalidConfig(
                "entrainment counts must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Piecewise-linear interpolation, held constant past either end.
    pub fn interpolate(&self, amplitude: f64) -> f64 {
        let n = self.amplitudes.len();
        if n == 0 {
            return 0.0;
        }
        if amplitude <= self.amplitudes[0] {
            return self.counts[0];
        }
        if amplitude >= self.amplitudes[n - 1] {
            return self.counts[n - 1];
        }
        let upper = self.amplitudes.partition_point(|&a| a <= amplitude);
        let (a0, a1) = (self.amplitudes[upper - 1], self.amplitudes[upper]);
        let (c0, c1) = (self.counts[upper - 1], self.counts[upper]);
        c0 + (c1 - c0) * (amplitude - a0) / (a1 - a0)
    }

    /// Number of units to entrain, truncated toward zero.
    pub fn count(&self, amplitude: f64) -> usize {
        self.interpolate(amplitude) as usize
    }
}

/// Fixed order in which secondary units are recruited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulationOrder {
    order: Vec<usize>,
}

impl StimulationOrder {
    /// Seeded permutation of `0..population`; every worker given the same
    /// seed gets the same order.
    pub fn seeded(population: usize, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..population).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);
        Self { order }
    }

    pub fn from_order(order: Vec<usize>) -> Self {
        Self { order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The first `count` units to recruit, capped at the population.
    pub fn first(&self, count: usize) -> &[usize] {
        &self.order[..count.min(self.order.len())]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }
}

/// Drive for the entrained units: `level` wherever the segment is inside a
/// pulse, zero elsewhere. Pulses are found by their amplitude, so anodic and
/// cathodic trains drive the same samples.
pub fn entrainment_segment(segment: &PulseSegment, params: &PulseTrainParams, level: f64) -> Vec<f64> {
    if params.amplitude == params.offset {
        return vec![0.0; segment.len()];
    }
    segment
        .signal
        .iter()
        .map(|&value| if value == params.amplitude { level } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tabulated_points_are_exact() {
        let table = EntrainmentTable::default();
        for (a, c) in table.amplitudes.iter().zip(&table.counts) {
            assert_eq!(table.interpolate(*a), *c);
        }
        assert_eq!(table.count(1.5), 19);
    }

    #[test]
    fn test_interpolates_between_points() {
        let table = EntrainmentTable::default();
        // halfway between 1.5 -> 19 and 1.75 -> 30
        assert!((table.interpolate(1.625) - 24.5).abs() < 1e-12);
        assert_eq!(table.count(1.625), 24);
        // 2.75 sits between 2.5 -> 82 and 3.0 -> 100
        assert_eq!(table.count(2.75), 91);
    }

    #[test]
    fn test_clamps_outside_the_table() {
        let table = EntrainmentTable::default();
        assert_eq!(table.count(10.0), 100);
        assert_eq!(table.count(-1.0), 0);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(EntrainmentTable::new(vec![], vec![]).is_err());
        assert!(EntrainmentTable::new(vec![0.0, 1.0], vec![0.0]).is_err());
        assert!(EntrainmentTable::new(vec![1.0, 0.0], vec![0.0, 1.0]).is_err());
        assert!(EntrainmentTable::new(vec![0.0, 1.0], vec![0.0, 10.0]).is_ok());
    }

    #[test]
    fn test_seeded_order_is_a_stable_permutation() {
        let a = StimulationOrder::seeded(50, 7);
        let b = StimulationOrder::seeded(50, 7);
        assert_eq!(a, b);

        let mut sorted = a.as_slice().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());

        assert_eq!(a.first(5).len(), 5);
        assert_eq!(a.first(500).len(), 50);
    }

    fn pulses(amplitude: f64) -> PulseTrainParams {
        PulseTrainParams {
            amplitude,
            frequency: 130.0,
            pulse_width: 0.02,
            offset: 0.0,
        }
    }

    fn segment(signal: Vec<f64>) -> PulseSegment {
        let times = (0..signal.len()).map(|i| i as f64 * 0.01).collect();
        PulseSegment {
            signal,
            times,
            next_pulse_time: 1.0,
            last_pulse_time: 0.0,
        }
    }

    #[test]
    fn test_entrainment_follows_the_pulses_of_either_polarity() {
        let cathodic = segment(vec![-1.5, -1.5, 0.0, 0.0]);
        let driven = entrainment_segment(&cathodic, &pulses(-1.5), 100.0);
        assert_eq!(driven, vec![100.0, 100.0, 0.0, 0.0]);

        let anodic = segment(vec![1.5, 1.5, 0.0, 0.0]);
        let driven = entrainment_segment(&anodic, &pulses(1.5), 100.0);
        assert_eq!(driven, vec![100.0, 100.0, 0.0, 0.0]);
    }

    #[test]
    fn test_zero_amplitude_drives_nothing() {
        let silent = segment(vec![0.0; 4]);
        let driven = entrainment_segment(&silent, &pulses(0.0), 100.0);
        assert_eq!(driven, vec![0.0; 4]);
    }
}
