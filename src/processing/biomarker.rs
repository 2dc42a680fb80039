// src/processing/biomarker.rs

use super::filters::bandpass::{BandPassFilter, BandPassFilterConfig};
use super::filters::FilterInstance;
use crate::error::{NeurostimError, Result};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Longest filter transient that may be discarded, as a share of the window.
pub const MAX_TAIL_FRACTION: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiomarkerMeasure {
    /// Mean of the squared band-limited signal.
    #[default]
    Power,
    /// Mean of the rectified band-limited signal.
    Rectified,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct BiomarkerConfig {
    pub band: BandPassFilterConfig,
    pub measure: BiomarkerMeasure,
}

/// Clamps a tail length to `MAX_TAIL_FRACTION` of the window. Returns the
/// usable tail and whether it had to be shortened.
pub fn clamp_tail_length(window_samples: usize, tail_samples: usize) -> (usize, bool) {
    let bound = window_samples as f64 * MAX_TAIL_FRACTION;
    if tail_samples as f64 > bound {
        (bound as usize, true)
    } else {
        (tail_samples, false)
    }
}

pub struct BiomarkerExtractor {
    filter: BandPassFilter,
    measure: BiomarkerMeasure,
    window_samples: usize,
    tail_samples: usize,
    tail_was_clamped: bool,
}

impl BiomarkerExtractor {
    /// `window_length` and `tail_length` are in ms, `recording_interval` is
    /// the LFP sampling interval in ms.
    pub fn new(
        config: &BiomarkerConfig,
        window_length: f64,
        tail_length: f64,
        recording_interval: f64,
    ) -> Result<Self> {
        if !(recording_interval > 0.0) {
            return Err(NeurostimError::InvalidConfig(format!(
                "recording interval must be positive, got {}",
                recording_interval
            )));
        }
        let window_samples = (window_length / recording_interval) as usize;
        let tail_samples = (tail_length.max(0.0) / recording_interval) as usize;
        let fs = 1000.0 / recording_interval;
        Self::from_samples(config, window_samples, tail_samples, fs)
    }

    pub fn from_samples(
        config: &BiomarkerConfig,
        window_samples: usize,
        tail_samples: usize,
        fs: f64,
    ) -> Result<Self> {
        if window_samples == 0 {
            return Err(NeurostimError::InvalidConfig(
                "biomarker window must contain at least one sample".to_string(),
            ));
        }

        let (tail, clamped) = clamp_tail_length(window_samples, tail_samples);
        if clamped {
            warn!(
                requested = tail_samples,
                window = window_samples,
                resized = tail,
                "controller window tail can't be longer than 0.3 of the window, resizing"
            );
        }

        Ok(Self {
            filter: BandPassFilter::new(config.band.clone(), fs)?,
            measure: config.measure,
            window_samples,
            tail_samples: tail,
            tail_was_clamped: clamped,
        })
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    pub fn tail_samples(&self) -> usize {
        self.tail_samples
    }

    pub fn tail_was_clamped(&self) -> bool {
        self.tail_was_clamped
    }

    /// Band-limits the latest window of the LFP history, drops the filter
    /// transient and averages what is left.
    pub fn extract(&mut self, lfp_history: &[f64]) -> f64 {
        let start = lfp_history.len().saturating_sub(self.window_samples);
        let window = &lfp_history[start..];

        self.filter.reset();
        let filtered = self.filter.process_window(window);

        let settled = filtered.get(self.tail_samples..).unwrap_or(&[]);
        if settled.is_empty() {
            debug!(
                available = window.len(),
                tail = self.tail_samples,
                "not enough LFP samples past the filter transient"
            );
            return 0.0;
        }

        let total: f64 = match self.measure {
            BiomarkerMeasure::Power => settled.iter().map(|v| v * v).sum(),
            BiomarkerMeasure::Rectified => settled.iter().map(|v| v.abs()).sum(),
        };
        total / settled.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beta_signal(amplitude: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * std::f64::consts::PI * 25.0 * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn test_tail_is_clamped_to_three_tenths_of_the_window() {
        assert_eq!(clamp_tail_length(1000, 500), (300, true));
        assert_eq!(clamp_tail_length(1000, 300), (300, false));
        assert_eq!(clamp_tail_length(1000, 100), (100, false));
    }

    #[test]
    fn test_extractor_reports_the_clamp() {
        // 2000 ms window, 1000 ms tail, 0.5 ms sampling
        let extractor =
            BiomarkerExtractor::new(&BiomarkerConfig::default(), 2000.0, 1000.0, 0.5).unwrap();
        assert_eq!(extractor.window_samples(), 4000);
        assert_eq!(extractor.tail_samples(), 1200);
        assert!(extractor.tail_was_clamped());
    }

    #[test]
    fn test_biomarker_scales_with_beta_amplitude() {
        let fs = 2000.0;
        let mut extractor =
            BiomarkerExtractor::from_samples(&BiomarkerConfig::default(), 2000, 400, fs).unwrap();

        let weak = extractor.extract(&beta_signal(1.0, fs, 3000));
        let strong = extractor.extract(&beta_signal(2.0, fs, 3000));

        assert!(weak > 0.0);
        // power measure is quadratic in amplitude
        assert!((strong / weak - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_rectified_measure_is_linear() {
        let fs = 2000.0;
        let config = BiomarkerConfig {
            measure: BiomarkerMeasure::Rectified,
            ..BiomarkerConfig::default()
        };
        let mut extractor = BiomarkerExtractor::from_samples(&config, 2000, 400, fs).unwrap();
        let weak = extractor.extract(&beta_signal(1.0, fs, 2000));
        let strong = extractor.extract(&beta_signal(3.0, fs, 2000));
        assert!((strong / weak - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_only_the_latest_window_is_used() {
        let fs = 2000.0;
        let mut extractor =
            BiomarkerExtractor::from_samples(&BiomarkerConfig::default(), 1000, 200, fs).unwrap();

        let mut history = vec![50.0; 5000];
        history.extend(beta_signal(1.0, fs, 1000));
        let with_old_junk = extractor.extract(&history);
        let clean = extractor.extract(&beta_signal(1.0, fs, 1000));
        assert_eq!(with_old_junk, clean);
    }

    #[test]
    fn test_short_history_yields_zero() {
        let mut extractor =
            BiomarkerExtractor::from_samples(&BiomarkerConfig::default(), 1000, 200, 2000.0)
                .unwrap();
        assert_eq!(extractor.extract(&[1.0; 100]), 0.0);
        assert_eq!(extractor.extract(&[]), 0.0);
    }
}
