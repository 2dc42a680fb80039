use super::FilterInstance;
use crate::error::{NeurostimError, Result};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BandPassFilterConfig {
    pub id: String,
    pub f_low: f64,
    pub f_high: f64,
    /// Number of cascaded high-pass/low-pass section pairs.
    pub order: usize,
}

impl Default for BandPassFilterConfig {
    fn default() -> Self {
        // Beta band around 25 Hz
        Self {
            id: "beta".to_string(),
            f_low: 21.0,
            f_high: 29.0,
            order: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    HighPass,
    LowPass,
}

pub struct BandPassFilter {
    config: BandPassFilterConfig,
    sections: Vec<SecondOrderFilter>,
}

#[derive(Debug, Clone)]
pub struct SecondOrderFilter {
    a: [f64; 3],
    b: [f64; 3],
    x: [f64; 2],
    y: [f64; 2],
}

impl SecondOrderFilter {
    pub fn new(f0: f64, fs: f64, kind: FilterKind) -> Self {
        let q = (2.0f64).sqrt() / 2.0; // Butterworth
        let omega = 2.0 * std::f64::consts::PI * f0 / fs;
        let alpha = f64::sin(omega) / (2.0 * q);
        let cos_omega = f64::cos(omega);

        let (b0, b1, b2) = match kind {
            FilterKind::HighPass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
            ),
            FilterKind::LowPass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
            ),
        };

        SecondOrderFilter {
            a: [1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha],
            b: [b0, b1, b2],
            x: [0.0, 0.0],
            y: [0.0, 0.0],
        }
    }

    fn calculate_output(&mut self, input: f64) -> f64 {
        let output = (self.b[0] / self.a[0]) * input
            + (self.b[1] / self.a[0]) * self.x[0]
            + (self.b[2] / self.a[0]) * self.x[1]
            - (self.a[1] / self.a[0]) * self.y[0]
            - (self.a[2] / self.a[0]) * self.y[1];

        // Update internal sample history
        self.x[1] = self.x[0];
        self.x[0] = input;
        self.y[1] = self.y[0];
        self.y[0] = output;

        output
    }

    fn reset(&mut self) {
        self.x = [0.0, 0.0];
        self.y = [0.0, 0.0];
    }
}

impl BandPassFilter {
    /// High-pass sections at `f_low` followed by low-pass sections at
    /// `f_high`, `order` of each.
    pub fn new(config: BandPassFilterConfig, fs: f64) -> Result<Self> {
        let nyquist = fs / 2.0;
        if !(config.f_low > 0.0 && config.f_low < config.f_high && config.f_high < nyquist) {
            return Err(NeurostimError::InvalidConfig(format!(
                "band-pass filter {} needs 0 < f_low < f_high < fs/2, got {}..{} Hz at fs {} Hz",
                config.id, config.f_low, config.f_high, fs
            )));
        }
        if config.order == 0 {
            return Err(NeurostimError::InvalidConfig(format!(
                "band-pass filter {} needs at least one section",
                config.id
            )));
        }

        let high_pass = (0..config.order)
            .map(|_| SecondOrderFilter::new(config.f_low, fs, FilterKind::HighPass));
        let low_pass = (0..config.order)
            .map(|_| SecondOrderFilter::new(config.f_high, fs, FilterKind::LowPass));
        let sections = high_pass.chain(low_pass).collect();

        Ok(BandPassFilter { config, sections })
    }
}

impl FilterInstance for BandPassFilter {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn process_sample(&mut self, sample: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(sample, |value, section| section.calculate_output(value))
    }

    fn reset(&mut self) {
        self.sections.iter_mut().for_each(SecondOrderFilter::reset);
    }
}
