use crate::config::{load_config, Config};
use crate::error::NeurostimError;
use crate::field::{transfer_resistance, Tissue, TRANSFER_RESISTANCE_SCALE};
use crate::geometry::morphology::{segment_centers, SegmentPlacement};
use crate::geometry::{distance, Point3};
use crate::local::run_simulation::run_simulation;
use crate::stimulation::pulse_train::{PulseTrainGenerator, PulseTrainParams};

use std::collections::HashMap;
use std::path::PathBuf;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

impl From<NeurostimError> for PyErr {
    fn from(err: NeurostimError) -> PyErr {
        if err.is_configuration_error() {
            PyValueError::new_err(err.to_string())
        } else {
            PyRuntimeError::new_err(err.to_string())
        }
    }
}

#[pyclass]
pub struct PyPulseTrainGenerator {
    generator: PulseTrainGenerator,
    params: PulseTrainParams,
}

#[pymethods]
impl PyPulseTrainGenerator {
    #[new]
    pub fn new(dt: f64, amplitude: f64, frequency: f64, pulse_width: f64) -> PyResult<Self> {
        Ok(PyPulseTrainGenerator {
            generator: PulseTrainGenerator::new(dt)?,
            params: PulseTrainParams {
                amplitude,
                frequency,
                pulse_width,
                offset: 0.0,
            },
        })
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.params.amplitude = amplitude;
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.params.frequency = frequency;
    }

    /// Returns `(signal, times, next_pulse_time, last_pulse_time)`.
    pub fn generate(
        &self,
        start_time: f64,
        stop_time: f64,
        last_pulse_time_prior: f64,
    ) -> PyResult<(Vec<f64>, Vec<f64>, f64, f64)> {
        let segment = self
            .generator
            .generate(start_time, stop_time, last_pulse_time_prior, &self.params)?;
        Ok((
            segment.signal,
            segment.times,
            segment.next_pulse_time,
            segment.last_pulse_time,
        ))
    }
}

#[pyfunction]
#[pyo3(name = "segment_centers", signature = (n_segments, centered = false))]
pub fn py_segment_centers(n_segments: usize, centered: bool) -> PyResult<Vec<f64>> {
    let placement = if centered {
        SegmentPlacement::Centered
    } else {
        SegmentPlacement::Pinned
    };
    Ok(segment_centers(n_segments, placement)?)
}

#[pyfunction]
#[pyo3(name = "distance")]
pub fn py_distance(electrode: [f64; 3], compartment: [f64; 3]) -> f64 {
    distance(Point3::from(electrode), Point3::from(compartment), None)
}

#[pyfunction]
#[pyo3(name = "transfer_resistance", signature = (distance_um, conductivity = 0.27))]
pub fn py_transfer_resistance(distance_um: f64, conductivity: f64) -> PyResult<f64> {
    if !(distance_um > 0.0) {
        return Err(PyValueError::new_err("distance must be positive"));
    }
    let tissue = Tissue { conductivity };
    Ok(transfer_resistance(
        distance_um,
        tissue.resistivity(),
        TRANSFER_RESISTANCE_SCALE,
    ))
}

/// One-shot pulse train over `[start_time, stop_time)`. Returns
/// `(signal, times, next_pulse_time, last_pulse_time)`.
#[pyfunction]
#[pyo3(
    name = "generate_pulse_train",
    signature = (start_time, stop_time, last_pulse_time_prior, dt, amplitude, frequency, pulse_width, offset = 0.0)
)]
#[allow(clippy::too_many_arguments)]
pub fn py_generate_pulse_train(
    start_time: f64,
    stop_time: f64,
    last_pulse_time_prior: f64,
    dt: f64,
    amplitude: f64,
    frequency: f64,
    pulse_width: f64,
    offset: f64,
) -> PyResult<(Vec<f64>, Vec<f64>, f64, f64)> {
    let params = PulseTrainParams {
        amplitude,
        frequency,
        pulse_width,
        offset,
    };
    let segment = PulseTrainGenerator::new(dt)?.generate(start_time, stop_time, last_pulse_time_prior, &params)?;
    Ok((
        segment.signal,
        segment.times,
        segment.next_pulse_time,
        segment.last_pulse_time,
    ))
}

/// Runs a closed-loop simulation from a YAML file, or the defaults when no
/// path is given.
#[pyfunction]
#[pyo3(name = "run_simulation", signature = (config_path = None, output_dir = None))]
pub fn py_run_simulation(
    config_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> PyResult<HashMap<String, f64>> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    let output_dir = output_dir.unwrap_or_else(|| config.output.directory.clone());
    let summary = run_simulation(&config, &output_dir)?;

    let mut result = HashMap::new();
    result.insert("calls".to_string(), summary.calls as f64);
    result.insert("mean_biomarker".to_string(), summary.mean_biomarker);
    result.insert("final_output".to_string(), summary.final_output);
    Ok(result)
}

/// A Python module implemented in Rust.
#[pymodule]
pub fn cbg_closed_loop(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPulseTrainGenerator>()?;
    m.add_function(wrap_pyfunction!(py_segment_centers, m)?)?;
    m.add_function(wrap_pyfunction!(py_distance, m)?)?;
    m.add_function(wrap_pyfunction!(py_transfer_resistance, m)?)?;
    m.add_function(wrap_pyfunction!(py_generate_pulse_train, m)?)?;
    m.add_function(wrap_pyfunction!(py_run_simulation, m)?)?;
    Ok(())
}
