// src/config/mod.rs
use crate::control::control_loop::ModulationMode;
use crate::control::controller::ControllerConfig;
use crate::error::{NeurostimError, Result};
use crate::field::Tissue;
use crate::geometry::electrodes::BipolarElectrode;
use crate::geometry::morphology::CorticalMorphology;
use crate::geometry::Point3;
use crate::processing::biomarker::BiomarkerConfig;
use crate::processing::filters::bandpass::BandPassFilter;
use crate::stimulation::entrainment::EntrainmentTable;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub controller: ControllerConfig,
    pub modulation: ModulationMode,
    pub stimulation: StimulationConfig,
    pub electrodes: ElectrodesConfig,
    pub tissue: Tissue,
    pub morphology: CorticalMorphology,
    pub biomarker: BiomarkerConfig,
    pub entrainment: EntrainmentTable,
    pub output: OutputConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// ms
    pub timestep: f64,
    /// ms
    pub steady_state_duration: f64,
    /// ms after the steady state
    pub run_time: f64,
    /// LFP sampling interval, ms
    pub recording_interval: f64,
    pub random_seed: u64,
    pub workers: usize,
    pub stn_population_size: usize,
    pub cortical_population_size: usize,
    pub gpe_population_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 0.01,
            steady_state_duration: 6000.0,
            run_time: 32000.0,
            recording_interval: 0.5,
            random_seed: 3695,
            workers: 1,
            stn_population_size: 100,
            cortical_population_size: 100,
            gpe_population_size: 100,
        }
    }
}

impl SimulationConfig {
    /// Steady state plus run time plus one step.
    pub fn total_time(&self) -> f64 {
        self.steady_state_duration + self.run_time + self.timestep
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulationTarget {
    /// Electrode in the STN: drives cortical collaterals and entrains GPe.
    #[default]
    Dbs,
    /// Electrode over cortex: drives axon nodes and the AIS.
    Cortical,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StimulationConfig {
    pub target: StimulationTarget,
    /// mA, held fixed under frequency modulation
    pub amplitude: f64,
    /// Hz, held fixed under amplitude modulation
    pub frequency: f64,
    /// ms
    pub pulse_width: f64,
    pub offset: f64,
    /// ms after the steady state before the waveform buffer starts
    pub onset_delay: f64,
    /// current injected into entrained GPe units during a pulse
    pub entrainment_level: f64,
    pub cathodic: bool,
}

impl Default for StimulationConfig {
    fn default() -> Self {
        Self {
            target: StimulationTarget::Dbs,
            amplitude: 1.5,
            frequency: 130.0,
            pulse_width: 0.06,
            offset: 0.0,
            onset_delay: 10.0,
            entrainment_level: 100.0,
            cathodic: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ElectrodesConfig {
    pub recording: BipolarElectrode,
    pub dbs_stimulating: Point3,
    pub cortical_stimulating: Point3,
}

impl Default for ElectrodesConfig {
    fn default() -> Self {
        Self {
            recording: BipolarElectrode {
                contact_1: Point3::new(0.0, -1500.0, 250.0),
                contact_2: Point3::new(0.0, 1500.0, 250.0),
            },
            dbs_stimulating: Point3::new(0.0, 0.0, 250.0),
            cortical_stimulating: Point3::new(0.0, 8000.0, 1000.0),
        }
    }
}

impl ElectrodesConfig {
    pub fn stimulating(&self, target: StimulationTarget) -> Point3 {
        match target {
            StimulationTarget::Dbs => self.dbs_stimulating,
            StimulationTarget::Cortical => self.cortical_stimulating,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub write_waveform: bool,
    pub log_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("results"),
            write_waveform: false,
            log_file: "neurostim.log".to_string(),
        }
    }
}

impl Config {
    /// Rejects anything that would fail later in the run.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if !(sim.timestep > 0.0) {
            return Err(NeurostimError::InvalidConfig(format!(
                "timestep must be positive, got {}",
                sim.timestep
            )));
        }
        if !(sim.steady_state_duration > 0.0 && sim.run_time > 0.0) {
            return Err(NeurostimError::InvalidConfig(
                "steady state duration and run time must be positive".to_string(),
            ));
        }
        if !(sim.recording_interval >= sim.timestep) {
            return Err(NeurostimError::InvalidConfig(format!(
                "recording interval {} ms is shorter than the timestep {} ms",
                sim.recording_interval, sim.timestep
            )));
        }
        if sim.workers == 0 {
            return Err(NeurostimError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if sim.stn_population_size == 0 || sim.cortical_population_size == 0 {
            return Err(NeurostimError::InvalidConfig(
                "populations must not be empty".to_string(),
            ));
        }
        // every worker has to contribute recorded units to the reduction
        if sim.workers > sim.stn_population_size {
            return Err(NeurostimError::InvalidConfig(format!(
                "{} workers for {} recorded units",
                sim.workers, sim.stn_population_size
            )));
        }

        self.controller.validate()?;

        let stim = &self.stimulation;
        if !(stim.frequency >= 0.0 && stim.amplitude >= 0.0) {
            return Err(NeurostimError::InvalidConfig(
                "stimulation amplitude and frequency must be non-negative".to_string(),
            ));
        }
        if !(stim.pulse_width > 0.0) {
            return Err(NeurostimError::InvalidConfig(format!(
                "pulse width must be positive, got {}",
                stim.pulse_width
            )));
        }
        if stim.frequency > 0.0 && stim.pulse_width >= 1000.0 / stim.frequency {
            return Err(NeurostimError::InvalidConfig(format!(
                "pulse width {} ms does not fit a {} Hz train",
                stim.pulse_width, stim.frequency
            )));
        }
        self.validate_output_range()?;
        if !(stim.onset_delay > 0.0) {
            return Err(NeurostimError::InvalidConfig(
                "stimulation onset delay must be positive".to_string(),
            ));
        }
        let first_call = sim.steady_state_duration
            + self.controller.window_length
            + 1000.0 * self.controller.sampling_time;
        if stim.onset_delay >= first_call - sim.steady_state_duration {
            return Err(NeurostimError::InvalidSchedule(format!(
                "onset delay {} ms reaches past the first controller call",
                stim.onset_delay
            )));
        }

        if !(self.tissue.conductivity > 0.0) {
            return Err(NeurostimError::InvalidConfig(format!(
                "tissue conductivity must be positive, got {}",
                self.tissue.conductivity
            )));
        }

        self.morphology.validate()?;
        self.entrainment.validate()?;
        BandPassFilter::new(self.biomarker.band.clone(), 1000.0 / sim.recording_interval)?;
        Ok(())
    }

    /// The controller output drives the modulated pulse parameter, so its
    /// whole range has to be a valid amplitude or frequency. The open loop
    /// command is clamped into the same range.
    fn validate_output_range(&self) -> Result<()> {
        let controller = &self.controller;
        if !(controller.min_value >= 0.0) {
            return Err(NeurostimError::InvalidConfig(format!(
                "controller output range starts below zero ({}) under {:?} modulation",
                controller.min_value, self.modulation
            )));
        }
        if self.modulation == ModulationMode::Frequency {
            let limit = 1000.0 / self.stimulation.pulse_width;
            if !(controller.max_value < limit) {
                return Err(NeurostimError::InvalidConfig(format!(
                    "controller output {} Hz leaves no gap between {} ms pulses",
                    controller.max_value, self.stimulation.pulse_width
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| NeurostimError::ConfigFile(format!("Failed to read config file: {}", e)))?;

    serde_yaml::from_str(&config_str)
        .map_err(|e| NeurostimError::ConfigFile(format!("Failed to parse config file: {}", e)))
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| NeurostimError::ConfigFile(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, yaml)
        .map_err(|e| NeurostimError::ConfigFile(format!("Failed to write config file: {}", e)))
}
