use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::control::backend::{CurrentClass, Population, RecordingWindow, SimulationBackend};
use crate::error::{NeurostimError, Result};
use crate::field::{transfer_resistance, CurrentTraces, Tissue, TransferResistances, TRANSFER_RESISTANCE_SCALE};
use crate::stimulation::waveform::StimulationChannels;
use crate::stimulation::{tick_time, to_tick};

// -----------------------------------------------------------------------------
// SETUP FOR THE SIMULATED CURRENTS
// -----------------------------------------------------------------------------

const BETA_FREQ: f64 = 25.0; // Hz
const PHASE_SPREAD: f64 = 0.5; // rad

// Synaptic currents in nA
const AMPA_MEAN: f64 = -0.3;
const AMPA_BETA: f64 = 0.15;
const GABAA_MEAN: f64 = 0.2;
const GABAA_BETA: f64 = 0.1;
const NOISE: f64 = 0.02;

// Leaky integration of the stimulation drive
const SUPPRESSION_TAU: f64 = 50.0; // ms
const SUPPRESSION_GAIN: f64 = 1.7;
// Electrode distance at which the field coupling is 1
const NOMINAL_DISTANCE: f64 = 1000.0; // µm

#[derive(Debug, Clone)]
pub struct SyntheticBackendConfig {
    pub dt: f64,
    pub recording_interval: f64,
    pub seed: u64,
    pub rank: usize,
    pub workers: usize,
    pub stn_population_size: usize,
    pub cortical_population_size: usize,
    pub gpe_population_size: usize,
    pub tissue: Tissue,
}

#[derive(Debug)]
struct RecordedUnit {
    phase: f64,
    rng: StdRng,
    ampa: Vec<f64>,
    gabaa: Vec<f64>,
}

/// Stand-in for the basal ganglia network: the STN produces beta-band
/// synaptic currents whose oscillation shrinks while the stimulating
/// electrode is active. Units are dealt out to workers round-robin.
#[derive(Debug)]
pub struct SyntheticBackend {
    dt: f64,
    tick: i64,
    record_every: i64,
    rank: usize,
    stn: Vec<usize>,
    cortical: Vec<usize>,
    gpe: Vec<usize>,
    units: Vec<RecordedUnit>,
    record_times: Vec<f64>,
    suppression: f64,
    coupling: f64,
    nominal_resistance: f64,
}

fn owned(population_size: usize, rank: usize, workers: usize) -> Vec<usize> {
    (0..population_size).filter(|id| id % workers == rank).collect()
}

impl SyntheticBackend {
    pub fn new(config: &SyntheticBackendConfig) -> Result<Self> {
        if !(config.dt > 0.0) || config.recording_interval < config.dt {
            return Err(NeurostimError::Backend(format!(
                "timestep {} ms and recording interval {} ms are inconsistent",
                config.dt, config.recording_interval
            )));
        }
        let workers = config.workers.max(1);
        if config.rank >= workers {
            return Err(NeurostimError::Backend(format!(
                "rank {} out of range for {} workers",
                config.rank, workers
            )));
        }

        let stn = owned(config.stn_population_size, config.rank, workers);
        let units = stn
            .iter()
            .map(|&id| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(id as u64 * 7919));
                RecordedUnit {
                    phase: rng.gen_range(-PHASE_SPREAD..PHASE_SPREAD),
                    rng,
                    ampa: Vec::new(),
                    gabaa: Vec::new(),
                }
            })
            .collect();

        Ok(Self {
            dt: config.dt,
            tick: 0,
            record_every: to_tick(config.recording_interval, config.dt).max(1),
            rank: config.rank,
            stn,
            cortical: owned(config.cortical_population_size, config.rank, workers),
            gpe: owned(config.gpe_population_size, config.rank, workers),
            units,
            record_times: Vec::new(),
            suppression: 0.0,
            coupling: 1.0,
            nominal_resistance: transfer_resistance(
                NOMINAL_DISTANCE,
                config.tissue.resistivity(),
                TRANSFER_RESISTANCE_SCALE,
            ),
        })
    }

    /// Current beta suppression level, 0 without stimulation.
    pub fn suppression(&self) -> f64 {
        self.suppression
    }

    pub fn coupling(&self) -> f64 {
        self.coupling
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    fn record(&mut self, t: f64) {
        let beta_scale = 1.0 / (1.0 + self.suppression);
        let omega = 2.0 * std::f64::consts::PI * BETA_FREQ / 1000.0;
        for unit in &mut self.units {
            let oscillation = (omega * t + unit.phase).sin();
            let ampa = AMPA_MEAN + AMPA_BETA * beta_scale * oscillation + unit.rng.gen_range(-NOISE..NOISE);
            let gabaa = GABAA_MEAN - GABAA_BETA * beta_scale * oscillation + unit.rng.gen_range(-NOISE..NOISE);
            unit.ampa.push(ampa);
            unit.gabaa.push(gabaa);
        }
        self.record_times.push(t);
    }

    /// Forgets every sample recorded before `time`.
    fn discard_before(&mut self, time: f64) {
        let stale = self.record_times.partition_point(|&t| t < time);
        if stale == 0 {
            return;
        }
        self.record_times.drain(..stale);
        for unit in &mut self.units {
            unit.ampa.drain(..stale);
            unit.gabaa.drain(..stale);
        }
    }

    fn population(&self, population: Population) -> &[usize] {
        match population {
            Population::Stn => &self.stn,
            Population::Cortical => &self.cortical,
            Population::Gpe => &self.gpe,
        }
    }
}

impl SimulationBackend for SyntheticBackend {
    fn dt(&self) -> f64 {
        self.dt
    }

    fn current_time(&self) -> f64 {
        tick_time(self.tick, self.dt)
    }

    fn advance_to(&mut self, time: f64, channels: &StimulationChannels) -> Result<()> {
        if !time.is_finite() {
            return Err(NeurostimError::Backend(format!("cannot advance to {}", time)));
        }
        let target = to_tick(time, self.dt);
        if target < self.tick {
            return Err(NeurostimError::Backend(format!(
                "cannot integrate backwards from {} ms to {} ms",
                self.current_time(),
                time
            )));
        }

        while self.tick < target {
            let t = tick_time(self.tick, self.dt);
            if self.tick % self.record_every == 0 {
                self.record(t);
            }
            let drive = channels.primary.value_at(t).abs() * self.coupling;
            self.suppression += self.dt * (SUPPRESSION_GAIN * drive - self.suppression / SUPPRESSION_TAU);
            self.tick += 1;
        }
        Ok(())
    }

    fn get_currents(&mut self, class: CurrentClass, window: RecordingWindow) -> Result<CurrentTraces> {
        self.discard_before(window.start);
        let count = self.record_times.partition_point(|&t| t < window.stop);
        let series = self
            .units
            .iter()
            .map(|unit| {
                let samples = match class {
                    CurrentClass::Ampa => &unit.ampa,
                    CurrentClass::Gabaa => &unit.gabaa,
                };
                samples[..count].to_vec()
            })
            .collect();
        CurrentTraces::new(series)
    }

    fn local_index(&self, population: Population, unit_id: usize) -> Option<usize> {
        self.population(population).iter().position(|&id| id == unit_id)
    }

    fn local_units(&self, population: Population) -> Vec<usize> {
        self.population(population).to_vec()
    }

    fn apply_transfer_resistances(&mut self, resistances: &TransferResistances) -> Result<()> {
        let mean = resistances.mean();
        if mean.is_finite() && mean > 0.0 {
            self.coupling = mean / self.nominal_resistance;
        }
        debug!(
            rank = self.rank,
            class = %resistances.class,
            coupling = self.coupling,
            "applied transfer resistances"
        );
        Ok(())
    }
}
