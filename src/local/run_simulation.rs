use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::info;

use super::synthetic::{SyntheticBackend, SyntheticBackendConfig};
use crate::config::{Config, StimulationTarget};
use crate::control::backend::{Population, Reduction, SharedSumReduction, SimulationBackend, SingleWorker};
use crate::control::control_loop::{
    ControlLoop, EntrainmentSettings, LoopSetup, RecordingGeometry, RunOutcome, StimulationSettings,
};
use crate::control::controller::{Controller, ControllerHistory};
use crate::control::schedule::ControllerCallSchedule;
use crate::error::{NeurostimError, Result};
use crate::field::TransferResistances;
use crate::geometry::electrodes::{ElectrodeDistances, ElectrodeLayout};
use crate::geometry::morphology::CompartmentClass;
use crate::geometry::Point3;
use crate::stimulation::entrainment::StimulationOrder;
use crate::utils::log::{log_csv, log_with_header, write_columns};

// Cell bodies are scattered in a box around the stimulating DBS electrode
const HALF_WIDTH: f64 = 1000.0; // µm
const DEPTH: f64 = 500.0; // µm

/// Reference positions of every cell, identical on every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationLayout {
    pub stn: Vec<Point3>,
    pub cortical: Vec<Point3>,
}

impl PopulationLayout {
    pub fn generate(config: &Config) -> Self {
        let mut rng = StdRng::seed_from_u64(config.simulation.random_seed);
        let mut place = |n: usize| -> Vec<Point3> {
            (0..n)
                .map(|_| {
                    Point3::new(
                        rng.gen_range(-HALF_WIDTH..HALF_WIDTH),
                        rng.gen_range(-HALF_WIDTH..HALF_WIDTH),
                        rng.gen_range(0.0..DEPTH),
                    )
                })
                .collect()
        };
        let stn = place(config.simulation.stn_population_size);
        let cortical = place(config.simulation.cortical_population_size);
        Self { stn, cortical }
    }

    fn select(positions: &[Point3], ids: &[usize]) -> Vec<Point3> {
        ids.iter().filter_map(|&id| positions.get(id).copied()).collect()
    }
}

/// Compartment classes the stimulating electrode couples through.
pub fn stimulated_classes(target: StimulationTarget) -> &'static [CompartmentClass] {
    match target {
        StimulationTarget::Dbs => &[CompartmentClass::Collateral],
        StimulationTarget::Cortical => &[CompartmentClass::AxonNode, CompartmentClass::Ais],
    }
}

pub fn electrode_layout(config: &Config) -> ElectrodeLayout {
    ElectrodeLayout {
        recording: config.electrodes.recording,
        stimulating: config.electrodes.stimulating(config.stimulation.target),
    }
}

pub fn transfer_resistances(config: &Config, distances: &ElectrodeDistances) -> Result<Vec<TransferResistances>> {
    stimulated_classes(config.stimulation.target)
        .iter()
        .map(|&class| TransferResistances::from_distances(class, distances.for_class(class), &config.tissue))
        .collect()
}

/// Distances and couplings over the whole population. Every worker's share
/// is a subset, so a geometry that passes here passes on every worker.
pub fn population_geometry(config: &Config) -> Result<(ElectrodeDistances, Vec<TransferResistances>)> {
    let layout = PopulationLayout::generate(config);
    let distances = ElectrodeDistances::compute(
        &electrode_layout(config),
        &layout.stn,
        &layout.cortical,
        &config.morphology,
    )?;
    let resistances = transfer_resistances(config, &distances)?;
    Ok((distances, resistances))
}

fn loop_setup(config: &Config, recording: RecordingGeometry) -> Result<LoopSetup> {
    let sim = &config.simulation;
    let schedule = ControllerCallSchedule::new(
        sim.steady_state_duration,
        config.controller.window_length,
        config.controller.sampling_time,
        sim.total_time(),
        sim.timestep,
    )?;

    let stim = &config.stimulation;
    let entrainment = match stim.target {
        StimulationTarget::Dbs => Some(EntrainmentSettings {
            table: config.entrainment.clone(),
            level: stim.entrainment_level,
            order: StimulationOrder::seeded(sim.gpe_population_size, sim.random_seed.wrapping_add(1)),
        }),
        StimulationTarget::Cortical => None,
    };

    Ok(LoopSetup {
        schedule,
        steady_state: sim.steady_state_duration,
        onset_delay: stim.onset_delay,
        end_time: sim.total_time(),
        recording_interval: sim.recording_interval,
        window_length: config.controller.window_length,
        window_tail_length: config.controller.window_tail_length,
        biomarker: config.biomarker.clone(),
        stimulation: StimulationSettings {
            mode: config.modulation,
            amplitude: stim.amplitude,
            frequency: stim.frequency,
            pulse_width: stim.pulse_width,
            offset: stim.offset,
            cathodic: stim.cathodic,
        },
        entrainment,
        recording,
    })
}

/// One worker's share of the run against the synthetic backend.
pub fn run_worker<R: Reduction>(config: &Config, reduction: R) -> Result<RunOutcome<SyntheticBackend>> {
    let sim = &config.simulation;
    let mut backend = SyntheticBackend::new(&SyntheticBackendConfig {
        dt: sim.timestep,
        recording_interval: sim.recording_interval,
        seed: sim.random_seed,
        rank: reduction.rank(),
        workers: reduction.workers(),
        stn_population_size: sim.stn_population_size,
        cortical_population_size: sim.cortical_population_size,
        gpe_population_size: sim.gpe_population_size,
        tissue: config.tissue,
    })?;

    let layout = PopulationLayout::generate(config);
    let stn = PopulationLayout::select(&layout.stn, &backend.local_units(Population::Stn));
    let cortical = PopulationLayout::select(&layout.cortical, &backend.local_units(Population::Cortical));
    let distances = ElectrodeDistances::compute(&electrode_layout(config), &stn, &cortical, &config.morphology)?;

    for resistances in transfer_resistances(config, &distances)? {
        backend.apply_transfer_resistances(&resistances)?;
    }

    let recording = RecordingGeometry {
        distances_1: distances.recording_1,
        distances_2: distances.recording_2,
        conductivity: config.tissue.conductivity,
    };
    let controller = Controller::from_config(&config.controller)?;
    let setup = loop_setup(config, recording)?;

    ControlLoop::new(backend, reduction, controller, setup)?.run()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub workers: usize,
    pub calls: usize,
    pub mean_biomarker: f64,
    pub final_output: f64,
    pub output_dir: PathBuf,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "workers:          {}", self.workers)?;
        writeln!(f, "controller calls: {}", self.calls)?;
        writeln!(f, "mean biomarker:   {:.6e}", self.mean_biomarker)?;
        writeln!(f, "final output:     {:.4}", self.final_output)?;
        write!(f, "results in:       {}", self.output_dir.display())
    }
}

/// Runs the configured number of workers and writes rank 0's results
/// under `output_dir`.
pub fn run_simulation(config: &Config, output_dir: &Path) -> Result<RunSummary> {
    config.validate()?;
    let workers = config.simulation.workers;
    info!(workers, controller = %config.controller.kind, "starting closed-loop run");

    let outcome = if workers == 1 {
        run_worker(config, SingleWorker)?
    } else {
        // a worker failing on its own cells would leave the others waiting
        // in the reduction forever
        population_geometry(config)?;
        let results: Vec<Result<RunOutcome<SyntheticBackend>>> = thread::scope(|scope| {
            let handles: Vec<_> = SharedSumReduction::group(workers)
                .into_iter()
                .map(|reduction| scope.spawn(move || run_worker(config, reduction)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(NeurostimError::Reduction("worker thread panicked".to_string())))
                })
                .collect()
        });
        let mut outcomes = results.into_iter().collect::<Result<Vec<_>>>()?;
        outcomes.retain(|outcome| outcome.rank == 0);
        outcomes
            .pop()
            .ok_or_else(|| NeurostimError::Reduction("no outcome from rank 0".to_string()))?
    };

    write_outputs(config, &outcome, output_dir)?;

    let history = &outcome.history;
    let summary = RunSummary {
        workers,
        calls: history.len(),
        mean_biomarker: mean(&history.state),
        final_output: history.output.last().copied().unwrap_or(0.0),
        output_dir: output_dir.to_path_buf(),
    };

    log_with_header(
        output_dir.join("logs"),
        &config.output.log_file,
        &format!("{} control, {:?} modulation", config.controller.kind, config.modulation),
        &summary.to_string(),
    )?;
    log_csv(
        output_dir.join("logs").join("runs.csv"),
        &["controller", "modulation", "workers", "calls", "mean_biomarker", "final_output"],
        &[
            config.controller.kind.to_string(),
            format!("{:?}", config.modulation).to_lowercase(),
            workers.to_string(),
            summary.calls.to_string(),
            summary.mean_biomarker.to_string(),
            summary.final_output.to_string(),
        ],
    )?;

    Ok(summary)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Controller histories, the reduced STN LFP and optionally the
/// stimulation waveform, as CSV.
pub fn write_outputs(config: &Config, outcome: &RunOutcome<SyntheticBackend>, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    write_controller_history(&outcome.history, output_dir)?;

    let lfp = &outcome.lfp;
    write_columns(
        output_dir.join("stn_lfp.csv"),
        &["lfp", "lfp_ampa", "lfp_gabaa"],
        &[lfp.total.as_slice(), lfp.ampa.as_slice(), lfp.gabaa.as_slice()],
    )?;

    if config.output.write_waveform {
        let primary = &outcome.channels.primary;
        write_columns(
            output_dir.join("stimulation_waveform.csv"),
            &["time", "amplitude"],
            &[primary.times(), primary.amplitudes()],
        )?;
    }
    Ok(())
}

fn write_single(output_dir: &Path, name: &str, header: &str, values: &[f64]) -> Result<()> {
    write_columns(output_dir.join(name), &[header], &[values])
}

pub fn write_controller_history(history: &ControllerHistory, output_dir: &Path) -> Result<()> {
    write_single(output_dir, "controller_beta_values.csv", "beta", &history.state)?;
    write_single(output_dir, "controller_error_values.csv", "error", &history.error)?;
    write_single(output_dir, "controller_values.csv", "output", &history.output)?;
    write_single(output_dir, "controller_sample_times.csv", "time", &history.sample_times)?;

    if let Some(reference) = &history.reference {
        write_single(output_dir, "controller_reference_values.csv", "reference", reference)?;
    }
    if let Some(iteration) = &history.iteration {
        write_single(output_dir, "controller_iteration_values.csv", "iteration", iteration)?;
    }
    if let Some(terms) = &history.integral_term {
        write_single(output_dir, "controller_integral_term_values.csv", "integral_term", terms)?;
    }
    if let Some(parameters) = &history.parameters {
        let width = parameters.iter().map(Vec::len).max().unwrap_or(0);
        let columns: Vec<Vec<f64>> = (0..width)
            .map(|i| parameters.iter().map(|row| row.get(i).copied().unwrap_or(f64::NAN)).collect())
            .collect();
        let headers: Vec<String> = (0..width).map(|i| format!("parameter_{}", i)).collect();
        let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
        let column_refs: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();
        write_columns(
            output_dir.join("controller_parameter_values.csv"),
            &header_refs,
            &column_refs,
        )?;
    }
    Ok(())
}

/// Distance and coupling statistics for one compartment class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassGeometry {
    pub class: CompartmentClass,
    pub compartments: usize,
    pub min_distance: f64,
    pub max_distance: f64,
    pub mean_transfer_resistance: Option<f64>,
}

/// Whole-population geometry, as used by the `geometry` command.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryReport {
    pub target: StimulationTarget,
    pub recording_1_mean: f64,
    pub recording_2_mean: f64,
    pub classes: Vec<ClassGeometry>,
}

pub fn geometry_report(config: &Config) -> Result<GeometryReport> {
    config.validate()?;
    let (distances, resistances) = population_geometry(config)?;

    let classes = [
        CompartmentClass::Collateral,
        CompartmentClass::AxonNode,
        CompartmentClass::Ais,
        CompartmentClass::Soma,
    ]
    .into_iter()
    .map(|class| {
        let matrix = distances.for_class(class);
        let (min_distance, max_distance) = matrix
            .iter()
            .fold((f64::INFINITY, 0.0f64), |(lo, hi), (_, _, d)| (lo.min(d), hi.max(d)));
        ClassGeometry {
            class,
            compartments: matrix.compartments(),
            min_distance,
            max_distance,
            mean_transfer_resistance: resistances.iter().find(|r| r.class == class).map(TransferResistances::mean),
        }
    })
    .collect();

    Ok(GeometryReport {
        target: config.stimulation.target,
        recording_1_mean: mean(&distances.recording_1),
        recording_2_mean: mean(&distances.recording_2),
        classes,
    })
}

impl fmt::Display for GeometryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stimulation target: {:?}", self.target)?;
        writeln!(
            f,
            "mean STN distance to recording contacts: {:.1} / {:.1} um",
            self.recording_1_mean, self.recording_2_mean
        )?;
        for class in &self.classes {
            write!(
                f,
                "{:>10}: {} compartments per cell, {:.1}..{:.1} um",
                class.class.to_string(),
                class.compartments,
                class.min_distance,
                class.max_distance
            )?;
            if let Some(rx) = class.mean_transfer_resistance {
                write!(f, ", mean transfer resistance {:.4} MOhm", rx)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_reproducible() {
        let config = Config::default();
        assert_eq!(PopulationLayout::generate(&config), PopulationLayout::generate(&config));
        assert_eq!(PopulationLayout::generate(&config).stn.len(), 100);
    }

    #[test]
    fn test_target_selects_coupled_classes() {
        assert_eq!(stimulated_classes(StimulationTarget::Dbs), &[CompartmentClass::Collateral]);
        assert_eq!(stimulated_classes(StimulationTarget::Cortical).len(), 2);
    }

    #[test]
    fn test_geometry_report_for_dbs() {
        let report = geometry_report(&Config::default()).unwrap();
        assert_eq!(report.classes.len(), 4);

        let collateral = &report.classes[0];
        assert_eq!(collateral.class, CompartmentClass::Collateral);
        assert_eq!(collateral.compartments, 11);
        assert!(collateral.mean_transfer_resistance.unwrap() > 0.0);
        assert!(report.classes[1].mean_transfer_resistance.is_none());
        assert!(collateral.min_distance <= collateral.max_distance);
    }
}
