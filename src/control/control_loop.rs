// src/control/control_loop.rs

use super::backend::{CurrentClass, Population, RecordingWindow, Reduction, SimulationBackend};
use super::controller::{Controller, ControllerHistory, ControllerInstance};
use super::schedule::ControllerCallSchedule;
use crate::error::{NeurostimError, Result};
use crate::field::{bipolar_lfp, CurrentTraces};
use crate::processing::biomarker::{BiomarkerConfig, BiomarkerExtractor};
use crate::stimulation::entrainment::{entrainment_segment, EntrainmentTable, StimulationOrder};
use crate::stimulation::pulse_train::{PulseTrainGenerator, PulseTrainParams, NEVER};
use crate::stimulation::waveform::{SpliceReport, StimulationChannels, StimulationWaveform};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Which stimulation parameter the controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationMode {
    #[default]
    Amplitude,
    Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Warmup,
    Running { call_index: usize },
    Done,
}

/// Fixed pulse parameters; the modulated one is overridden every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StimulationSettings {
    pub mode: ModulationMode,
    /// mA, used under frequency modulation.
    pub amplitude: f64,
    /// Hz, used under amplitude modulation.
    pub frequency: f64,
    pub pulse_width: f64,
    pub offset: f64,
    /// Negative-going pulses on the stimulating electrode.
    pub cathodic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntrainmentSettings {
    pub table: EntrainmentTable,
    /// Current injected into an entrained unit during a pulse.
    pub level: f64,
    pub order: StimulationOrder,
}

/// Mutable stimulation state shared by both modulation modes. The pulse
/// cursors live on the primary waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StimulationState {
    pub mode: ModulationMode,
    pub amplitude: f64,
    pub frequency: f64,
    /// Last frequency a segment was generated with.
    pub last_frequency: f64,
}

/// Reduced bipolar LFP since the end of the warm-up, one value per
/// recording sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LfpHistory {
    pub total: Vec<f64>,
    pub ampa: Vec<f64>,
    pub gabaa: Vec<f64>,
}

/// Recording electrode distances of the locally owned recorded units.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingGeometry {
    pub distances_1: Vec<f64>,
    pub distances_2: Vec<f64>,
    pub conductivity: f64,
}

/// Per-run state that outlives a single cycle.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub lfp: LfpHistory,
    pub recording: RecordingGeometry,
    pub last_record_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub call_index: usize,
    pub call_time: f64,
    pub simulation_time: f64,
    pub biomarker: f64,
    pub amplitude: f64,
    pub frequency: f64,
    pub splice: Option<SpliceReport>,
    pub entrained: usize,
}

#[derive(Debug)]
pub struct RunOutcome<B> {
    pub rank: usize,
    pub history: ControllerHistory,
    pub lfp: LfpHistory,
    pub cycles: Vec<CycleReport>,
    pub channels: StimulationChannels,
    pub backend: B,
}

/// Timing and signal-processing parameters of one run.
#[derive(Debug, Clone)]
pub struct LoopSetup {
    pub schedule: ControllerCallSchedule,
    pub steady_state: f64,
    /// Delay after the steady state before the waveform buffer starts.
    pub onset_delay: f64,
    pub end_time: f64,
    pub recording_interval: f64,
    pub window_length: f64,
    pub window_tail_length: f64,
    pub biomarker: BiomarkerConfig,
    pub stimulation: StimulationSettings,
    pub entrainment: Option<EntrainmentSettings>,
    pub recording: RecordingGeometry,
}

pub struct ControlLoop<B: SimulationBackend, R: Reduction> {
    backend: B,
    reduction: R,
    controller: Controller,
    schedule: ControllerCallSchedule,
    extractor: BiomarkerExtractor,
    generator: PulseTrainGenerator,
    settings: StimulationSettings,
    entrainment: Option<EntrainmentSettings>,
    channels: StimulationChannels,
    state: StimulationState,
    context: RunContext,
    steady_state: f64,
    phase: LoopPhase,
    cycles: Vec<CycleReport>,
}

impl<B: SimulationBackend, R: Reduction> ControlLoop<B, R> {
    pub fn new(backend: B, reduction: R, controller: Controller, setup: LoopSetup) -> Result<Self> {
        let dt = backend.dt();
        let generator = PulseTrainGenerator::new(dt)?;
        let extractor = BiomarkerExtractor::new(
            &setup.biomarker,
            setup.window_length,
            setup.window_tail_length,
            setup.recording_interval,
        )?;

        let onset = setup.steady_state + setup.onset_delay;
        if setup.schedule.first() < onset {
            return Err(NeurostimError::InvalidSchedule(format!(
                "first controller call at {} ms precedes the stimulation onset at {} ms",
                setup.schedule.first(),
                onset
            )));
        }

        let mut primary = StimulationWaveform::baseline(onset, setup.end_time, dt)?;
        primary.next_pulse_time = setup.schedule.first();
        primary.last_pulse_time = setup.steady_state;

        let secondary_units = match &setup.entrainment {
            Some(_) => backend.local_units(Population::Gpe),
            None => Vec::new(),
        };
        let channels = StimulationChannels::new(primary, secondary_units);

        let state = StimulationState {
            mode: setup.stimulation.mode,
            amplitude: setup.stimulation.amplitude,
            frequency: setup.stimulation.frequency,
            last_frequency: 0.0,
        };

        Ok(Self {
            backend,
            reduction,
            controller,
            schedule: setup.schedule,
            extractor,
            generator,
            settings: setup.stimulation,
            entrainment: setup.entrainment,
            channels,
            state,
            context: RunContext {
                lfp: LfpHistory::default(),
                recording: setup.recording,
                last_record_time: 0.0,
            },
            steady_state: setup.steady_state,
            phase: LoopPhase::Warmup,
            cycles: Vec::new(),
        })
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn channels(&self) -> &StimulationChannels {
        &self.channels
    }

    pub fn state(&self) -> &StimulationState {
        &self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Between calls the controller can be retuned, or an open loop
    /// command changed.
    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn extractor(&self) -> &BiomarkerExtractor {
        &self.extractor
    }

    fn advance(&mut self, time: f64) -> Result<()> {
        if let Err(e) = self.backend.advance_to(time, &self.channels) {
            error!(rank = self.reduction.rank(), target_time = time, "backend failed, aborting run: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Runs the model to steady state without control.
    pub fn warm_up(&mut self) -> Result<()> {
        if self.phase != LoopPhase::Warmup {
            return Ok(());
        }
        if self.reduction.rank() == 0 {
            info!(steady_state = self.steady_state, "running to steady state");
        }
        let target = self.steady_state + self.backend.dt();
        self.advance(target)?;
        self.context.last_record_time = self.backend.current_time();
        self.phase = LoopPhase::Running { call_index: 0 };
        Ok(())
    }

    /// Pulls this window's currents, forms the bipolar LFP and its synaptic
    /// components and reduces them across workers.
    fn record_lfp(&mut self) -> Result<()> {
        let window = RecordingWindow {
            start: self.context.last_record_time,
            stop: self.backend.current_time(),
        };
        self.context.last_record_time = window.stop;

        let ampa = self.backend.get_currents(CurrentClass::Ampa, window)?;
        let gabaa = self.backend.get_currents(CurrentClass::Gabaa, window)?;
        let synaptic = ampa.combined(&gabaa)?;

        let geometry = &self.context.recording;
        let lfp = |currents: &CurrentTraces| {
            bipolar_lfp(
                currents,
                &geometry.distances_1,
                &geometry.distances_2,
                geometry.conductivity,
            )
        };
        let total = lfp(&synaptic)?;
        let ampa_lfp = lfp(&ampa)?;
        let gabaa_lfp = lfp(&gabaa)?;

        let samples = total.len();
        let mut local = Vec::with_capacity(3 * samples);
        local.extend(&total);
        local.extend(&ampa_lfp);
        local.extend(&gabaa_lfp);

        let reduced = self.reduction.global_sum(&local)?;
        if reduced.len() != 3 * samples {
            return Err(NeurostimError::Reduction(format!(
                "reduced {} values, expected {}",
                reduced.len(),
                3 * samples
            )));
        }

        let history = &mut self.context.lfp;
        history.total.extend_from_slice(&reduced[..samples]);
        history.ampa.extend_from_slice(&reduced[samples..2 * samples]);
        history.gabaa.extend_from_slice(&reduced[2 * samples..]);
        Ok(())
    }

    /// Amplitude and frequency to stimulate with, given the controller's
    /// command.
    fn apply_command(&mut self, command: f64) {
        match self.settings.mode {
            ModulationMode::Amplitude => {
                self.state.amplitude = command;
                self.state.frequency = self.settings.frequency;
            }
            ModulationMode::Frequency => {
                self.state.amplitude = self.settings.amplitude;
                self.state.frequency = command;
            }
        }
    }

    /// Anchor pulse for the next segment. Under frequency modulation a new
    /// frequency re-times the pending pulse from the last one delivered.
    fn prepare_next_pulse(&mut self, now: f64) -> f64 {
        match self.state.mode {
            ModulationMode::Amplitude => 0.0,
            ModulationMode::Frequency => {
                let primary = &mut self.channels.primary;
                let prior = primary.last_pulse_time;
                if self.state.frequency != self.state.last_frequency {
                    if self.state.frequency == 0.0 {
                        primary.next_pulse_time = NEVER;
                    } else {
                        let period = 1000.0 / self.state.frequency;
                        let mut next = prior + period;
                        if next <= now {
                            debug!(scheduled = next, now, "next pulse in the past, clamping");
                            next = now;
                        }
                        primary.next_pulse_time = next;
                    }
                }
                prior
            }
        }
    }

    /// Writes the stimulation for `[next_pulse_time, next_call)` and drives
    /// the entrained secondary units with it.
    fn regenerate(&mut self, next_call: f64, prior: f64) -> Result<(SpliceReport, usize)> {
        let amplitude = if self.settings.cathodic {
            -self.state.amplitude
        } else {
            self.state.amplitude
        };
        let params = PulseTrainParams {
            amplitude,
            frequency: self.state.frequency,
            pulse_width: self.settings.pulse_width,
            offset: self.settings.offset,
        };

        let start = self.channels.primary.next_pulse_time;
        let segment = self.generator.generate(start, next_call, prior, &params)?;
        let report = self.channels.primary.splice(&segment);
        self.channels.primary.next_pulse_time = segment.next_pulse_time;
        self.channels.primary.last_pulse_time = segment.last_pulse_time;

        let mut entrained = 0;
        if let Some(entrainment) = &self.entrainment {
            entrained = entrainment.table.count(self.state.amplitude);
            let driven = entrainment_segment(&segment, &params, entrainment.level);
            for &unit in entrainment.order.first(entrained) {
                // secondary channels are laid out in local index order
                if let Some(index) = self.backend.local_index(Population::Gpe, unit) {
                    self.channels
                        .write_secondary(index, report.start_index, &driven);
                }
            }
        }

        self.state.last_frequency = self.state.frequency;
        Ok((report, entrained))
    }

    /// Runs one controller call. Returns `None` once the schedule is done.
    pub fn step(&mut self) -> Result<Option<CycleReport>> {
        if self.phase == LoopPhase::Warmup {
            self.warm_up()?;
        }
        let call_index = match self.phase {
            LoopPhase::Running { call_index } => call_index,
            _ => return Ok(None),
        };

        let call_time = self.schedule.times()[call_index];
        // stop one step short so the sample at `call_time` is still unplayed
        self.advance(call_time - self.backend.dt())?;
        let now = self.backend.current_time();
        let rank = self.reduction.rank();

        self.record_lfp()?;
        let biomarker = self.extractor.extract(&self.context.lfp.total);
        if rank == 0 {
            info!(call_time = now, biomarker, "controller called");
        }

        let command = self.controller.update(biomarker, now);
        self.apply_command(command);

        let mut splice = None;
        let mut entrained = 0;
        if let Some(next_call) = self.schedule.get(call_index + 1) {
            let prior = self.prepare_next_pulse(now);
            if self.channels.primary.next_pulse_time < next_call {
                let (report, count) = self.regenerate(next_call, prior)?;
                splice = Some(report);
                entrained = count;
            }
            self.phase = LoopPhase::Running {
                call_index: call_index + 1,
            };
        } else {
            self.phase = LoopPhase::Done;
        }

        let report = CycleReport {
            call_index,
            call_time,
            simulation_time: now,
            biomarker,
            amplitude: self.state.amplitude,
            frequency: self.state.frequency,
            splice,
            entrained,
        };
        self.cycles.push(report.clone());
        Ok(Some(report))
    }

    /// Warm-up followed by every scheduled call.
    pub fn run(mut self) -> Result<RunOutcome<B>> {
        self.warm_up()?;
        while self.step()?.is_some() {}

        if self.reduction.rank() == 0 {
            info!(calls = self.cycles.len(), "closed-loop run finished");
        }
        Ok(self.finish())
    }

    pub fn finish(self) -> RunOutcome<B> {
        RunOutcome {
            rank: self.reduction.rank(),
            history: self.controller.history().clone(),
            lfp: self.context.lfp,
            cycles: self.cycles,
            channels: self.channels,
            backend: self.backend,
        }
    }
}
