#![allow(dead_code)]

use cbg_closed_loop::control::backend::{CurrentClass, Population, RecordingWindow, SimulationBackend};
use cbg_closed_loop::control::control_loop::{
    EntrainmentSettings, LoopSetup, ModulationMode, RecordingGeometry, StimulationSettings,
};
use cbg_closed_loop::control::schedule::ControllerCallSchedule;
use cbg_closed_loop::field::{CurrentTraces, TransferResistances};
use cbg_closed_loop::geometry::morphology::CompartmentClass;
use cbg_closed_loop::processing::biomarker::BiomarkerConfig;
use cbg_closed_loop::stimulation::entrainment::{EntrainmentTable, StimulationOrder};
use cbg_closed_loop::stimulation::waveform::StimulationChannels;
use cbg_closed_loop::stimulation::{tick_time, to_tick};
use cbg_closed_loop::{NeurostimError, Result};

pub const DT: f64 = 0.01;
pub const STEADY_STATE: f64 = 100.0;
pub const ONSET_DELAY: f64 = 10.0;
pub const WINDOW: f64 = 100.0;
pub const SAMPLING_TIME: f64 = 0.02;
pub const RUN_TIME: f64 = 200.0;
pub const RECORDING_INTERVAL: f64 = 0.5;
pub const STN_UNITS: usize = 8;
pub const GPE_UNITS: usize = 100;

/// Backend with deterministic beta-band currents and a full log of what
/// the control loop asked of it.
pub struct ScriptedBackend {
    tick: i64,
    rank: usize,
    workers: usize,
    stn: Vec<usize>,
    gpe: Vec<usize>,
    pub advances: Vec<f64>,
    pub windows: Vec<RecordingWindow>,
    pub coupled: Vec<CompartmentClass>,
    pub fail_after: Option<f64>,
}

impl ScriptedBackend {
    pub fn new(rank: usize, workers: usize) -> Self {
        Self {
            tick: 0,
            rank,
            workers,
            stn: (0..STN_UNITS).filter(|id| id % workers == rank).collect(),
            gpe: (0..GPE_UNITS).filter(|id| id % workers == rank).collect(),
            advances: Vec::new(),
            windows: Vec::new(),
            coupled: Vec::new(),
            fail_after: None,
        }
    }

    pub fn single() -> Self {
        Self::new(0, 1)
    }

    fn current(unit: usize, t: f64, class: CurrentClass) -> f64 {
        let phase = unit as f64 * 0.3;
        let beta = (2.0 * std::f64::consts::PI * 25.0 * t / 1000.0 + phase).sin();
        match class {
            CurrentClass::Ampa => -0.3 + 0.15 * beta,
            CurrentClass::Gabaa => 0.2 - 0.05 * beta,
        }
    }

    fn units(&self, population: Population) -> &[usize] {
        match population {
            Population::Stn => self.stn.as_slice(),
            Population::Cortical => &[],
            Population::Gpe => self.gpe.as_slice(),
        }
    }
}

impl SimulationBackend for ScriptedBackend {
    fn dt(&self) -> f64 {
        DT
    }

    fn current_time(&self) -> f64 {
        tick_time(self.tick, DT)
    }

    fn advance_to(&mut self, time: f64, _channels: &StimulationChannels) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if time > limit {
                return Err(NeurostimError::Backend("integrator diverged".to_string()));
            }
        }
        let target = to_tick(time, DT);
        if target < self.tick {
            return Err(NeurostimError::Backend("time went backwards".to_string()));
        }
        self.tick = target;
        self.advances.push(time);
        Ok(())
    }

    fn get_currents(&mut self, class: CurrentClass, window: RecordingWindow) -> Result<CurrentTraces> {
        self.windows.push(window);
        let samples = ((window.stop - window.start) / RECORDING_INTERVAL).floor() as usize;
        let series = self
            .stn
            .iter()
            .map(|&unit| {
                (0..samples)
                    .map(|k| Self::current(unit, window.start + k as f64 * RECORDING_INTERVAL, class))
                    .collect()
            })
            .collect();
        CurrentTraces::new(series)
    }

    fn local_index(&self, population: Population, unit_id: usize) -> Option<usize> {
        self.units(population).iter().position(|&id| id == unit_id)
    }

    fn local_units(&self, population: Population) -> Vec<usize> {
        self.units(population).to_vec()
    }

    fn apply_transfer_resistances(&mut self, resistances: &TransferResistances) -> Result<()> {
        self.coupled.push(resistances.class);
        Ok(())
    }
}

pub fn schedule() -> ControllerCallSchedule {
    ControllerCallSchedule::new(
        STEADY_STATE,
        WINDOW,
        SAMPLING_TIME,
        STEADY_STATE + RUN_TIME + DT,
        DT,
    )
    .unwrap()
}

pub fn recording_for(backend: &ScriptedBackend) -> RecordingGeometry {
    let units = backend.local_units(Population::Stn).len();
    RecordingGeometry {
        distances_1: vec![500.0; units],
        distances_2: vec![800.0; units],
        conductivity: 0.27,
    }
}

pub fn setup(backend: &ScriptedBackend, mode: ModulationMode, entrainment: bool) -> LoopSetup {
    LoopSetup {
        schedule: schedule(),
        steady_state: STEADY_STATE,
        onset_delay: ONSET_DELAY,
        end_time: STEADY_STATE + RUN_TIME + DT,
        recording_interval: RECORDING_INTERVAL,
        window_length: WINDOW,
        window_tail_length: 10.0,
        biomarker: BiomarkerConfig::default(),
        stimulation: StimulationSettings {
            mode,
            amplitude: 1.5,
            frequency: 130.0,
            pulse_width: 0.06,
            offset: 0.0,
            cathodic: true,
        },
        entrainment: entrainment.then(|| EntrainmentSettings {
            table: EntrainmentTable::default(),
            level: 100.0,
            order: StimulationOrder::seeded(GPE_UNITS, 7),
        }),
        recording: recording_for(backend),
    }
}
