// src/control/backend.rs
//
// Seams to the neural simulator and to the other workers of a run.

use crate::error::{NeurostimError, Result};
use crate::field::{CurrentTraces, TransferResistances};
use crate::stimulation::waveform::StimulationChannels;

use std::sync::{Arc, Barrier, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrentClass {
    Ampa,
    Gabaa,
}

/// Populations the control loop addresses by global unit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Population {
    /// Recorded population (STN).
    Stn,
    /// Population driven through the stimulating electrode's field.
    Cortical,
    /// Population entrained by the stimulation (GPe).
    Gpe,
}

/// Half-open recording interval `[start, stop)` in ms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingWindow {
    pub start: f64,
    pub stop: f64,
}

pub trait SimulationBackend {
    fn dt(&self) -> f64;

    fn current_time(&self) -> f64;

    /// Integrates up to `time`, playing back `channels` as the
    /// extracellular and secondary stimulation.
    fn advance_to(&mut self, time: f64, channels: &StimulationChannels) -> Result<()>;

    /// Synaptic currents of the locally owned recorded units, one trace per
    /// unit in local index order, sampled inside `window`.
    fn get_currents(&mut self, class: CurrentClass, window: RecordingWindow) -> Result<CurrentTraces>;

    /// Position of a unit among the locally owned units, `None` when
    /// another worker owns it.
    fn local_index(&self, population: Population, unit_id: usize) -> Option<usize>;

    fn is_owned_locally(&self, population: Population, unit_id: usize) -> bool {
        self.local_index(population, unit_id).is_some()
    }

    /// Global ids of the locally owned units, in local index order.
    fn local_units(&self, population: Population) -> Vec<usize>;

    /// Hands the static field coupling of the stimulated compartments to
    /// the simulator.
    fn apply_transfer_resistances(&mut self, resistances: &TransferResistances) -> Result<()>;
}

/// Global sum across the workers of a run.
pub trait Reduction: Send {
    fn rank(&self) -> usize;

    fn workers(&self) -> usize;

    /// Blocks until every worker has contributed, then returns the
    /// element-wise sum. Every worker receives the same vector.
    fn global_sum(&self, local: &[f64]) -> Result<Vec<f64>>;
}

/// The only worker of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleWorker;

impl Reduction for SingleWorker {
    fn rank(&self) -> usize {
        0
    }

    fn workers(&self) -> usize {
        1
    }

    fn global_sum(&self, local: &[f64]) -> Result<Vec<f64>> {
        Ok(local.to_vec())
    }
}

struct SharedSumState {
    slots: Mutex<Vec<Vec<f64>>>,
    barrier: Barrier,
}

/// In-process reduction between worker threads.
///
/// Each worker writes its contribution to its own slot, waits for the
/// others, sums the slots in rank order and waits again before any slot
/// can be overwritten. Summing in rank order makes the result identical
/// on every worker.
#[derive(Clone)]
pub struct SharedSumReduction {
    state: Arc<SharedSumState>,
    rank: usize,
    workers: usize,
}

impl SharedSumReduction {
    /// One handle per worker, indexed by rank.
    pub fn group(workers: usize) -> Vec<SharedSumReduction> {
        let workers = workers.max(1);
        let state = Arc::new(SharedSumState {
            slots: Mutex::new(vec![Vec::new(); workers]),
            barrier: Barrier::new(workers),
        });
        (0..workers)
            .map(|rank| SharedSumReduction {
                state: Arc::clone(&state),
                rank,
                workers,
            })
            .collect()
    }
}

impl Reduction for SharedSumReduction {
    fn rank(&self) -> usize {
        self.rank
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn global_sum(&self, local: &[f64]) -> Result<Vec<f64>> {
        {
            let mut slots = self
                .state
                .slots
                .lock()
                .map_err(|_| NeurostimError::Reduction("a worker panicked".to_string()))?;
            slots[self.rank] = local.to_vec();
        }

        self.state.barrier.wait();

        let summed = {
            let slots = self
                .state
                .slots
                .lock()
                .map_err(|_| NeurostimError::Reduction("a worker panicked".to_string()))?;
            sum_in_rank_order(&slots, local.len())
        };

        self.state.barrier.wait();
        summed
    }
}

fn sum_in_rank_order(slots: &[Vec<f64>], len: usize) -> Result<Vec<f64>> {
    let mut total = vec![0.0; len];
    for (rank, slot) in slots.iter().enumerate() {
        if slot.len() != len {
            return Err(NeurostimError::Reduction(format!(
                "worker {} contributed {} values, expected {}",
                rank,
                slot.len(),
                len
            )));
        }
        for (sum, value) in total.iter_mut().zip(slot) {
            *sum += value;
        }
    }
    Ok(total)
}
