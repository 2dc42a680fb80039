//! Error types shared by every stage of the closed-loop pipeline.

use crate::geometry::morphology::CompartmentClass;

/// Result type alias using NeurostimError
pub type Result<T> = std::result::Result<T, NeurostimError>;

/// Fatal conditions. Recoverable conditions (splice fallback, empty
/// schedule, tail clamp, past pulse time) are logged, never raised.
#[derive(Debug, thiserror::Error)]
pub enum NeurostimError {
    /// A morphology block was configured with fewer than one segment
    #[error("invalid segment count for {block}: {count} (must be at least 1)")]
    InvalidSegmentCount { block: &'static str, count: usize },

    /// Point-source singularity: an electrode sits on a compartment
    #[error("zero electrode distance for {class} compartment {compartment} of cell {cell}")]
    ZeroDistance {
        class: CompartmentClass,
        cell: usize,
        compartment: usize,
    },

    /// Malformed controller call schedule
    #[error("invalid controller schedule: {0}")]
    InvalidSchedule(String),

    /// Pulse train parameters that cannot describe a rectangular train
    #[error("invalid pulse train: {0}")]
    InvalidPulseTrain(String),

    /// Any other configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading, parsing or writing the YAML configuration failed
    #[error("{0}")]
    ConfigFile(String),

    /// The simulation backend failed while advancing time
    #[error("simulation backend failure: {0}")]
    Backend(String),

    /// A worker could not complete the global reduction
    #[error("global reduction failed: {0}")]
    Reduction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl NeurostimError {
    /// Configuration errors are raised before the simulation starts.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            NeurostimError::InvalidSegmentCount { .. }
                | NeurostimError::ZeroDistance { .. }
                | NeurostimError::InvalidSchedule(_)
                | NeurostimError::InvalidPulseTrain(_)
                | NeurostimError::InvalidConfig(_)
                | NeurostimError::ConfigFile(_)
        )
    }
}
