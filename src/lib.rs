#[cfg(feature = "python")]
pub mod bindings;
pub mod config;
pub mod control;
pub mod error;
pub mod field;
pub mod geometry;
pub mod local;
pub mod processing;
pub mod stimulation;
pub mod utils;

pub use error::{NeurostimError, Result};
