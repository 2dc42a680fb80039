pub mod run_simulation;
pub mod synthetic;
