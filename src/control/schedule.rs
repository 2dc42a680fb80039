// src/control/schedule.rs

use crate::error::{NeurostimError, Result};
use crate::stimulation::{tick_time, to_tick};

use tracing::warn;

/// Times (ms) at which the controller is called. Fixed for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCallSchedule {
    times: Vec<f64>,
}

impl ControllerCallSchedule {
    /// Calls every `sampling_time` seconds from
    /// `steady_state + window_length + sampling_time` up to (excluding)
    /// `total_time`, quantised to the `dt` grid. An empty range falls back
    /// to a single call at the start time.
    pub fn new(
        steady_state: f64,
        window_length: f64,
        sampling_time: f64,
        total_time: f64,
        dt: f64,
    ) -> Result<Self> {
        if !(sampling_time > 0.0) {
            return Err(NeurostimError::InvalidSchedule(format!(
                "sampling time must be positive, got {} s",
                sampling_time
            )));
        }
        if !(window_length > 0.0) {
            return Err(NeurostimError::InvalidSchedule(format!(
                "controller window must be positive, got {} ms",
                window_length
            )));
        }
        if !(dt > 0.0) {
            return Err(NeurostimError::InvalidSchedule(format!(
                "time step must be positive, got {} ms",
                dt
            )));
        }

        let period = 1000.0 * sampling_time;
        let start = steady_state + window_length + period;
        let calls = ((total_time - start) / period - 1e-9).ceil().max(0.0) as usize;

        let quantise = |t: f64| tick_time(to_tick(t, dt), dt);
        let mut times: Vec<f64> = (0..calls)
            .map(|i| quantise(start + i as f64 * period))
            .collect();

        if times.is_empty() {
            warn!(
                start,
                total_time, "controller call times was empty, calling once at the start time"
            );
            times.push(quantise(start));
        }

        Self::from_times(times)
    }

    pub fn from_times(times: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(NeurostimError::InvalidSchedule(
                "schedule has no calls".to_string(),
            ));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(NeurostimError::InvalidSchedule(
                "call times must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { times })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.times.get(index).copied()
    }

    pub fn first(&self) -> f64 {
        self.times[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cadence() {
        // 6 s steady state, 2 s window, 20 ms calls, run for 1 s
        let schedule = ControllerCallSchedule::new(6000.0, 2000.0, 0.02, 9000.01, 0.01).unwrap();
        assert!((schedule.first() - 8020.0).abs() < 1e-9);
        assert!(schedule.times().windows(2).all(|w| (w[1] - w[0] - 20.0).abs() < 1e-6));
        assert!(*schedule.times().last().unwrap() < 9000.01);
        assert_eq!(schedule.len(), 50);
    }

    #[test]
    fn test_empty_range_falls_back_to_the_start() {
        let schedule = ControllerCallSchedule::new(100.0, 50.0, 0.02, 120.0, 0.01).unwrap();
        assert_eq!(schedule.len(), 1);
        assert!((schedule.first() - 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_times_sit_on_the_tick_grid() {
        let dt = 0.025;
        let schedule = ControllerCallSchedule::new(10.0, 10.0, 0.0033, 100.0, dt).unwrap();
        for &t in schedule.times() {
            assert_eq!(t, tick_time(to_tick(t, dt), dt));
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(ControllerCallSchedule::new(0.0, 10.0, 0.0, 100.0, 0.01).is_err());
        assert!(ControllerCallSchedule::new(0.0, -1.0, 0.02, 100.0, 0.01).is_err());
        assert!(ControllerCallSchedule::from_times(vec![]).is_err());
        assert!(ControllerCallSchedule::from_times(vec![1.0, 1.0]).is_err());
    }
}
