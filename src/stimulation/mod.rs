// src/stimulation/mod.rs

pub mod entrainment;
pub mod pulse_train;
pub mod waveform;

/// Index of the integration step closest to `time`.
///
/// Waveform times are always rebuilt from ticks, so two times that land on
/// the same step compare equal bit for bit.
pub fn to_tick(time: f64, dt: f64) -> i64 {
    (time / dt).round() as i64
}

pub fn tick_time(tick: i64, dt: f64) -> f64 {
    tick as f64 * dt
}

/// First tick whose time is at or after `time`.
pub(crate) fn ceil_tick(time: f64, dt: f64) -> i64 {
    (time / dt - 1e-9).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_round_trip_on_grid() {
        let dt = 0.01;
        let t = 6010.03;
        assert_eq!(tick_time(to_tick(t, dt), dt), tick_time(601003, dt));
    }

    #[test]
    fn test_ceil_tick_keeps_exact_grid_points() {
        let dt = 0.01;
        assert_eq!(ceil_tick(1.0, dt), 100);
        assert_eq!(ceil_tick(1.004, dt), 101);
    }
}
