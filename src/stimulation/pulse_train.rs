// src/stimulation/pulse_train.rs

use super::{ceil_tick, tick_time};
use crate::error::{NeurostimError, Result};

use tracing::debug;

/// Pulse time meaning "stimulation off".
pub const NEVER: f64 = 1e9;

/// Shape of the rectangular train (frequency in Hz, times in ms).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseTrainParams {
    pub amplitude: f64,
    pub frequency: f64,
    pub pulse_width: f64,
    pub offset: f64,
}

impl PulseTrainParams {
    /// Inter-pulse period in ms, `None` when stimulation is off.
    pub fn period(&self) -> Option<f64> {
        if self.frequency == 0.0 {
            None
        } else {
            Some(1000.0 / self.frequency)
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.frequency.is_finite() && self.frequency >= 0.0) {
            return Err(NeurostimError::InvalidPulseTrain(format!(
                "frequency must be finite and non-negative, got {}",
                self.frequency
            )));
        }
        if !(self.pulse_width.is_finite() && self.pulse_width >= 0.0) {
            return Err(NeurostimError::InvalidPulseTrain(format!(
                "pulse width must be finite and non-negative, got {}",
                self.pulse_width
            )));
        }
        if let Some(period) = self.period() {
            if self.pulse_width >= period {
                return Err(NeurostimError::InvalidPulseTrain(format!(
                    "pulse width {} ms does not fit in a {:.4} ms period",
                    self.pulse_width, period
                )));
            }
        }
        Ok(())
    }
}

/// A synthesized slice of the stimulation waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseSegment {
    pub signal: Vec<f64>,
    pub times: Vec<f64>,
    /// First onset at or after the segment's stop time.
    pub next_pulse_time: f64,
    /// Onset of the last pulse started inside the segment, or the prior
    /// anchor when none started.
    pub last_pulse_time: f64,
}

impl PulseSegment {
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Number of pulses whose rising edge falls inside the segment.
    pub fn rising_edges(&self, baseline: f64) -> usize {
        let mut previous = baseline;
        let mut edges = 0;
        for &value in &self.signal {
            if value != baseline && previous == baseline {
                edges += 1;
            }
            previous = value;
        }
        edges
    }
}

/// Samples a phase-locked rectangular pulse train on the integration grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseTrainGenerator {
    dt: f64,
}

impl PulseTrainGenerator {
    pub fn new(dt: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(NeurostimError::InvalidPulseTrain(format!(
                "time step must be positive, got {}",
                dt
            )));
        }
        Ok(Self { dt })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Synthesizes `[start_time, stop_time)`.
    ///
    /// The first onset is `last_pulse_time_prior + period`, moved forward to
    /// the first sample if that lies in the past; later onsets follow every
    /// period. A pulse that began at `last_pulse_time_prior` keeps covering
    /// the first samples until its width has elapsed.
    pub fn generate(
        &self,
        start_time: f64,
        stop_time: f64,
        last_pulse_time_prior: f64,
        params: &PulseTrainParams,
    ) -> Result<PulseSegment> {
        params.validate()?;

        let dt = self.dt;
        // never sample a pulse before its onset
        let first_tick = ceil_tick(start_time, dt);
        let end_tick = ceil_tick(stop_time, dt).max(first_tick);
        let times: Vec<f64> = (first_tick..end_tick).map(|tick| tick_time(tick, dt)).collect();

        let period = match params.period() {
            Some(period) => period,
            None => {
                return Ok(PulseSegment {
                    signal: vec![0.0; times.len()],
                    times,
                    next_pulse_time: NEVER,
                    last_pulse_time: last_pulse_time_prior,
                });
            }
        };

        let start = tick_time(first_tick, dt);
        let mut first_onset = last_pulse_time_prior + period;
        if first_onset < start {
            debug!(
                scheduled = first_onset,
                moved_to = start,
                "pulse onset in the past, moving it to the segment start"
            );
            first_onset = start;
        }

        let tol = dt * 1e-6;
        let width = params.pulse_width;
        let in_pulse = |t: f64| -> bool {
            let in_prior = t + tol >= last_pulse_time_prior && t - last_pulse_time_prior < width - tol;
            if in_prior {
                return true;
            }
            if t + tol < first_onset {
                return false;
            }
            let k = ((t - first_onset + tol) / period).floor();
            let onset = first_onset + k * period;
            t - onset < width - tol
        };

        let signal = times
            .iter()
            .map(|&t| if in_pulse(t) { params.amplitude } else { params.offset })
            .collect();

        // onsets strictly before the stop time belong to this segment
        let started = if first_onset >= stop_time {
            0.0
        } else {
            ((stop_time - first_onset) / period - 1e-9).ceil().max(0.0)
        };
        let last_pulse_time = if started > 0.0 {
            first_onset + (started - 1.0) * period
        } else {
            last_pulse_time_prior
        };

        Ok(PulseSegment {
            signal,
            times,
            next_pulse_time: first_onset + started * period,
            last_pulse_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.01;

    fn dbs(frequency: f64) -> PulseTrainParams {
        PulseTrainParams {
            amplitude: -1.5,
            frequency,
            pulse_width: 0.06,
            offset: 0.0,
        }
    }

    #[test]
    fn test_times_are_strictly_increasing_and_clipped() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(100.0, 110.0, 0.0, &dbs(130.0)).unwrap();

        assert_eq!(segment.times.len(), segment.signal.len());
        assert_eq!(segment.times.len(), 1000);
        assert!(segment.times.windows(2).all(|w| w[0] < w[1]));
        assert!((segment.times[0] - 100.0).abs() < 1e-9);
        assert!(*segment.times.last().unwrap() < 110.0);
    }

    #[test]
    fn test_pulse_count_matches_the_period() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(1000.0, 1100.0, 0.0, &dbs(130.0)).unwrap();
        let period: f64 = 1000.0 / 130.0;
        let expected = ((1100.0 - 1000.0) / period).floor() as usize;

        let edges = segment.rising_edges(0.0);
        assert!(edges == expected || edges == expected + 1, "{} pulses", edges);
    }

    #[test]
    fn test_pulse_width_in_samples() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(500.0, 510.0, 0.0, &dbs(100.0)).unwrap();
        // first pulse starts at the segment start and lasts 0.06 ms
        assert_eq!(&segment.signal[..7], &[-1.5, -1.5, -1.5, -1.5, -1.5, -1.5, 0.0]);
        // second pulse 10 ms later is past the stop time
        assert_eq!(segment.rising_edges(0.0), 1);
        assert!((segment.last_pulse_time - 500.0).abs() < 1e-9);
        assert!((segment.next_pulse_time - 510.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_frequency_switches_stimulation_off() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(200.0, 250.0, 180.0, &dbs(0.0)).unwrap();

        assert!(segment.signal.iter().all(|&v| v == 0.0));
        assert_eq!(segment.next_pulse_time, NEVER);
        assert_eq!(segment.last_pulse_time, 180.0);
    }

    #[test]
    fn test_first_onset_is_locked_to_the_prior_pulse() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(100.0, 130.0, 98.0, &dbs(100.0)).unwrap();
        // prior pulse at 98 ms, period 10 ms -> onsets at 108, 118, 128
        let first_on = segment
            .signal
            .iter()
            .position(|&v| v != 0.0)
            .map(|i| segment.times[i])
            .unwrap();
        assert!((first_on - 108.0).abs() < 1e-9);
        assert!((segment.last_pulse_time - 128.0).abs() < 1e-9);
        assert!((segment.next_pulse_time - 138.0).abs() < 1e-9);
    }

    #[test]
    fn test_onset_in_the_past_is_clamped_to_start() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(300.0, 305.0, 0.0, &dbs(130.0)).unwrap();
        assert_eq!(segment.signal[0], -1.5);
        assert!((segment.last_pulse_time - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_adjacent_segments_match_a_single_call() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let params = dbs(130.0);

        let whole = generator.generate(100.0, 200.0, 95.0, &params).unwrap();
        let first = generator.generate(100.0, 150.0, 95.0, &params).unwrap();
        let second = generator
            .generate(150.0, 200.0, first.last_pulse_time, &params)
            .unwrap();

        let mut signal = first.signal.clone();
        signal.extend(&second.signal);
        let mut times = first.times.clone();
        times.extend(&second.times);

        assert_eq!(times, whole.times);
        assert_eq!(signal, whole.signal);
        assert!((second.last_pulse_time - whole.last_pulse_time).abs() < 1e-9);
        assert!((second.next_pulse_time - whole.next_pulse_time).abs() < 1e-9);
    }

    #[test]
    fn test_pulse_straddling_a_boundary_continues() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let params = dbs(100.0);
        // onsets at 109.97, 119.97: the second straddles 120
        let first = generator.generate(100.0, 120.0, 99.97, &params).unwrap();
        assert!((first.last_pulse_time - 119.97).abs() < 1e-9);

        let second = generator
            .generate(120.0, 125.0, first.last_pulse_time, &params)
            .unwrap();
        assert_eq!(&second.signal[..4], &[-1.5, -1.5, -1.5, 0.0]);
    }

    #[test]
    fn test_off_grid_onsets_are_never_early() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let params = dbs(130.0);
        let period: f64 = 1000.0 / 130.0;

        // each segment starts at the previous segment's next pulse time,
        // which is off the sampling grid at 130 Hz
        let mut start = 100.0;
        let mut onsets = Vec::new();
        for stop in [120.0, 140.0, 160.0, 180.0] {
            let segment = generator.generate(start, stop, 0.0, &params).unwrap();
            assert!(segment.times[0] + 1e-9 >= start, "{} < {}", segment.times[0], start);
            assert!(segment.times[0] - start < DT);
            assert_eq!(segment.signal[0], -1.5);

            let mut previous = 0.0;
            for (&t, &v) in segment.times.iter().zip(&segment.signal) {
                if v != 0.0 && previous == 0.0 {
                    onsets.push(t);
                }
                previous = v;
            }
            start = segment.next_pulse_time;
        }

        assert!(onsets.len() > 8);
        for gap in onsets.windows(2).map(|w| w[1] - w[0]) {
            assert!(gap > period - DT - 1e-9, "gap {} ms", gap);
        }
    }

    #[test]
    fn test_empty_interval() {
        let generator = PulseTrainGenerator::new(DT).unwrap();
        let segment = generator.generate(50.0, 50.0, 0.0, &dbs(130.0)).unwrap();
        assert!(segment.is_empty());
        assert_eq!(segment.last_pulse_time, 0.0);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(PulseTrainGenerator::new(0.0).is_err());
        let generator = PulseTrainGenerator::new(DT).unwrap();
        assert!(generator.generate(0.0, 10.0, 0.0, &dbs(-5.0)).is_err());
        let too_wide = PulseTrainParams {
            pulse_width: 20.0,
            ..dbs(100.0)
        };
        assert!(generator.generate(0.0, 10.0, 0.0, &too_wide).is_err());
    }
}
