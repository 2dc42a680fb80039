// src/stimulation/waveform.rs

use super::pulse_train::PulseSegment;
use super::{tick_time, to_tick};
use crate::error::{NeurostimError, Result};

use tracing::warn;

/// Where a segment landed in the persistent buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceReport {
    pub start_index: usize,
    pub written: usize,
    /// `false` when no buffer time equalled the segment start and the
    /// segment was written from index 0 instead.
    pub exact_match: bool,
}

/// Right-continuous step waveform played back by the backend.
///
/// The buffer is allocated once for the whole run and only ever rewritten
/// in place, so indices handed out by `splice` stay valid.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulationWaveform {
    times: Vec<f64>,
    amplitudes: Vec<f64>,
    pub next_pulse_time: f64,
    pub last_pulse_time: f64,
}

impl StimulationWaveform {
    pub fn from_points(times: Vec<f64>, amplitudes: Vec<f64>) -> Result<Self> {
        if times.len() != amplitudes.len() {
            return Err(NeurostimError::InvalidPulseTrain(format!(
                "waveform has {} times but {} amplitudes",
                times.len(),
                amplitudes.len()
            )));
        }
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(NeurostimError::InvalidPulseTrain(
                "waveform times must be non-decreasing".to_string(),
            ));
        }
        Ok(Self {
            times,
            amplitudes,
            next_pulse_time: 0.0,
            last_pulse_time: 0.0,
        })
    }

    /// All-zero buffer covering the run: the points `0` and `onset`, then
    /// every `dt` step from `onset + dt` up to `end`.
    pub fn baseline(onset: f64, end: f64, dt: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(NeurostimError::InvalidPulseTrain(format!(
                "time step must be positive, got {}",
                dt
            )));
        }
        if !(onset > 0.0 && end >= onset) {
            return Err(NeurostimError::InvalidPulseTrain(format!(
                "stimulation onset {} must lie in (0, {}]",
                onset, end
            )));
        }

        let onset_tick = to_tick(onset, dt);
        let end_tick = to_tick(end, dt);
        let mut times = Vec::with_capacity((end_tick - onset_tick + 2).max(2) as usize);
        times.push(0.0);
        times.extend((onset_tick..=end_tick).map(|tick| tick_time(tick, dt)));
        let amplitudes = vec![0.0; times.len()];

        Ok(Self {
            times,
            amplitudes,
            next_pulse_time: 0.0,
            last_pulse_time: 0.0,
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    /// Index of the last point at or before `time`.
    pub fn index_at(&self, time: f64) -> Option<usize> {
        self.times.partition_point(|&t| t <= time).checked_sub(1)
    }

    /// Amplitude in effect at `time`; zero before the first point.
    pub fn value_at(&self, time: f64) -> f64 {
        self.index_at(time)
            .map(|i| self.amplitudes[i])
            .unwrap_or(0.0)
    }

    /// Index whose time equals `time` exactly.
    pub fn find_exact(&self, time: f64) -> Option<usize> {
        let i = self.times.partition_point(|&t| t < time);
        (i < self.times.len() && self.times[i] == time).then_some(i)
    }

    /// Overwrites amplitudes from `start_index`, clipped to the buffer end.
    /// Returns how many values were written.
    pub fn overwrite_from(&mut self, start_index: usize, values: &[f64]) -> usize {
        overwrite(&mut self.amplitudes, start_index, values)
    }

    /// Writes `segment` over the buffer starting at the point whose time
    /// equals the segment's first time. Without an exact match the segment
    /// is written from index 0.
    pub fn splice(&mut self, segment: &PulseSegment) -> SpliceReport {
        let Some(&first_time) = segment.times.first() else {
            return SpliceReport {
                start_index: 0,
                written: 0,
                exact_match: true,
            };
        };

        let (start_index, exact_match) = match self.find_exact(first_time) {
            Some(index) => (index, true),
            None => {
                warn!(
                    segment_start = first_time,
                    "no buffer point matches the segment start, splicing at index 0"
                );
                (0, false)
            }
        };

        let written = self.overwrite_from(start_index, &segment.signal);
        SpliceReport {
            start_index,
            written,
            exact_match,
        }
    }
}

fn overwrite(buffer: &mut [f64], start_index: usize, values: &[f64]) -> usize {
    if start_index >= buffer.len() {
        return 0;
    }
    let end = (start_index + values.len()).min(buffer.len());
    let written = end - start_index;
    buffer[start_index..end].copy_from_slice(&values[..written]);
    written
}

/// Waveform of one secondary unit on the primary time grid. Storage is
/// only allocated once the unit is first driven.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryChannel {
    pub unit: usize,
    amplitudes: Vec<f64>,
}

impl SecondaryChannel {
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            amplitudes: Vec::new(),
        }
    }

    pub fn is_driven(&self) -> bool {
        !self.amplitudes.is_empty()
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }
}

/// Everything the backend plays back: the stimulating electrode waveform
/// and one channel per locally owned secondary unit.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulationChannels {
    pub primary: StimulationWaveform,
    pub secondary: Vec<SecondaryChannel>,
}

impl StimulationChannels {
    pub fn new(primary: StimulationWaveform, secondary_units: impl IntoIterator<Item = usize>) -> Self {
        Self {
            primary,
            secondary: secondary_units.into_iter().map(SecondaryChannel::new).collect(),
        }
    }

    pub fn primary_only(primary: StimulationWaveform) -> Self {
        Self::new(primary, std::iter::empty())
    }

    pub fn channel(&self, unit: usize) -> Option<&SecondaryChannel> {
        self.secondary.iter().find(|c| c.unit == unit)
    }

    /// Writes `values` into the buffer of the secondary channel at
    /// `local_index`, from a primary index on. Returns `None` when there is
    /// no such channel.
    pub fn write_secondary(&mut self, local_index: usize, start_index: usize, values: &[f64]) -> Option<usize> {
        let len = self.primary.len();
        let channel = self.secondary.get_mut(local_index)?;
        if channel.amplitudes.is_empty() {
            channel.amplitudes = vec![0.0; len];
        }
        Some(overwrite(&mut channel.amplitudes, start_index, values))
    }

    /// Secondary amplitude in effect at `time`.
    pub fn secondary_value_at(&self, unit: usize, time: f64) -> f64 {
        match (self.channel(unit), self.primary.index_at(time)) {
            (Some(channel), Some(i)) if channel.is_driven() => channel.amplitudes[i],
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulation::pulse_train::{PulseTrainGenerator, PulseTrainParams};

    const DT: f64 = 0.01;

    fn segment(start: f64, stop: f64) -> PulseSegment {
        let params = PulseTrainParams {
            amplitude: -1.5,
            frequency: 130.0,
            pulse_width: 0.06,
            offset: 0.0,
        };
        PulseTrainGenerator::new(DT)
            .unwrap()
            .generate(start, stop, 0.0, &params)
            .unwrap()
    }

    #[test]
    fn test_baseline_layout() {
        let waveform = StimulationWaveform::baseline(100.0, 101.0, DT).unwrap();
        assert_eq!(waveform.len(), 102);
        assert_eq!(waveform.times()[0], 0.0);
        assert!((waveform.times()[1] - 100.0).abs() < 1e-9);
        assert!((waveform.times()[101] - 101.0).abs() < 1e-9);
        assert!(waveform.amplitudes().iter().all(|&a| a == 0.0));
        assert!(waveform.times().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_value_at_is_right_continuous() {
        let waveform =
            StimulationWaveform::from_points(vec![0.0, 1.0, 2.0], vec![5.0, 6.0, 7.0]).unwrap();
        assert_eq!(waveform.value_at(-1.0), 0.0);
        assert_eq!(waveform.value_at(0.0), 5.0);
        assert_eq!(waveform.value_at(0.999), 5.0);
        assert_eq!(waveform.value_at(1.0), 6.0);
        assert_eq!(waveform.value_at(50.0), 7.0);
    }

    #[test]
    fn test_splice_on_exact_time() {
        let mut waveform = StimulationWaveform::baseline(100.0, 200.0, DT).unwrap();
        let seg = segment(150.0, 160.0);
        let report = waveform.splice(&seg);

        assert!(report.exact_match);
        assert_eq!(waveform.times()[report.start_index], seg.times[0]);
        assert_eq!(report.written, seg.len());
        assert_eq!(
            &waveform.amplitudes()[report.start_index..report.start_index + seg.len()],
            seg.signal.as_slice()
        );
        // untouched before and after
        assert_eq!(waveform.amplitudes()[report.start_index - 1], 0.0);
        assert_eq!(waveform.value_at(170.0), 0.0);
        assert_eq!(waveform.value_at(seg.times[0]), -1.5);
    }

    #[test]
    fn test_splice_falls_back_to_index_zero() {
        let mut waveform = StimulationWaveform::baseline(100.0, 200.0, DT).unwrap();
        // 50 ms is before the onset point, so it is not on the buffer grid
        let seg = segment(50.0, 51.0);
        let report = waveform.splice(&seg);

        assert!(!report.exact_match);
        assert_eq!(report.start_index, 0);
        assert_eq!(waveform.amplitudes()[0], -1.5);
        assert_eq!(report.written, seg.len());
    }

    #[test]
    fn test_splice_is_clipped_at_buffer_end() {
        let mut waveform = StimulationWaveform::baseline(100.0, 101.0, DT).unwrap();
        let seg = segment(100.5, 110.0);
        let report = waveform.splice(&seg);
        assert!(report.exact_match);
        assert_eq!(report.start_index + report.written, waveform.len());
    }

    #[test]
    fn test_secondary_channels_share_the_grid() {
        let primary = StimulationWaveform::baseline(100.0, 110.0, DT).unwrap();
        let mut channels = StimulationChannels::new(primary, [3, 7]);
        assert!(!channels.channel(3).unwrap().is_driven());

        let start = channels.primary.find_exact(to_tick(105.0, DT) as f64 * DT).unwrap();
        // unit 7 is the second local channel
        assert_eq!(channels.write_secondary(1, start, &[100.0, 100.0]), Some(2));
        assert_eq!(channels.write_secondary(2, start, &[100.0]), None);
        assert!(channels.channel(7).unwrap().is_driven());

        let t = channels.primary.times()[start];
        assert_eq!(channels.secondary_value_at(7, t), 100.0);
        assert_eq!(channels.secondary_value_at(7, 104.0), 0.0);
        assert_eq!(channels.secondary_value_at(3, t), 0.0);
    }

    #[test]
    fn test_rejects_mismatched_points() {
        assert!(StimulationWaveform::from_points(vec![0.0, 1.0], vec![0.0]).is_err());
        assert!(StimulationWaveform::from_points(vec![1.0, 0.0], vec![0.0, 0.0]).is_err());
    }
}
