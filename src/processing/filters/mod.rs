pub mod bandpass;

pub trait FilterInstance: Send {
    fn id(&self) -> &str;
    fn process_sample(&mut self, sample: f64) -> f64;
    /// Clears the sample history so the next window starts from rest.
    fn reset(&mut self);

    fn process_window(&mut self, samples: &[f64]) -> Vec<f64> {
        samples.iter().map(|&s| self.process_sample(s)).collect()
    }
}
