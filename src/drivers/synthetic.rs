use std::f64::consts::PI;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::{SignalSource, SignalWindow};
use crate::error::ControlError;
use crate::stop::StopSignal;

const DEFAULT_SEED: u64 = 42;
const BETA_AMP_RANGE: (f64, f64) = (0.5, 5.0);

/// Simulated EEG: 1/f-weighted noise, a 10 Hz alpha rhythm and a 20 Hz beta
/// rhythm whose amplitude follows a hidden random walk.
pub struct SyntheticSource {
    sample_rate_hz: f64,
    n_channels: usize,
    window_samples: usize,
    beta_amplitude: f64,
    elapsed_samples: u64,
    rng: StdRng,
    pacing: Option<StopSignal>,
}

impl SyntheticSource {
    pub fn new(sample_rate_hz: f64, n_channels: usize, window_samples: usize) -> Self {
        Self {
            sample_rate_hz,
            n_channels,
            window_samples,
            beta_amplitude: 2.0,
            elapsed_samples: 0,
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
            pacing: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sleep for one window duration per window, as a live amplifier would.
    pub fn paced(mut self, stop: StopSignal) -> Self {
        self.pacing = Some(stop);
        self
    }

    pub fn beta_amplitude(&self) -> f64 {
        self.beta_amplitude
    }

    fn gaussian(&mut self) -> f64 {
        // Box-Muller
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn generate(&mut self) -> Array2<f64> {
        if self.rng.gen::<f64>() < 0.2 {
            let step = 0.3 * self.gaussian();
            self.beta_amplitude =
                (self.beta_amplitude + step).clamp(BETA_AMP_RANGE.0, BETA_AMP_RANGE.1);
        }
        let fs = self.sample_rate_hz;
        let offset = self.elapsed_samples;
        let mut samples = Array2::zeros((self.n_channels, self.window_samples));
        for ch in 0..self.n_channels {
            for i in 0..self.window_samples {
                let t = (offset + i as u64) as f64 / fs;
                let noise = self.gaussian() / ((i + 1) as f64).sqrt();
                let alpha = 10.0 * (2.0 * PI * 10.0 * (t + ch as f64 * 0.01)).sin();
                let beta = self.beta_amplitude * (2.0 * PI * 20.0 * (t + ch as f64 * 0.02)).sin();
                samples[[ch, i]] = 0.2 * noise + 0.5 * alpha + 0.8 * beta;
            }
        }
        self.elapsed_samples += self.window_samples as u64;
        samples
    }
}

impl SignalSource for SyntheticSource {
    fn next_window(&mut self) -> Result<Option<SignalWindow>, ControlError> {
        let samples = self.generate();
        let window = SignalWindow::new(self.sample_rate_hz, samples)?;
        if let Some(stop) = &self.pacing {
            if !stop.sleep(window.duration()) {
                return Ok(None);
            }
        }
        Ok(Some(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn windows_have_configured_shape() {
        let mut source = SyntheticSource::new(250.0, 8, 250);
        let window = source.next_window().unwrap().unwrap();
        assert!(window.expect_shape(8, 250).is_ok());
        assert!(window.channels().all(|c| c.iter().all(|v| v.is_finite())));
    }
    #[test]
    fn same_seed_same_signal() {
        let mut a = SyntheticSource::new(250.0, 2, 64).with_seed(7);
        let mut b = SyntheticSource::new(250.0, 2, 64).with_seed(7);
        let wa = a.next_window().unwrap().unwrap();
        let wb = b.next_window().unwrap().unwrap();
        assert_eq!(wa.channel(1).to_vec(), wb.channel(1).to_vec());
    }
    #[test]
    fn beta_amplitude_stays_clipped() {
        let mut source = SyntheticSource::new(100.0, 1, 10);
        for _ in 0..500 {
            source.next_window().unwrap();
            let amp = source.beta_amplitude();
            assert!((BETA_AMP_RANGE.0..=BETA_AMP_RANGE.1).contains(&amp));
        }
    }
    #[test]
    fn paced_source_yields_nothing_once_stopped() {
        let stop = StopSignal::new();
        stop.trigger();
        let mut source = SyntheticSource::new(250.0, 1, 250).paced(stop);
        assert!(source.next_window().unwrap().is_none());
    }
}
