use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

/// One-sided power spectral density of a single channel.
#[derive(Clone, Debug, Default)]
pub struct PowerSpectrum {
    pub frequencies_hz: Vec<f64>,
    pub density: Vec<f64>,
}

impl PowerSpectrum {
    /// Power in `[low_hz, high_hz)` by trapezoidal integration over the bins
    /// that fall inside the band. Empty or degenerate bands integrate to zero.
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        if !(high_hz > low_hz) {
            return 0.0;
        }
        let in_band: Vec<(f64, f64)> = self
            .frequencies_hz
            .iter()
            .zip(&self.density)
            .filter(|(f, _)| **f >= low_hz && **f < high_hz)
            .map(|(f, p)| (*f, *p))
            .collect();
        let power: f64 = in_band
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0) * (pair[0].1 + pair[1].1) * 0.5)
            .sum();
        power.max(0.0)
    }
}

/// Welch PSD estimator: Hann-windowed segments with 50% overlap, averaged.
///
/// Signals shorter than one segment fall back to a single Hann-windowed
/// periodogram of the whole signal.
pub struct WelchEstimator {
    segment_len: usize,
    detrend: bool,
}

impl WelchEstimator {
    pub fn new(segment_len: usize, detrend: bool) -> Self {
        Self {
            segment_len: segment_len.max(1),
            detrend,
        }
    }

    pub fn psd(&self, signal: &[f64], sample_rate_hz: f64) -> PowerSpectrum {
        if signal.is_empty() || !(sample_rate_hz > 0.0) {
            return PowerSpectrum::default();
        }
        let detrended: Vec<f64> = if self.detrend {
            let mean = signal.iter().sum::<f64>() / signal.len() as f64;
            signal.iter().map(|v| v - mean).collect()
        } else {
            signal.to_vec()
        };

        // a window shorter than one segment becomes a single full-length segment
        let nperseg = self.segment_len.min(detrended.len());
        let step = nperseg - nperseg / 2;
        let window = hann(nperseg);
        let scale = sample_rate_hz * window.iter().map(|w| w * w).sum::<f64>();
        if !(scale > 0.0) {
            // a two-sample Hann window is all zeros
            return PowerSpectrum::default();
        }
        let fft = FftPlanner::<f64>::new().plan_fft_forward(nperseg);
        let bins = nperseg / 2 + 1;

        let mut accum = vec![0.0; bins];
        let mut segments = 0usize;
        let mut start = 0usize;
        while start + nperseg <= detrended.len() {
            let mut buffer: Vec<Complex64> = detrended[start..start + nperseg]
                .iter()
                .zip(&window)
                .map(|(v, w)| Complex64::new(v * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            for (acc, c) in accum.iter_mut().zip(&buffer) {
                *acc += c.norm_sqr() / scale;
            }
            segments += 1;
            start += step;
        }
        for acc in &mut accum {
            *acc /= segments as f64;
        }
        PowerSpectrum {
            frequencies_hz: rfft_frequencies(nperseg, sample_rate_hz),
            density: accum,
        }
    }
}

fn rfft_frequencies(n: usize, sample_rate_hz: f64) -> Vec<f64> {
    (0..=n / 2)
        .map(|k| k as f64 * sample_rate_hz / n as f64)
        .collect()
}

/// Symmetric Hann window.
fn hann(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f64, amplitude: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq_hz * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn sine_power_lands_in_its_band() {
        let signal = sine(20.0, 1.0, 250.0, 500);
        let spectrum = WelchEstimator::new(256, true).psd(&signal, 250.0);
        assert_eq!(spectrum.frequencies_hz.len(), 129);
        let beta = spectrum.band_power(13.0, 30.0);
        let alpha = spectrum.band_power(8.0, 13.0);
        assert!(beta > 0.0);
        assert!(beta > 50.0 * alpha, "beta={beta} alpha={alpha}");
    }

    #[test]
    fn short_signal_falls_back_to_one_windowed_segment() {
        let signal = sine(20.0, 1.0, 250.0, 100);
        let spectrum = WelchEstimator::new(256, true).psd(&signal, 250.0);
        assert_eq!(spectrum.frequencies_hz.len(), 51);
        assert!((spectrum.frequencies_hz[1] - 2.5).abs() < 1e-12);
        assert!(spectrum.band_power(13.0, 30.0) > spectrum.band_power(30.0, 60.0));
        // identical to asking for a segment of exactly the signal length
        let exact = WelchEstimator::new(100, true).psd(&signal, 250.0);
        assert_eq!(spectrum.density, exact.density);
    }

    #[test]
    fn short_fallback_is_hann_windowed() {
        // off-bin tone, so windowing visibly changes every bin
        let signal = sine(21.25, 1.0, 250.0, 100);
        let spectrum = WelchEstimator::new(256, false).psd(&signal, 250.0);
        let n = signal.len();
        let w = hann(n);
        let mut buffer: Vec<Complex64> = signal
            .iter()
            .zip(&w)
            .map(|(v, w)| Complex64::new(v * w, 0.0))
            .collect();
        FftPlanner::<f64>::new().plan_fft_forward(n).process(&mut buffer);
        let scale = 250.0 * w.iter().map(|w| w * w).sum::<f64>();
        for (k, p) in spectrum.density.iter().enumerate() {
            assert!((p - buffer[k].norm_sqr() / scale).abs() < 1e-12);
        }
    }

    #[test]
    fn detrend_removes_dc_bin() {
        let signal: Vec<f64> = vec![5.0; 300];
        let with = WelchEstimator::new(128, true).psd(&signal, 100.0);
        let without = WelchEstimator::new(128, false).psd(&signal, 100.0);
        assert!(with.density.iter().all(|p| p.abs() < 1e-18));
        assert!(without.density[0] > 1.0);
    }

    #[test]
    fn empty_and_degenerate_inputs_yield_zero() {
        let estimator = WelchEstimator::new(64, true);
        let empty = estimator.psd(&[], 250.0);
        assert_eq!(empty.band_power(0.0, 100.0), 0.0);
        let spectrum = estimator.psd(&sine(10.0, 1.0, 250.0, 256), 250.0);
        assert_eq!(spectrum.band_power(20.0, 20.0), 0.0);
        assert_eq!(spectrum.band_power(30.0, 13.0), 0.0);
        // a band narrower than one bin holds at most one point
        assert_eq!(spectrum.band_power(10.0, 10.5), 0.0);
    }

    #[test]
    fn hann_window_is_symmetric() {
        let w = hann(5);
        assert!((w[0]).abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!((w[1] - w[3]).abs() < 1e-12);
    }
}
