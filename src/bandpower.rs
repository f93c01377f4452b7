use std::collections::BTreeMap;

use crate::drivers::{SignalWindow, WelchEstimator};

/// A named frequency range `[low_hz, high_hz)`.
#[derive(Clone, Debug, PartialEq)]
pub struct FrequencyBand {
    pub name: String,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    pub fn new(name: impl Into<String>, low_hz: f64, high_hz: f64) -> Self {
        Self {
            name: name.into(),
            low_hz,
            high_hz,
        }
    }
}

/// Per-band power for one window, averaged across channels.
#[derive(Clone, Debug)]
pub struct BandpowerFeatures {
    powers: BTreeMap<String, f64>,
    control_band: String,
    /// Exponentially smoothed power of the control band.
    pub biomarker: f64,
}

impl BandpowerFeatures {
    pub fn power(&self, band: &str) -> Option<f64> {
        self.powers.get(band).copied()
    }

    pub fn powers(&self) -> &BTreeMap<String, f64> {
        &self.powers
    }

    /// Unsmoothed control band power of this window.
    pub fn raw_biomarker(&self) -> f64 {
        self.power(&self.control_band).unwrap_or(0.0)
    }
}

/// Turns signal windows into band powers plus the smoothed control biomarker.
///
/// The previous smoothed value is the only state kept between windows.
pub struct BandpowerEstimator {
    bands: Vec<FrequencyBand>,
    control_band: String,
    smoothing: f64,
    welch: WelchEstimator,
    smoothed: Option<f64>,
}

impl BandpowerEstimator {
    pub fn new(
        bands: Vec<FrequencyBand>,
        control_band: impl Into<String>,
        smoothing: f64,
        segment_len: usize,
        detrend: bool,
    ) -> Self {
        Self {
            bands,
            control_band: control_band.into(),
            smoothing,
            welch: WelchEstimator::new(segment_len, detrend),
            smoothed: None,
        }
    }

    pub fn features(&mut self, window: &SignalWindow) -> BandpowerFeatures {
        let mut totals = vec![0.0; self.bands.len()];
        let n_channels = window.num_channels();
        for channel in window.channels() {
            let samples: Vec<f64> = channel.to_vec();
            let spectrum = self.welch.psd(&samples, window.sample_rate_hz());
            for (total, band) in totals.iter_mut().zip(&self.bands) {
                *total += spectrum.band_power(band.low_hz, band.high_hz);
            }
        }
        let powers: BTreeMap<String, f64> = self
            .bands
            .iter()
            .zip(totals)
            .map(|(band, total)| {
                let mean = if n_channels == 0 {
                    0.0
                } else {
                    total / n_channels as f64
                };
                (band.name.clone(), mean)
            })
            .collect();

        let raw = powers.get(&self.control_band).copied().unwrap_or(0.0);
        let biomarker = ema(self.smoothed, raw, self.smoothing);
        self.smoothed = Some(biomarker);

        BandpowerFeatures {
            powers,
            control_band: self.control_band.clone(),
            biomarker,
        }
    }
}

/// Exponential moving average seeded by the first value.
pub fn ema(previous: Option<f64>, value: f64, alpha: f64) -> f64 {
    match previous {
        None => value,
        Some(prev) => alpha * value + (1.0 - alpha) * prev,
    }
}
