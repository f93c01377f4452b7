use std::collections::VecDeque;
use std::time::Duration;

use ndarray::{Array2, ArrayView1};

use crate::error::ControlError;

/// One fixed-shape block of multichannel EEG samples.
#[derive(Clone, Debug)]
pub struct SignalWindow {
    sample_rate_hz: f64,
    samples: Array2<f64>, // channels x samples
}

impl SignalWindow {
    pub fn new(sample_rate_hz: f64, samples: Array2<f64>) -> Result<Self, ControlError> {
        if !(sample_rate_hz > 0.0) {
            return Err(ControlError::InvalidSampleRate);
        }
        Ok(Self {
            sample_rate_hz,
            samples,
        })
    }

    /// Builds a window from per-channel sample vectors of equal length.
    pub fn from_channels(
        sample_rate_hz: f64,
        channels: Vec<Vec<f64>>,
    ) -> Result<Self, ControlError> {
        let n_channels = channels.len();
        let n_samples = channels.first().map_or(0, |c| c.len());
        if let Some(bad) = channels.iter().find(|c| c.len() != n_samples) {
            return Err(ControlError::SampleCountMismatch {
                expected: n_samples,
                actual: bad.len(),
            });
        }
        let flat: Vec<f64> = channels.into_iter().flatten().collect();
        let samples = Array2::from_shape_vec((n_channels, n_samples), flat).map_err(|_| {
            ControlError::SampleCountMismatch {
                expected: n_samples,
                actual: 0,
            }
        })?;
        Self::new(sample_rate_hz, samples)
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn num_channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples.ncols()
    }

    pub fn channel(&self, index: usize) -> ArrayView1<'_, f64> {
        self.samples.row(index)
    }

    pub fn channels(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> {
        self.samples.rows().into_iter()
    }

    /// Nominal duration covered by the window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_channel() as f64 / self.sample_rate_hz)
    }

    /// Checks the window against the configured acquisition shape.
    pub fn expect_shape(&self, channels: usize, samples: usize) -> Result<(), ControlError> {
        if self.num_channels() != channels {
            return Err(ControlError::ChannelMismatch {
                expected: channels,
                actual: self.num_channels(),
            });
        }
        if self.samples_per_channel() != samples {
            return Err(ControlError::SampleCountMismatch {
                expected: samples,
                actual: self.samples_per_channel(),
            });
        }
        Ok(())
    }
}

/// Something that yields signal windows on demand.
///
/// `Ok(None)` means the source is exhausted or was asked to stop; errors are
/// unrecoverable acquisition failures.
pub trait SignalSource {
    fn next_window(&mut self) -> Result<Option<SignalWindow>, ControlError>;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn next_window(&mut self) -> Result<Option<SignalWindow>, ControlError> {
        (**self).next_window()
    }
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Result<SignalWindow, ControlError>>,
}

impl ManualSource {
    pub fn new(windows: impl IntoIterator<Item = SignalWindow>) -> Self {
        Self {
            queue: windows.into_iter().map(Ok).collect(),
        }
    }

    /// Queues a failure to be returned after the windows already queued.
    pub fn then_fail(mut self, error: ControlError) -> Self {
        self.queue.push_back(Err(error));
        self
    }
}

impl SignalSource for ManualSource {
    fn next_window(&mut self) -> Result<Option<SignalWindow>, ControlError> {
        self.queue.pop_front().transpose()
    }
}
