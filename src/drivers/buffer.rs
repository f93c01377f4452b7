use crate::drivers::SignalWindow;
use crate::error::ControlError;

/// Accumulates single multichannel frames until a full window is available.
pub struct WindowAssembler {
    per_channel: Vec<Vec<f64>>, // channel -> samples
    sample_rate_hz: f64,
    window_samples: usize,
}

impl WindowAssembler {
    pub fn new(
        n_channels: usize,
        sample_rate_hz: f64,
        window_samples: usize,
    ) -> Result<Self, ControlError> {
        if !(sample_rate_hz > 0.0) {
            return Err(ControlError::InvalidSampleRate);
        }
        let per_channel = (0..n_channels)
            .map(|_| Vec::with_capacity(window_samples))
            .collect();
        Ok(Self {
            per_channel,
            sample_rate_hz,
            window_samples,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.per_channel.len()
    }

    pub fn len(&self) -> usize {
        self.per_channel.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.window_samples
    }

    /// Appends one sample per channel.
    pub fn push_frame(&mut self, frame: &[f64]) -> Result<(), ControlError> {
        if frame.len() != self.per_channel.len() {
            return Err(ControlError::ChannelMismatch {
                expected: self.per_channel.len(),
                actual: frame.len(),
            });
        }
        for (channel, &sample) in self.per_channel.iter_mut().zip(frame) {
            channel.push(sample);
        }
        Ok(())
    }

    /// Hands out the next window once enough frames arrived. Windows do not
    /// overlap; frames beyond the window stay queued for the next one.
    pub fn take_window(&mut self) -> Result<Option<SignalWindow>, ControlError> {
        if !self.is_full() {
            return Ok(None);
        }
        let window_samples = self.window_samples;
        let channels = self
            .per_channel
            .iter_mut()
            .map(|channel| channel.drain(..window_samples).collect())
            .collect();
        SignalWindow::from_channels(self.sample_rate_hz, channels).map(Some)
    }
}
