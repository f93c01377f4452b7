// src/drivers/mod.rs
// acquisition side of the loop: windows, sources and spectral estimation
pub mod buffer;
pub mod serial;
pub mod source;
pub mod spectrum;
pub mod synthetic;

pub use buffer::WindowAssembler;
pub use serial::{parse_sample_line, SerialSource};
pub use source::{ManualSource, SignalSource, SignalWindow};
pub use spectrum::{PowerSpectrum, WelchEstimator};
pub use synthetic::SyntheticSource;

use log::info;

use crate::config::Config;
use crate::error::ControlError;
use crate::stop::StopSignal;
use crate::types::AcquisitionMode;

/// Opens the acquisition source selected by `cfg.mode`.
///
/// Fails with `AcquisitionUnavailable` if the source cannot be reached.
pub fn open_source(
    cfg: &Config,
    stop: &StopSignal,
) -> Result<Box<dyn SignalSource>, ControlError> {
    let eeg = &cfg.eeg;
    let window_samples = eeg.window_samples();
    match cfg.mode {
        AcquisitionMode::Simulation => {
            info!("[EEG] Simulation mode.");
            Ok(Box::new(
                SyntheticSource::new(eeg.fs, eeg.n_channels, window_samples).paced(stop.clone()),
            ))
        }
        AcquisitionMode::Serial => {
            let serial = cfg.serial.as_ref().ok_or_else(|| {
                ControlError::AcquisitionUnavailable("no serial port configured".into())
            })?;
            Ok(Box::new(SerialSource::open(
                serial,
                eeg.fs,
                eeg.n_channels,
                window_samples,
                stop.clone(),
            )?))
        }
    }
}
