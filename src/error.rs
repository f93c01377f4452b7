use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no acquisition source reachable: {0}")]
    AcquisitionUnavailable(String),
    #[error("acquisition failed: {0}")]
    AcquisitionFailed(String),
    #[error("model parameters unavailable: {0}")]
    ModelUnavailable(String),
    #[error("invalid polarity `{0}`; expected `anodal` or `cathodal`")]
    InvalidPolarity(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("sample count mismatch: expected {expected} samples per channel, got {actual}")]
    SampleCountMismatch { expected: usize, actual: usize },
    #[error("actuator error: {0}")]
    Actuator(String),
}

impl From<serde_yaml::Error> for ControlError {
    fn from(value: serde_yaml::Error) -> Self {
        ControlError::InvalidConfiguration(value.to_string())
    }
}
