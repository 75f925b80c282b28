//! Error types for soundcheck-core.
//!
//! DSP routines never return these: malformed numeric input saturates to the
//! level floor or an absent pitch instead. Only device and configuration
//! failures are surfaced as errors.

use thiserror::Error;

/// Error type for soundcheck-core operations.
#[derive(Error, Debug)]
pub enum MeterError {
    /// The capture source failed to open or disappeared mid-run.
    /// The stream may be restarted.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Unsupported profile or tunable value. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeterError {
    /// Whether the owner can retry by restarting the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MeterError::DeviceUnavailable(_))
    }
}

impl From<cpal::DevicesError> for MeterError {
    fn from(err: cpal::DevicesError) -> Self {
        MeterError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::DeviceNameError> for MeterError {
    fn from(err: cpal::DeviceNameError) -> Self {
        MeterError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for MeterError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        MeterError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for MeterError {
    fn from(err: cpal::BuildStreamError) -> Self {
        MeterError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for MeterError {
    fn from(err: cpal::PlayStreamError) -> Self {
        MeterError::DeviceUnavailable(err.to_string())
    }
}

/// Result alias for soundcheck-core operations.
pub type Result<T> = std::result::Result<T, MeterError>;
