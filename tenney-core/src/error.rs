//! # Error Types
//!
//! Construction-time and capture-time failures. Per-hop analysis never
//! fails; it simply produces no estimate for that hop.

use thiserror::Error;

/// Rejected pipeline configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),
    #[error("root frequency must be a positive finite number, got {0}")]
    InvalidRootHz(f64),
    #[error("prime limit must be at least 1, got {0}")]
    InvalidPrimeLimit(u32),
}

/// Failures while opening the microphone stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio input device available")]
    NoInputDevice,
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Backend messages that indicate the OS refused microphone access.
const DENIAL_MARKERS: [&str; 4] = ["permission", "denied", "not authorized", "access"];

impl CaptureError {
    /// Classifies a backend-specific failure: OS access refusals become
    /// [`CaptureError::PermissionDenied`], anything else `fallback`.
    fn from_backend(err: cpal::BackendSpecificError, fallback: fn(String) -> Self) -> Self {
        let lowered = err.description.to_lowercase();
        if DENIAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            CaptureError::PermissionDenied(err.description)
        } else {
            fallback(err.description)
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                CaptureError::from_backend(err, CaptureError::Device)
            }
            other => CaptureError::Device(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::Device(err.to_string()),
            cpal::BuildStreamError::BackendSpecific { err } => {
                CaptureError::from_backend(err, CaptureError::Stream)
            }
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => CaptureError::Device(err.to_string()),
            cpal::PlayStreamError::BackendSpecific { err } => {
                CaptureError::from_backend(err, CaptureError::Stream)
            }
        }
    }
}

impl From<cpal::PauseStreamError> for CaptureError {
    fn from(err: cpal::PauseStreamError) -> Self {
        CaptureError::Stream(err.to_string())
    }
}
