//! Error types and handling
//!
//! Common error types used across the recorder. Cancellation is never an
//! error; it is reported through the outcome enums of the recorder and
//! exporter instead.

use crate::media::MediaType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capture device error: {0}")]
    CaptureDevice(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Muxer failed to start: {0}")]
    MuxerStart(String),

    #[error("Failed to append {media_type} sample: {reason}")]
    AppendFailure {
        media_type: MediaType,
        reason: String,
    },

    #[error("No media data: {0}")]
    NoMediaData(String),

    #[error("Export session error: {0}")]
    ExportSession(String),

    #[error("Failed to finish writing: {0}")]
    Finish(String),

    #[error("Cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::Configuration(_) => "CONFIGURATION_ERROR",
            RecorderError::CaptureDevice(_) => "CAPTURE_DEVICE_ERROR",
            RecorderError::AudioDevice(_) => "AUDIO_DEVICE_ERROR",
            RecorderError::MuxerStart(_) => "MUXER_START_ERROR",
            RecorderError::AppendFailure { .. } => "APPEND_FAILURE",
            RecorderError::NoMediaData(_) => "NO_MEDIA_DATA",
            RecorderError::ExportSession(_) => "EXPORT_SESSION_ERROR",
            RecorderError::Finish(_) => "FINISH_ERROR",
            RecorderError::InvalidState { .. } => "INVALID_STATE",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Serializable error report for hosts that forward failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&RecorderError> for ErrorResponse {
    fn from(error: &RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
