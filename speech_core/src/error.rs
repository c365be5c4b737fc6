use std::time::Duration;

use thiserror::Error;

/// Errors raised by the synthesis pipeline
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Invalid synthesis settings: {0}")]
    InvalidSettings(String),

    #[error("Synthesis backend returned {status}: {message}")]
    BackendFailure { status: u16, message: String },

    #[error("Audio stream read timed out after {0:?}")]
    StreamTimeout(Duration),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type TtsResult<T> = Result<T, TtsError>;
