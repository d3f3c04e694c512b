//! Error types for the alert and announcement path.
//!
//! None of these are fatal: the cache and gateway recover from all of them
//! locally and the worst visible outcome is a missing announcement.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    /// Neural backend could not be made ready. Sticky for the process.
    #[error("speech initialization failed: {0}")]
    Initialization(String),

    /// A single synthesis request failed. Retried on the next natural trigger.
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// Prepared audio could not be decoded or played.
    #[error("audio playback failed: {0}")]
    Playback(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SpeechError {
    fn from(e: std::io::Error) -> Self {
        SpeechError::Io(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid block time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpeechError>;
