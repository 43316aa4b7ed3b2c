//! Error types for softmix
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the softmix engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sample format is not supported by the conversion layer
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    Sink(String),

    /// Output device enumeration or lookup errors
    #[error("Device error: {0}")]
    Device(String),

    /// Passthrough open rejected by the sink
    #[error("Passthrough error: {0}")]
    Passthrough(String),

    /// Sample rate conversion errors
    #[error("Resample error: {0}")]
    Resample(String),

    /// Sound effect loading or playback errors
    #[error("Sound error: {0}")]
    Sound(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using softmix Error
pub type Result<T> = std::result::Result<T, Error>;
