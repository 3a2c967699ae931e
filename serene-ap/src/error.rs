//! Error types for serene-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! None of these are fatal to the process: the worst outcome of any of them is
//! an idle session with no audio.

use thiserror::Error;

/// Main error type for serene-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Payload is empty or holds no whole PCM frame
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Payload channel count or sample rate does not match the output configuration
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// No usable audio output device
    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(String),

    /// Rate conversion to the hardware sample rate failed
    #[error("Resampling error: {0}")]
    Resample(String),

    /// Transport encoding (e.g. base64 text) could not be turned into bytes
    #[error("Invalid payload encoding: {0}")]
    Payload(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the player can keep running after this error.
    ///
    /// Decode, format and output errors leave the session idle but usable;
    /// a new `load` may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::UnsupportedFormat(_)
                | Error::OutputUnavailable(_)
                | Error::Resample(_)
                | Error::Payload(_)
        )
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Payload(err.to_string())
    }
}

/// Convenience Result type using serene-ap Error
pub type Result<T> = std::result::Result<T, Error>;
