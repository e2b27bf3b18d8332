//! Domain error types

use thiserror::Error;

/// Errors that can occur while talking CAT to the radio
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatError {
    /// A value is outside the catalog domain. Never sent to the radio.
    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("No response to {command} after {attempts} attempt(s)")]
    Timeout { command: String, attempts: u32 },

    /// The radio answered with its error response (`?;`).
    #[error("Radio rejected {command}")]
    Rejected { command: String },

    #[error("Malformed data from radio: {0}")]
    Malformed(String),

    #[error("Unsupported command: {0}")]
    Unsupported(String),

    #[error("Serial I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request cancelled before it was sent")]
    Cancelled,

    #[error("Transaction engine is shut down")]
    Disconnected,
}

impl CatError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CatError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for CAT operations
pub type CatResult<T> = Result<T, CatError>;
