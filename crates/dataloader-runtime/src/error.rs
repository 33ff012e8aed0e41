//! Runtime error types

use thiserror::Error;

/// Runtime error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A metric instrument could not be created
    #[error("Invalid instrument name '{name}': {reason}")]
    InvalidInstrument { name: String, reason: String },

    /// Telemetry configuration is unusable
    #[error("Invalid telemetry configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
