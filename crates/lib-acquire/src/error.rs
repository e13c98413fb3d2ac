//! Error types for sample acquisition.

use lib_types::TraceError;
use thiserror::Error;

/// Errors that can occur while assembling traces.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Assembler configuration is unusable.
    #[error("Invalid assembler configuration: {0}")]
    InvalidConfig(String),

    /// Error raised while building a trace.
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Result type for acquisition operations.
pub type AcquireResult<T> = Result<T, AcquireError>;
