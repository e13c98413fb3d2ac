//! Error types for DSP operations.

use lib_types::TraceError;
use thiserror::Error;

/// Errors that can occur during DSP operations.
#[derive(Debug, Error)]
pub enum DspError {
    /// FFT size cannot be planned.
    #[error("Invalid FFT size: {0}")]
    InvalidFftSize(usize),

    /// Input length mismatch.
    #[error("Input length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Insufficient data for operation.
    #[error("Insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Filter corner outside the open interval (0, Nyquist).
    #[error("Invalid frequency {frequency} Hz: must lie in (0, {nyquist}) Hz")]
    InvalidFrequency { frequency: f64, nyquist: f64 },

    /// A parameter is out of its valid range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Resampling ratio cannot be factored into supported decimation stages.
    #[error("Unavailable decimation: no decimation sequence for ratio {ratio}")]
    UnavailableDecimation { ratio: f64 },

    /// Trace is not long enough for the requested tapering.
    #[error("Trace too short: duration {duration} s must exceed {required} s")]
    TraceTooShort { duration: f64, required: f64 },

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Operation not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Error raised by a trace operation.
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Result type for DSP operations.
pub type DspResult<T> = Result<T, DspError>;
