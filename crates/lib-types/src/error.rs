//! Error types for trace operations.

use thiserror::Error;

/// Errors that can occur when manipulating traces and their helpers.
#[derive(Debug, Error, PartialEq)]
pub enum TraceError {
    /// The operation needs non-trivial content and there is none.
    #[error("No data: {0}")]
    NoData(String),

    /// Sampling intervals or grids can't be reconciled.
    #[error("Incompatible sampling grids: deltat {a} vs {b} ({reason})")]
    IncompatibleGrids { a: f64, b: f64, reason: String },

    /// No integer-aligned overlap between two traces.
    #[error("Insufficient overlap: sample offset {offset} with lengths {len_a} and {len_b}")]
    InsufficientOverlap {
        offset: i64,
        len_a: usize,
        len_b: usize,
    },

    /// Statistics requested from an empty queue.
    #[error("Queue is empty")]
    QueueIsEmpty,

    /// Invalid parameter value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl TraceError {
    /// Create a no-data error.
    pub fn no_data(context: impl Into<String>) -> Self {
        Self::NoData(context.into())
    }

    /// Create an incompatible-grids error.
    pub fn incompatible(a: f64, b: f64, reason: impl Into<String>) -> Self {
        Self::IncompatibleGrids {
            a,
            b,
            reason: reason.into(),
        }
    }
}

/// Result type for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;
