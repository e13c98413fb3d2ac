//! # lib-types
//!
//! Core type definitions for the trace kernel.
//!
//! This crate provides foundational types used throughout the workspace:
//! - Physical units with compile-time safety
//! - Channel codes identifying a recording stream
//! - The [`Trace`] container for evenly sampled time series
//! - A bounded statistics [`Queue`] used by the acquisition layer

pub mod codes;
pub mod error;
pub mod queue;
pub mod trace;
pub mod units;

pub use codes::*;
pub use error::*;
pub use queue::*;
pub use trace::*;
pub use units::*;
