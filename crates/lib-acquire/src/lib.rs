//! Hardware-independent acquisition front-end.
//!
//! [`SampleAssembler`] collects samples as they arrive, estimates the
//! sampling interval and onset from their arrival times and hands completed
//! traces to the listeners registered with it.

pub mod assembler;
pub mod error;
pub mod listener;

pub use assembler::*;
pub use error::*;
pub use listener::*;
