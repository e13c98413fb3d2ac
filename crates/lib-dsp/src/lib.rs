//! # lib-dsp
//!
//! Processing engine for evenly sampled traces.
//!
//! This crate provides the numerical core of the trace kernel:
//!
//! - **FFT/IFFT**: cached rustfft/realfft planners for any transform length
//! - **Convolution**: direct, single-transform and overlap-save with Rayon
//! - **Correlation**: direct and FFT cross-correlation with identical lag grids
//! - **Filtering**: Butterworth sections, FFT band-pass, spectral transfer
//! - **Resampling**: cascaded FIR decimation, batch and streaming
//! - **Degapping**: merging of gapped and overlapping recordings
//! - **Geometry**: component rotation and projection
//! - **Peaks**: thresholded local maxima with minimum spacing

pub mod convolution;
pub mod correlate;
pub mod degap;
pub mod error;
pub mod fft;
pub mod filter;
pub mod geometry;
pub mod moving;
pub mod peaks;
pub mod resample;
pub mod transfer;
pub mod window;

pub use correlate::{correlate, CorrelationMode, Normalization};
pub use degap::{degapper, degapper_with, DegapConfig, Deoverlap, GapFill};
pub use error::{DspError, DspResult};
pub use fft::FftEngine;
pub use filter::{bandpass_fft, highpass, lowpass, FilterPhase, SosFilter};
pub use geometry::{project, project_dependencies, rotate};
pub use moving::{moving_sum, MovingMode};
pub use peaks::{peaks, Peaks};
pub use resample::{
    decimation_sequence, downsample, downsample_to, ContinuousDownsampler, DownsampleConfig,
};
pub use transfer::{transfer, Differentiation, FrequencyResponse, Identity, Integration, PoleZero};
