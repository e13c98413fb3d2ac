//! Run configuration loading and validation.

use anyhow::{Context, Result};
use lib_dsp::{CorrelationMode, DegapConfig, DownsampleConfig, FilterPhase, Normalization};
use lib_types::Codes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level run configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run name, echoed in the summary.
    pub name: String,

    /// Synthetic input traces.
    pub signals: Vec<SignalConfig>,

    /// Processing steps, applied in order.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One synthetic input trace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default)]
    pub codes: Codes,

    /// Time of the first sample in seconds.
    #[serde(default)]
    pub tmin: f64,

    /// Sampling interval in seconds.
    pub deltat: f64,

    /// Number of samples.
    pub nsamples: usize,

    pub shape: SignalShape,

    /// Deliver the signal as several pieces instead of one trace.
    #[serde(default)]
    pub chunks: Option<ChunkConfig>,
}

/// Waveform of a synthetic signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalShape {
    Sine {
        /// Frequency in Hz.
        frequency: f64,
        #[serde(default = "default_amplitude")]
        amplitude: f64,
        /// Phase in degrees.
        #[serde(default)]
        phase: f64,
    },
    GaussianPulse {
        /// Time of the maximum in seconds.
        center: f64,
        /// Standard deviation in seconds.
        width: f64,
        #[serde(default = "default_amplitude")]
        amplitude: f64,
    },
    ImpulseTrain {
        /// Interval between impulses in seconds.
        period: f64,
        /// Time of the first impulse relative to `tmin`.
        #[serde(default)]
        offset: f64,
        #[serde(default = "default_amplitude")]
        amplitude: f64,
    },
}

fn default_amplitude() -> f64 {
    1.0
}

/// Split of a signal into pieces.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Number of pieces.
    pub count: usize,

    /// Samples between consecutive pieces: 0 is contiguous, positive values
    /// leave a gap, negative values repeat samples as overlap.
    #[serde(default)]
    pub spacing: i64,
}

/// Kind of spectral transfer step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Integrate,
    Differentiate,
}

/// One processing step.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepConfig {
    Degap {
        #[serde(default)]
        options: DegapConfig,
    },
    Downsample {
        deltat: f64,
        #[serde(default)]
        options: DownsampleConfig,
    },
    /// Streaming downsampling, fed one trace at a time.
    ContinuousDownsample {
        deltat: f64,
        #[serde(default = "default_true")]
        snap: bool,
    },
    Lowpass {
        order: usize,
        corner: f64,
        #[serde(default)]
        phase: FilterPhase,
    },
    Highpass {
        order: usize,
        corner: f64,
        #[serde(default)]
        phase: FilterPhase,
    },
    BandpassFft {
        low: f64,
        high: f64,
    },
    Transfer {
        kind: TransferKind,
        /// Fade length in seconds.
        tfade: f64,
        /// Corners of the frequency taper in Hz, ascending.
        freqlimits: [f64; 4],
        #[serde(default)]
        cut_off_fading: bool,
    },
    /// Correlate the trace `a` with every trace matching `b`.
    Correlate {
        a: String,
        b: String,
        #[serde(default)]
        mode: CorrelationMode,
        #[serde(default)]
        normalization: Normalization,
        #[serde(default = "default_true")]
        use_fft: bool,
    },
    Rotate {
        /// Azimuth in degrees.
        azimuth: f64,
        in_channels: [String; 2],
        out_channels: [String; 2],
    },
    Project {
        /// Rows map to `out_channels`, columns to `in_channels`.
        matrix: Vec<Vec<f64>>,
        in_channels: Vec<String>,
        out_channels: Vec<String>,
    },
    Peaks {
        threshold: f64,
        /// Minimum distance between peaks in seconds.
        #[serde(default)]
        min_spacing: f64,
    },
}

fn default_true() -> bool {
    true
}

impl StepConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StepConfig::Degap { .. } => "degap",
            StepConfig::Downsample { .. } => "downsample",
            StepConfig::ContinuousDownsample { .. } => "continuous_downsample",
            StepConfig::Lowpass { .. } => "lowpass",
            StepConfig::Highpass { .. } => "highpass",
            StepConfig::BandpassFft { .. } => "bandpass_fft",
            StepConfig::Transfer { .. } => "transfer",
            StepConfig::Correlate { .. } => "correlate",
            StepConfig::Rotate { .. } => "rotate",
            StepConfig::Project { .. } => "project",
            StepConfig::Peaks { .. } => "peaks",
        }
    }
}

/// Load configuration from a file.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: RunConfig = if path.extension().map_or(false, |e| e == "json") {
        serde_json::from_str(&content)
            .with_context(|| "Failed to parse config as JSON")?
    } else {
        toml::from_str(&content)
            .with_context(|| "Failed to parse config as TOML")?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    if config.signals.is_empty() {
        anyhow::bail!("At least one signal is required");
    }

    let mut seen = HashSet::new();
    for signal in &config.signals {
        if !(signal.deltat > 0.0) {
            anyhow::bail!("Signal {}: deltat must be positive, got {}", signal.codes, signal.deltat);
        }
        if signal.nsamples == 0 {
            anyhow::bail!("Signal {}: nsamples must be positive", signal.codes);
        }
        if let Some(chunks) = signal.chunks {
            if chunks.count == 0 || chunks.count > signal.nsamples {
                anyhow::bail!(
                    "Signal {}: cannot split {} samples into {} chunks",
                    signal.codes,
                    signal.nsamples,
                    chunks.count
                );
            }
        }
        match signal.shape {
            SignalShape::GaussianPulse { width, .. } if !(width > 0.0) => {
                anyhow::bail!("Signal {}: pulse width must be positive", signal.codes);
            }
            SignalShape::ImpulseTrain { period, .. } if !(period > 0.0) => {
                anyhow::bail!("Signal {}: impulse period must be positive", signal.codes);
            }
            _ => {}
        }
        if !seen.insert(signal.codes.clone()) {
            anyhow::bail!("Duplicate signal codes: {}", signal.codes);
        }
    }

    for (i, step) in config.steps.iter().enumerate() {
        validate_step(step).with_context(|| format!("Step {} ({})", i + 1, step.name()))?;
    }

    Ok(())
}

fn validate_step(step: &StepConfig) -> Result<()> {
    match step {
        StepConfig::Downsample { deltat, .. } | StepConfig::ContinuousDownsample { deltat, .. } => {
            if !(*deltat > 0.0) {
                anyhow::bail!("Target deltat must be positive, got {}", deltat);
            }
        }
        StepConfig::Lowpass { order, .. } | StepConfig::Highpass { order, .. } => {
            if *order == 0 {
                anyhow::bail!("Filter order must be at least 1");
            }
        }
        StepConfig::BandpassFft { low, high } => {
            if !(low < high) {
                anyhow::bail!("Band limits must be ascending, got {} and {}", low, high);
            }
        }
        StepConfig::Transfer { freqlimits, tfade, .. } => {
            if freqlimits.windows(2).any(|w| w[0] > w[1]) {
                anyhow::bail!("Frequency limits must be ascending, got {:?}", freqlimits);
            }
            if *tfade < 0.0 {
                anyhow::bail!("Fade length must not be negative, got {}", tfade);
            }
        }
        StepConfig::Correlate { a, b, .. } => {
            a.parse::<Codes>().with_context(|| format!("Invalid codes {:?}", a))?;
            b.parse::<Codes>().with_context(|| format!("Invalid codes {:?}", b))?;
        }
        StepConfig::Project { matrix, in_channels, out_channels } => {
            if matrix.len() != out_channels.len()
                || matrix.iter().any(|row| row.len() != in_channels.len())
            {
                anyhow::bail!(
                    "Projection matrix must have {} rows of {} coefficients",
                    out_channels.len(),
                    in_channels.len()
                );
            }
        }
        StepConfig::Degap { .. } | StepConfig::Rotate { .. } | StepConfig::Peaks { .. } => {}
    }
    Ok(())
}
