//! Run orchestration: synthetic inputs through the configured steps.

use crate::config::{RunConfig, SignalConfig, SignalShape, StepConfig, TransferKind};
use anyhow::{Context, Result};
use lib_dsp::window::CosTaper;
use lib_dsp::{
    bandpass_fft, correlate, degapper, downsample_to, highpass, lowpass, peaks, project, rotate,
    transfer, ContinuousDownsampler, Differentiation, FrequencyResponse, Integration,
};
use lib_types::{Codes, Hertz, Seconds, Trace};
use ndarray::Array2;
use serde::Serialize;
use std::f64::consts::PI;

/// Run orchestrator.
pub struct Orchestrator {
    config: RunConfig,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Synthesize the inputs and run every step.
    pub fn run(&self) -> Result<RunResults> {
        tracing::info!("Starting run: {}", self.config.name);

        let mut traces = Vec::new();
        for signal in &self.config.signals {
            traces.extend(synthesize(signal)?);
        }
        tracing::debug!("Synthesized {} input traces", traces.len());

        let mut results = RunResults {
            name: self.config.name.clone(),
            ..RunResults::default()
        };

        for (i, step) in self.config.steps.iter().enumerate() {
            let traces_in = traces.len();
            traces = self
                .apply_step(step, traces, &mut results)
                .with_context(|| format!("Step {} ({}) failed", i + 1, step.name()))?;
            tracing::info!("{}: {} -> {} traces", step.name(), traces_in, traces.len());
            results.steps.push(StepReport {
                step: step.name(),
                traces_in,
                traces_out: traces.len(),
            });
        }

        results.traces = traces.iter().map(TraceSummary::from).collect();
        tracing::info!("Run complete");
        Ok(results)
    }

    fn apply_step(
        &self,
        step: &StepConfig,
        mut traces: Vec<Trace>,
        results: &mut RunResults,
    ) -> Result<Vec<Trace>> {
        match step {
            StepConfig::Degap { options } => Ok(degapper(traces, options)),

            StepConfig::Downsample { deltat, options } => {
                for tr in traces.iter_mut() {
                    downsample_to(tr, Seconds(*deltat), options)
                        .with_context(|| format!("Cannot downsample {}", tr.codes()))?;
                }
                Ok(traces)
            }

            StepConfig::ContinuousDownsample { deltat, snap } => {
                traces.sort_by(|a, b| a.cmp_full_id(b));
                let mut downsampler = ContinuousDownsampler::with_snap(Seconds(*deltat), *snap);
                let mut out = Vec::new();
                for tr in &traces {
                    out.extend(downsampler.advance(tr)?);
                }
                out.extend(downsampler.close());
                Ok(out)
            }

            StepConfig::Lowpass { order, corner, phase } => {
                for tr in traces.iter_mut() {
                    lowpass(tr, *order, Hertz(*corner), *phase)?;
                }
                Ok(traces)
            }

            StepConfig::Highpass { order, corner, phase } => {
                for tr in traces.iter_mut() {
                    highpass(tr, *order, Hertz(*corner), *phase)?;
                }
                Ok(traces)
            }

            StepConfig::BandpassFft { low, high } => {
                for tr in traces.iter_mut() {
                    bandpass_fft(tr, Hertz(*low), Hertz(*high))?;
                }
                Ok(traces)
            }

            StepConfig::Transfer { kind, tfade, freqlimits, cut_off_fading } => {
                let response: Box<dyn FrequencyResponse> = match kind {
                    TransferKind::Integrate => Box::new(Integration),
                    TransferKind::Differentiate => Box::new(Differentiation),
                };
                let [a, b, c, d] = *freqlimits;
                let taper = CosTaper::new(a, b, c, d);
                traces
                    .iter()
                    .map(|tr| {
                        transfer(tr, Seconds(*tfade), taper, response.as_ref(), *cut_off_fading)
                            .with_context(|| format!("Transfer of {} failed", tr.codes()))
                    })
                    .collect()
            }

            StepConfig::Correlate { a, b, mode, normalization, use_fft } => {
                let a_codes: Codes = a.parse()?;
                let b_codes: Codes = b.parse()?;
                let Some(template) = traces.iter().find(|t| t.codes() == &a_codes) else {
                    tracing::warn!("correlate: no trace {}", a_codes);
                    return Ok(traces);
                };

                let mut correlations = Vec::new();
                for other in traces.iter().filter(|t| t.codes() == &b_codes) {
                    let c = correlate(template, other, *mode, *normalization, *use_fft)?;
                    if let Some((lag, value)) = c.max() {
                        results.correlations.push(CorrelationReport {
                            a: template.codes().to_string(),
                            b: other.codes().to_string(),
                            lag: lag.0,
                            value,
                        });
                    }
                    correlations.push(c);
                }
                traces.extend(correlations);
                Ok(traces)
            }

            StepConfig::Rotate { azimuth, in_channels, out_channels } => {
                let rotated = rotate(
                    &traces,
                    *azimuth,
                    [in_channels[0].as_str(), in_channels[1].as_str()],
                    [out_channels[0].as_str(), out_channels[1].as_str()],
                )?;
                traces.extend(rotated);
                Ok(traces)
            }

            StepConfig::Project { matrix, in_channels, out_channels } => {
                let flat: Vec<f64> = matrix.iter().flatten().copied().collect();
                let matrix = Array2::from_shape_vec((out_channels.len(), in_channels.len()), flat)
                    .context("Malformed projection matrix")?;
                let ins: Vec<&str> = in_channels.iter().map(String::as_str).collect();
                let outs: Vec<&str> = out_channels.iter().map(String::as_str).collect();
                let projected = project(&traces, &matrix, &ins, &outs)?;
                traces.extend(projected);
                Ok(traces)
            }

            StepConfig::Peaks { threshold, min_spacing } => {
                for tr in &traces {
                    let p = peaks(tr, *threshold, Seconds(*min_spacing));
                    results.peaks.push(PeakReport {
                        codes: tr.codes().to_string(),
                        times: p.times.iter().map(|t| t.0).collect(),
                        amplitudes: p.amplitudes,
                    });
                }
                Ok(traces)
            }
        }
    }
}

fn sample_value(shape: &SignalShape, k: i64, tmin: f64, deltat: f64) -> f64 {
    let t = tmin + k as f64 * deltat;
    match *shape {
        SignalShape::Sine { frequency, amplitude, phase } => {
            amplitude * (2.0 * PI * frequency * t + phase.to_radians()).sin()
        }
        SignalShape::GaussianPulse { center, width, amplitude } => {
            amplitude * (-0.5 * ((t - center) / width).powi(2)).exp()
        }
        SignalShape::ImpulseTrain { period, offset, amplitude } => {
            let x = (k as f64 * deltat - offset) / period;
            let nearest = x.round();
            if nearest >= 0.0 && ((x - nearest) * period).abs() < 0.5 * deltat {
                amplitude
            } else {
                0.0
            }
        }
    }
}

/// Build the traces of one synthetic signal.
///
/// Pieces of a chunked signal are displaced by `spacing` samples each and
/// sampled from the same underlying waveform, so overlaps repeat identical
/// values and gaps leave samples out.
pub fn synthesize(signal: &SignalConfig) -> Result<Vec<Trace>> {
    let n = signal.nsamples;
    let (count, spacing) = signal
        .chunks
        .map_or((1, 0), |c| (c.count.max(1), c.spacing));

    let mut pieces = Vec::with_capacity(count);
    for j in 0..count {
        let start = (j * n / count) as i64 + j as i64 * spacing;
        let end = ((j + 1) * n / count) as i64 + j as i64 * spacing;
        let ydata = (start..end)
            .map(|k| sample_value(&signal.shape, k, signal.tmin, signal.deltat))
            .collect();
        let tr = Trace::try_new(
            Seconds(signal.tmin + start as f64 * signal.deltat),
            Seconds(signal.deltat),
            ydata,
        )?
        .with_codes(signal.codes.clone());
        pieces.push(tr);
    }
    Ok(pieces)
}

/// Outcome of one step.
#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: &'static str,
    pub traces_in: usize,
    pub traces_out: usize,
}

/// Extent and extremes of one trace.
#[derive(Debug, Serialize)]
pub struct TraceSummary {
    pub codes: String,
    pub tmin: f64,
    pub tmax: f64,
    pub deltat: f64,
    pub nsamples: usize,
    pub mean: f64,
    pub max_time: Option<f64>,
    pub max_value: Option<f64>,
}

impl From<&Trace> for TraceSummary {
    fn from(tr: &Trace) -> Self {
        let max = tr.max();
        Self {
            codes: tr.codes().to_string(),
            tmin: tr.tmin().0,
            tmax: tr.tmax().0,
            deltat: tr.deltat().0,
            nsamples: tr.data_len(),
            mean: tr.mean(),
            max_time: max.map(|(t, _)| t.0),
            max_value: max.map(|(_, v)| v),
        }
    }
}

/// Best lag of one correlation.
#[derive(Debug, Serialize)]
pub struct CorrelationReport {
    pub a: String,
    pub b: String,
    pub lag: f64,
    pub value: f64,
}

/// Picked peaks of one trace.
#[derive(Debug, Serialize)]
pub struct PeakReport {
    pub codes: String,
    pub times: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

/// Run results.
#[derive(Debug, Default, Serialize)]
pub struct RunResults {
    pub name: String,
    pub steps: Vec<StepReport>,
    pub traces: Vec<TraceSummary>,
    pub correlations: Vec<CorrelationReport>,
    pub peaks: Vec<PeakReport>,
}
