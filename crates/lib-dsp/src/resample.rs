//! Downsampling of traces, batch and streaming.
//!
//! An integer decimation ratio is split into a cascade of stages with
//! factors of at most 7. Every stage runs a causal 31-tap FIR anti-alias
//! filter (Hamming-windowed sinc, cutoff at `1/q` of Nyquist) and keeps every
//! `q`-th filter output, starting after the filter's group delay of 15
//! samples. The kept output with filter index `m` is stamped with the time of
//! input sample `m - 15`, so decimation does not shift the signal in time.
//!
//! With `snap`, the first kept sample of each stage is chosen so that output
//! times fall (within half an input sample) on integer multiples of the
//! stage's output interval, counted from epoch 0.
//!
//! Batch and streaming decimation share [`DecimationStage`]. A stage run
//! once over a whole trace produces exactly the samples that the same stage
//! produces when fed the trace in consecutive chunks.

use crate::error::{DspError, DspResult};
use crate::window::hamming;
use lib_types::{same_sampling_rate, Codes, Seconds, Trace, TraceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

/// FIR order of a decimation stage; the filter has `FIR_ORDER + 1` taps.
pub const FIR_ORDER: usize = 30;

/// Largest factor handled by a single decimation stage.
pub const MAX_STAGE_FACTOR: usize = 7;

/// Relative tolerance for treating a resampling ratio as integral.
const RATIO_TOLERANCE: f64 = 1e-4;

/// Split `ratio` into decimation factors, each at most [`MAX_STAGE_FACTOR`].
///
/// Factors are returned largest first; their product is `ratio`. A ratio of
/// 1 yields an empty sequence.
pub fn decimation_sequence(ratio: usize) -> DspResult<Vec<usize>> {
    if ratio == 0 {
        return Err(DspError::InvalidParameter(
            "decimation ratio must be at least 1".into(),
        ));
    }

    let mut primes = Vec::new();
    let mut rest = ratio;
    for p in [2, 3, 5, 7] {
        while rest % p == 0 {
            primes.push(p);
            rest /= p;
        }
    }
    if rest != 1 {
        return Err(DspError::UnavailableDecimation {
            ratio: ratio as f64,
        });
    }

    let mut stages: Vec<usize> = Vec::new();
    for p in primes.into_iter().rev() {
        match stages.iter_mut().find(|s| **s * p <= MAX_STAGE_FACTOR) {
            Some(stage) => *stage *= p,
            None => stages.push(p),
        }
    }
    stages.sort_unstable_by(|a, b| b.cmp(a));
    Ok(stages)
}

/// Low-pass FIR for decimation by `q`, normalized to unit DC gain.
pub fn decimation_fir(q: usize) -> Vec<f64> {
    let ntaps = FIR_ORDER + 1;
    let center = FIR_ORDER as f64 / 2.0;
    let cutoff = 1.0 / q as f64;
    let window = hamming(ntaps);

    let mut taps: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(k, w)| {
            let x = cutoff * (k as f64 - center);
            let sinc = if x == 0.0 { 1.0 } else { (PI * x).sin() / (PI * x) };
            cutoff * sinc * w
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t /= sum;
    }
    taps
}

/// Grid phase of a stage: input samples to skip so that output times snap
/// to multiples of `deltat_out`.
fn snap_lag(t0: Seconds, deltat_in: Seconds, deltat_out: Seconds) -> usize {
    let tsnap = (t0.0 / deltat_out.0).ceil() * deltat_out.0;
    ((tsnap - t0.0) / deltat_in.0).round().max(0.0) as usize
}

/// Samples emitted by one call of [`DecimationStage::process`].
#[derive(Clone, Debug, PartialEq)]
pub struct StageOutput {
    /// Time of the first sample; meaningless when `samples` is empty.
    pub tmin: Seconds,
    pub samples: Vec<f64>,
}

/// One FIR-and-decimate stage with persistent filter state.
#[derive(Clone, Debug)]
pub struct DecimationStage {
    q: usize,
    taps: Arc<[f64]>,
    deltat_in: Seconds,
    snap: bool,
    /// Time of the first input sample, set on first data.
    t0: Option<Seconds>,
    /// Input samples with stream index `>= buf_start`.
    buf: Vec<f64>,
    buf_start: usize,
    /// Number of input samples seen.
    n_in: usize,
    /// Filter output index of the next sample to emit.
    next_out: usize,
}

impl DecimationStage {
    pub fn new(q: usize, deltat_in: Seconds, snap: bool) -> Self {
        Self {
            q,
            taps: decimation_fir(q).into(),
            deltat_in,
            snap,
            t0: None,
            buf: Vec::new(),
            buf_start: 0,
            n_in: 0,
            next_out: 0,
        }
    }

    pub fn factor(&self) -> usize {
        self.q
    }

    pub fn deltat_out(&self) -> Seconds {
        self.deltat_in * self.q as f64
    }

    /// Samples received but not yet covered by an emitted output.
    pub fn pending(&self) -> usize {
        self.n_in.saturating_sub(self.next_out.saturating_sub(self.q - 1))
    }

    /// Feed the next input samples, starting at `tmin`, and return every
    /// output sample that became computable.
    ///
    /// `tmin` is only used for the first non-empty call; later chunks are
    /// assumed to continue the stream seamlessly.
    pub fn process(&mut self, tmin: Seconds, input: &[f64]) -> StageOutput {
        let half = FIR_ORDER / 2;
        if self.t0.is_none() && !input.is_empty() {
            let ilag = if self.snap {
                snap_lag(tmin, self.deltat_in, self.deltat_out())
            } else {
                0
            };
            self.t0 = Some(tmin);
            self.next_out = half + ilag;
        }
        let t0 = self.t0.unwrap_or(tmin);

        self.buf.extend_from_slice(input);
        self.n_in += input.len();

        let first_out = self.next_out;
        let mut samples = Vec::new();
        while self.next_out < self.n_in {
            let m = self.next_out;
            let mut acc = 0.0;
            for (k, h) in self.taps.iter().enumerate() {
                // samples before the stream start are zero
                if k > m {
                    break;
                }
                acc += h * self.buf[m - k - self.buf_start];
            }
            samples.push(acc);
            self.next_out += self.q;
        }

        let keep_from = self
            .next_out
            .saturating_sub(FIR_ORDER)
            .min(self.n_in);
        if keep_from > self.buf_start {
            self.buf.drain(..keep_from - self.buf_start);
            self.buf_start = keep_from;
        }

        StageOutput {
            tmin: Seconds(t0.0 + (first_out as f64 - half as f64) * self.deltat_in.0),
            samples,
        }
    }
}

/// Run a cascade of stages over one chunk.
fn run_cascade(stages: &mut [DecimationStage], tmin: Seconds, input: &[f64]) -> StageOutput {
    let mut current = StageOutput {
        tmin,
        samples: input.to_vec(),
    };
    for stage in stages.iter_mut() {
        if current.samples.is_empty() {
            break;
        }
        current = stage.process(current.tmin, &current.samples);
    }
    current
}

fn build_cascade(factors: &[usize], deltat: Seconds, snap: bool) -> Vec<DecimationStage> {
    let mut stages = Vec::with_capacity(factors.len());
    let mut dt = deltat;
    for &q in factors {
        let stage = DecimationStage::new(q, dt, snap);
        dt = stage.deltat_out();
        stages.push(stage);
    }
    stages
}

/// Options of [`downsample_to`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownsampleConfig {
    /// Align output samples to multiples of the new interval.
    #[serde(default = "default_snap")]
    pub snap: bool,
    /// Largest upsampling factor allowed to reach an integer ratio.
    #[serde(default = "default_allow_upsample_max")]
    pub allow_upsample_max: usize,
    /// Subtract the mean before filtering.
    #[serde(default = "default_demean")]
    pub demean: bool,
}

fn default_snap() -> bool {
    true
}

fn default_allow_upsample_max() -> usize {
    1
}

fn default_demean() -> bool {
    true
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self {
            snap: default_snap(),
            allow_upsample_max: default_allow_upsample_max(),
            demean: default_demean(),
        }
    }
}

/// Decimate a trace in place by the integer factor `ndecimate`.
///
/// Fails with [`TraceError::NoData`] when the trace is too short to yield a
/// single output sample; the trace is left untouched in that case.
pub fn downsample(trace: &mut Trace, ndecimate: usize, snap: bool, demean: bool) -> DspResult<()> {
    let factors = decimation_sequence(ndecimate)?;
    if demean {
        trace.demean();
    }
    if factors.is_empty() {
        return Ok(());
    }

    let mut stages = build_cascade(&factors, trace.deltat(), snap);
    let out = run_cascade(&mut stages, trace.tmin(), trace.ydata());
    if out.samples.is_empty() {
        return Err(TraceError::no_data(format!(
            "{} samples are too few to decimate by {}",
            trace.data_len(),
            ndecimate
        ))
        .into());
    }

    tracing::debug!(
        "downsample {}: factors={:?}, {} -> {} samples",
        trace.codes(),
        factors,
        trace.data_len(),
        out.samples.len()
    );

    let new_deltat = trace.deltat() * ndecimate as f64;
    trace.set_ydata_deltat(out.samples, new_deltat);
    trace.set_tmin(out.tmin);
    Ok(())
}

/// Integral decimation ratio from `deltat` to `new_deltat`, if any.
fn integral_ratio(deltat: Seconds, new_deltat: Seconds) -> Option<usize> {
    let ratio = new_deltat.0 / deltat.0;
    let rounded = ratio.round();
    if rounded >= 1.0 && (ratio - rounded).abs() <= rounded * RATIO_TOLERANCE {
        Some(rounded as usize)
    } else {
        None
    }
}

/// Linear interpolation onto a grid `upsratio` times finer.
fn upsample_linear(trace: &mut Trace, upsratio: usize) {
    let y = trace.ydata();
    if y.is_empty() {
        return;
    }
    let mut out = Vec::with_capacity((y.len() - 1) * upsratio + 1);
    for w in y.windows(2) {
        for r in 0..upsratio {
            out.push(w[0] + (w[1] - w[0]) * r as f64 / upsratio as f64);
        }
    }
    out.push(y[y.len() - 1]);
    let deltat = trace.deltat() / upsratio as f64;
    trace.set_ydata_deltat(out, deltat);
}

/// Resample a trace in place to the sampling interval `new_deltat`.
///
/// If the ratio `new_deltat / deltat` is not an integer, the trace is first
/// upsampled by linear interpolation with the smallest factor up to
/// `allow_upsample_max` that makes it one.
pub fn downsample_to(trace: &mut Trace, new_deltat: Seconds, config: &DownsampleConfig) -> DspResult<()> {
    if !(new_deltat.0 > 0.0) {
        return Err(DspError::InvalidParameter(format!(
            "target sampling interval must be positive, got {}",
            new_deltat.0
        )));
    }

    let deltat = trace.deltat();
    if let Some(ratio) = integral_ratio(deltat, new_deltat) {
        return downsample(trace, ratio, config.snap, config.demean);
    }

    let found = (2..=config.allow_upsample_max.max(1))
        .find_map(|u| integral_ratio(deltat / u as f64, new_deltat).map(|r| (u, r)));
    let Some((upsratio, ratio)) = found else {
        return Err(DspError::UnavailableDecimation {
            ratio: new_deltat.0 / deltat.0,
        });
    };

    tracing::debug!(
        "downsample_to {}: upsampling by {} before decimating by {}",
        trace.codes(),
        upsratio,
        ratio
    );
    upsample_linear(trace, upsratio);
    downsample(trace, ratio, config.snap, config.demean)
}

/// Per-channel state of a [`ContinuousDownsampler`].
#[derive(Debug)]
struct Stream {
    deltat: Seconds,
    /// Expected time of the next input sample.
    next_tmin: Seconds,
    stages: Vec<DecimationStage>,
}

impl Stream {
    fn new(deltat: Seconds, tmin: Seconds, new_deltat: Seconds, snap: bool) -> DspResult<Self> {
        let ratio = integral_ratio(deltat, new_deltat).ok_or(DspError::UnavailableDecimation {
            ratio: new_deltat.0 / deltat.0,
        })?;
        let factors = decimation_sequence(ratio)?;
        Ok(Self {
            deltat,
            next_tmin: tmin,
            stages: build_cascade(&factors, deltat, snap),
        })
    }

    fn continues(&self, chunk: &Trace) -> bool {
        same_sampling_rate(self.deltat, chunk.deltat())
            && (chunk.tmin().0 - self.next_tmin.0).abs() <= 0.01 * self.deltat.0
    }

    fn pending(&self) -> usize {
        self.stages.iter().map(DecimationStage::pending).sum()
    }
}

/// Streaming downsampler for many channels.
///
/// Chunks of each channel are decimated as they arrive. Filter history and
/// grid phase persist between calls, so concatenating the emitted traces
/// yields the same samples as decimating the whole record at once (without
/// demeaning). A gap, overlap or change of sampling interval restarts the
/// affected channel.
#[derive(Debug)]
pub struct ContinuousDownsampler {
    new_deltat: Seconds,
    snap: bool,
    streams: HashMap<Codes, Stream>,
}

impl ContinuousDownsampler {
    /// Downsampler to `new_deltat` with output snapped to its grid.
    pub fn new(new_deltat: Seconds) -> Self {
        Self::with_snap(new_deltat, true)
    }

    pub fn with_snap(new_deltat: Seconds, snap: bool) -> Self {
        Self {
            new_deltat,
            snap,
            streams: HashMap::new(),
        }
    }

    pub fn new_deltat(&self) -> Seconds {
        self.new_deltat
    }

    /// Feed one chunk and return the output that became available.
    pub fn advance(&mut self, chunk: &Trace) -> DspResult<Vec<Trace>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        let restart = match self.streams.get(chunk.codes()) {
            Some(stream) if stream.continues(chunk) => false,
            Some(stream) => {
                tracing::info!(
                    "continuous downsampler {}: discontinuity at {} (expected {}), restarting",
                    chunk.codes(),
                    chunk.tmin().0,
                    stream.next_tmin.0
                );
                true
            }
            None => true,
        };
        if restart {
            let stream = Stream::new(chunk.deltat(), chunk.tmin(), self.new_deltat, self.snap)?;
            self.streams.insert(chunk.codes().clone(), stream);
        }

        let Some(stream) = self.streams.get_mut(chunk.codes()) else {
            return Ok(Vec::new());
        };
        let out = run_cascade(&mut stream.stages, chunk.tmin(), chunk.ydata());
        stream.next_tmin = Seconds(chunk.tmin().0 + chunk.data_len() as f64 * stream.deltat.0);

        if out.samples.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![
            Trace::new(out.tmin, self.new_deltat, out.samples).with_codes(chunk.codes().clone())
        ])
    }

    /// Finish all streams.
    ///
    /// Output is emitted as soon as it can be computed, so nothing remains
    /// to flush; residual input too short for another output sample is
    /// discarded.
    pub fn close(self) -> Vec<Trace> {
        for (codes, stream) in &self.streams {
            let pending = stream.pending();
            if pending > 0 {
                tracing::debug!(
                    "continuous downsampler {}: discarding {} pending samples",
                    codes,
                    pending
                );
            }
        }
        Vec::new()
    }
}
