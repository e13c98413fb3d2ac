//! Merging of contiguous, gapped and overlapping traces.
//!
//! Traces are sorted by codes and start time. Each trace is compared with
//! the merged trace before it; the grid distance between the last sample of
//! the first and the first sample of the second decides what happens:
//!
//! | distance `d` (samples)       | result                                   |
//! |------------------------------|------------------------------------------|
//! | off-grid by more than 0.05   | kept separate (displaced sampling)       |
//! | `d == 1`                     | concatenated                             |
//! | `1 < d <= maxgap`            | gap of `d - 1` samples filled            |
//! | `d <= 0`, second ends later  | overlap resolved by [`Deoverlap`]        |
//! | `d <= 0`, second ends first  | second absorbed                          |
//! | otherwise                    | kept separate                            |
//!
//! Three or more mutually overlapping traces are merged pairwise, left to
//! right.

use lib_types::Trace;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// How samples of a short gap are synthesized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    /// Straight line between the samples bordering the gap.
    #[default]
    Interpolate,
    Zeros,
}

/// Which samples survive where two traces overlap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deoverlap {
    UseFirst,
    #[default]
    UseSecond,
    /// Cosine crossfade from the first into the second trace.
    CrossfadeCos,
}

/// Options of [`degapper`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DegapConfig {
    /// Longest gap, in samples, that is bridged. 0 never fills a gap.
    #[serde(default = "default_maxgap")]
    pub maxgap: usize,
    /// Longest overlap, in samples, that is merged; unlimited when unset.
    #[serde(default)]
    pub maxlap: Option<usize>,
    #[serde(default)]
    pub fill: GapFill,
    #[serde(default)]
    pub deoverlap: Deoverlap,
}

fn default_maxgap() -> usize {
    5
}

impl Default for DegapConfig {
    fn default() -> Self {
        Self {
            maxgap: default_maxgap(),
            maxlap: None,
            fill: GapFill::default(),
            deoverlap: Deoverlap::default(),
        }
    }
}

/// Largest deviation from the grid, in samples, still counted as aligned.
const GRID_TOLERANCE: f64 = 0.05;

/// Try to merge `b` into `a`. Returns `false` when they must stay separate.
fn merge_into(a: &mut Trace, b: &Trace, config: &DegapConfig) -> bool {
    if a.codes() != b.codes() || !a.same_sampling_rate(b) || a.is_empty() || b.is_empty() {
        return false;
    }

    let deltat = a.deltat().0;
    let dist = (b.tmin().0 - a.tmax().0) / deltat;
    let idist = dist.round() as i64;
    let maxgap = config.maxgap as i64;

    if (dist - idist as f64).abs() > GRID_TOLERANCE && idist <= maxgap {
        tracing::debug!(
            "degapper {}: displaced sampling at {} ({} samples off grid)",
            a.codes(),
            b.tmin().0,
            dist - idist as f64
        );
        return false;
    }

    if idist == 1 {
        a.append(b.ydata());
        return true;
    }

    if idist > 1 && idist <= maxgap {
        let nfill = (idist - 1) as usize;
        let (y0, y1) = (a.ydata()[a.data_len() - 1], b.ydata()[0]);
        let filler: Vec<f64> = match config.fill {
            GapFill::Zeros => vec![0.0; nfill],
            GapFill::Interpolate => (0..nfill)
                .map(|i| y0 + (i + 1) as f64 / idist as f64 * (y1 - y0))
                .collect(),
        };
        tracing::debug!(
            "degapper {}: filling gap of {} samples at {}",
            a.codes(),
            nfill,
            a.tmax().0 + deltat
        );
        a.append(&filler);
        a.append(b.ydata());
        return true;
    }

    if idist <= 0 {
        if let Some(maxlap) = config.maxlap {
            if -idist > maxlap as i64 {
                return false;
            }
        }

        if b.tmax().0 <= a.tmax().0 {
            // b lies within a
            return true;
        }

        let n = (1 - idist) as usize;
        let na = a.data_len();
        match config.deoverlap {
            Deoverlap::UseSecond => {
                a.truncate(na - n);
                a.append(b.ydata());
            }
            Deoverlap::UseFirst => {
                a.append(&b.ydata()[n..]);
            }
            Deoverlap::CrossfadeCos => {
                let yb = b.ydata();
                let ya = a.ydata_mut();
                for i in 0..n {
                    let w = 0.5 - 0.5 * ((i + 1) as f64 / (n + 1) as f64 * PI).cos();
                    let j = na - n + i;
                    ya[j] = ya[j] * (1.0 - w) + yb[i] * w;
                }
                a.append(&yb[n..]);
            }
        }
        return true;
    }

    false
}

/// Merge traces, reporting every finished trace to `on_complete`.
pub fn degapper_with<F>(mut traces: Vec<Trace>, config: &DegapConfig, mut on_complete: F) -> Vec<Trace>
where
    F: FnMut(&Trace),
{
    traces.sort_by(|a, b| a.cmp_full_id(b));

    let mut output = Vec::new();
    let mut current: Option<Trace> = None;
    for tr in traces {
        let merged = match current.as_mut() {
            Some(cur) => merge_into(cur, &tr, config),
            None => false,
        };
        if !merged {
            if let Some(done) = current.replace(tr) {
                on_complete(&done);
                output.push(done);
            }
        }
    }
    if let Some(done) = current {
        on_complete(&done);
        output.push(done);
    }

    output
}

/// Merge traces with equal codes and sampling interval.
pub fn degapper(traces: Vec<Trace>, config: &DegapConfig) -> Vec<Trace> {
    degapper_with(traces, config, |_| {})
}
