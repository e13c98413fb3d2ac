//! Cross-correlation of traces.
//!
//! The correlation of `a` and `b` at lag `k` is
//!
//! ```text
//! c(k) = Σ_n b[n + k] * a[n]
//! ```
//!
//! so a positive lag means `b` is delayed with respect to `a`. The result is
//! returned as a trace whose time axis is the lag time: a peak at `t` means
//! the best alignment is reached when `b` is shifted back by `t` seconds.
//!
//! Both the direct and the FFT implementation compute the full lag range
//! first and then cut the requested window, so they agree to rounding error
//! in every mode and share the result grid.

use crate::convolution::{direct_convolve, fft_convolve};
use crate::error::{DspError, DspResult};
use crate::moving::{moving_sum, MovingMode};
use lib_types::{merge_codes, Seconds, Trace, TraceError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Direct correlations with more multiply-adds than this run lags in parallel.
const PARALLEL_DIRECT_WORK: usize = 1 << 18;

/// Which lags of the correlation are returned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Only lags at which the shorter trace lies completely inside the
    /// longer one: `|la - lb| + 1` values.
    #[default]
    Valid,
    /// `max(la, lb)` values centered on the full range.
    Same,
    /// Every lag with at least one overlapping sample: `la + lb - 1` values.
    Full,
}

/// Scaling applied to the correlation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    /// Divide by the product of the L2 norms of both inputs.
    Normal,
    /// Divide each lag by the norm of the shorter input times the norm of
    /// the part of the longer input it overlaps. `Valid` mode only.
    Gliding,
}

/// Lag range `kmin..=kmax` of the requested mode for input lengths `la`, `lb`.
pub fn lag_range(la: usize, lb: usize, mode: CorrelationMode) -> (i64, i64) {
    let (la, lb) = (la as i64, lb as i64);
    let full_min = -(la - 1);
    let full_max = lb - 1;
    match mode {
        CorrelationMode::Full => (full_min, full_max),
        CorrelationMode::Valid => {
            if la <= lb {
                (0, lb - la)
            } else {
                (lb - la, 0)
            }
        }
        CorrelationMode::Same => {
            let kmin = full_min + (la.min(lb) - 1) / 2;
            (kmin, kmin + la.max(lb) - 1)
        }
    }
}

/// Full-range correlation, index `j` holding lag `j - (la - 1)`.
fn correlate_full(a: &[f64], b: &[f64], use_fft: bool) -> DspResult<Vec<f64>> {
    let a_rev: Vec<f64> = a.iter().rev().copied().collect();
    if use_fft {
        return fft_convolve(b, &a_rev);
    }

    if a.len() * b.len() < PARALLEL_DIRECT_WORK {
        return Ok(direct_convolve(b, &a_rev));
    }

    let la = a.len() as i64;
    let lb = b.len() as i64;
    Ok((-(la - 1)..lb)
        .into_par_iter()
        .map(|k| {
            let nbeg = (-k).max(0);
            let nend = la.min(lb - k);
            (nbeg..nend)
                .map(|n| b[(n + k) as usize] * a[n as usize])
                .sum::<f64>()
        })
        .collect())
}

fn l2_norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Cross-correlate two traces.
///
/// Both traces must share the sampling interval. The result's `tmin` is
/// `b.tmin - a.tmin + kmin * deltat` and its codes are the merged codes of
/// `a` and `b` joined by `~`.
pub fn correlate(
    a: &Trace,
    b: &Trace,
    mode: CorrelationMode,
    normalization: Normalization,
    use_fft: bool,
) -> DspResult<Trace> {
    if !a.same_sampling_rate(b) {
        return Err(TraceError::incompatible(
            a.deltat().0,
            b.deltat().0,
            "correlation needs equal sampling intervals",
        )
        .into());
    }
    if normalization == Normalization::Gliding && mode != CorrelationMode::Valid {
        return Err(DspError::NotSupported(format!(
            "gliding normalization is only available in valid mode, not {mode:?}"
        )));
    }

    let (ya, yb) = (a.ydata(), b.ydata());
    let (la, lb) = (ya.len(), yb.len());
    if la == 0 || lb == 0 {
        return Err(DspError::InsufficientData {
            needed: 1,
            got: la.min(lb),
        });
    }

    let full = correlate_full(ya, yb, use_fft)?;
    let (kmin, kmax) = lag_range(la, lb, mode);
    let offset = (kmin + la as i64 - 1) as usize;
    let mut ydata = full[offset..=(kmax + la as i64 - 1) as usize].to_vec();

    match normalization {
        Normalization::None => {}
        Normalization::Normal => {
            let normfac = l2_norm(ya) * l2_norm(yb);
            for v in ydata.iter_mut() {
                *v /= normfac;
            }
        }
        Normalization::Gliding => {
            let (short, long) = if la <= lb { (ya, yb) } else { (yb, ya) };
            let short_norm = l2_norm(short);
            let energy: Vec<f64> = long.iter().map(|v| v * v).collect();
            let mut normfac: Vec<f64> = moving_sum(&energy, short.len(), MovingMode::Valid)
                .into_iter()
                .map(|e| short_norm * e.max(0.0).sqrt() + short_norm * 1e-5)
                .collect();
            if la > lb {
                normfac.reverse();
            }
            for (v, f) in ydata.iter_mut().zip(normfac.iter()) {
                *v /= f;
            }
        }
    }

    let deltat = a.deltat();
    let tmin = Seconds(b.tmin().0 - a.tmin().0 + kmin as f64 * deltat.0);

    tracing::debug!(
        "correlate: la={}, lb={}, mode={:?}, lags {}..={}, fft={}",
        la,
        lb,
        mode,
        kmin,
        kmax,
        use_fft
    );

    Ok(Trace::new(tmin, deltat, ydata).with_codes(merge_codes(a.codes(), b.codes(), "~")))
}
