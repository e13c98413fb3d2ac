//! Rotation and linear projection of multi-component recordings.
//!
//! Components of one sensor share network, station and location codes and
//! differ in channel. Before combining components, they are cut to their
//! common time span; components on different or displaced grids cannot be
//! combined.

use crate::error::{DspError, DspResult};
use lib_types::{Seconds, Trace, TraceError};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Cut `traces` to their common span on a shared grid.
///
/// Returns `Ok(None)` when the traces do not overlap.
fn common_window(traces: &[&Trace]) -> DspResult<Option<Vec<Trace>>> {
    let Some(first) = traces.first() else {
        return Ok(None);
    };
    let deltat = first.deltat();
    for tr in traces.iter().skip(1) {
        if !first.same_sampling_rate(tr) {
            return Err(TraceError::incompatible(
                deltat.0,
                tr.deltat().0,
                format!("cannot combine {} and {}", first.codes(), tr.codes()),
            )
            .into());
        }
    }

    let tmin = traces.iter().map(|t| t.tmin().0).fold(f64::NEG_INFINITY, f64::max);
    let tmax = traces.iter().map(|t| t.tmax().0).fold(f64::INFINITY, f64::min);
    if tmin > tmax {
        return Ok(None);
    }

    let mut chopped = Vec::with_capacity(traces.len());
    for tr in traces {
        match tr.chopped(Seconds(tmin), Seconds(tmax), true) {
            Ok(c) => chopped.push(c),
            Err(TraceError::NoData(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }

    let t0 = chopped[0].tmin().0;
    for c in &chopped[1..] {
        if (c.tmin().0 - t0).abs() > deltat.0 * 0.01 {
            return Err(TraceError::incompatible(
                t0,
                c.tmin().0,
                "displaced sampling",
            )
            .into());
        }
    }

    let n = chopped.iter().map(Trace::data_len).min().unwrap_or(0);
    for c in chopped.iter_mut() {
        if c.data_len() > n {
            let mut y = c.ydata().to_vec();
            y.truncate(n);
            c.set_ydata(y);
        }
    }
    Ok(Some(chopped))
}

/// Rotate horizontal component pairs by `azimuth` degrees.
///
/// For every pair of traces with channels `in_channels` from the same
/// sensor, produces `R = a cos φ + b sin φ` and `T = -a sin φ + b cos φ`
/// over their common span, with channels `out_channels`.
pub fn rotate(
    traces: &[Trace],
    azimuth: f64,
    in_channels: [&str; 2],
    out_channels: [&str; 2],
) -> DspResult<Vec<Trace>> {
    let phi = azimuth.to_radians();
    let (sphi, cphi) = phi.sin_cos();

    let mut rotated = Vec::new();
    for a in traces.iter().filter(|t| t.codes().channel == in_channels[0]) {
        for b in traces
            .iter()
            .filter(|t| t.codes().channel == in_channels[1] && t.codes().nsl() == a.codes().nsl())
        {
            let Some(pair) = common_window(&[a, b])? else {
                tracing::warn!("rotate: {} and {} do not overlap", a.codes(), b.codes());
                continue;
            };
            let (mut r, mut t) = (pair[0].clone(), pair[1].clone());
            let (ya, yb) = (pair[0].ydata(), pair[1].ydata());
            r.set_ydata(ya.iter().zip(yb).map(|(x, y)| x * cphi + y * sphi).collect());
            t.set_ydata(ya.iter().zip(yb).map(|(x, y)| -x * sphi + y * cphi).collect());
            r.set_channel(out_channels[0]);
            t.set_channel(out_channels[1]);
            rotated.push(r);
            rotated.push(t);
        }
    }
    Ok(rotated)
}

fn check_shape(matrix: &Array2<f64>, in_channels: &[&str], out_channels: &[&str]) -> DspResult<()> {
    if matrix.dim() != (out_channels.len(), in_channels.len()) {
        return Err(DspError::InvalidParameter(format!(
            "projection matrix is {:?}, expected ({}, {}) for the given channels",
            matrix.dim(),
            out_channels.len(),
            in_channels.len()
        )));
    }
    Ok(())
}

/// Input channels each output channel depends on.
pub fn project_dependencies(
    matrix: &Array2<f64>,
    in_channels: &[&str],
    out_channels: &[&str],
) -> DspResult<BTreeMap<String, BTreeSet<String>>> {
    check_shape(matrix, in_channels, out_channels)?;
    Ok(out_channels
        .iter()
        .enumerate()
        .map(|(i, out)| {
            let deps = in_channels
                .iter()
                .enumerate()
                .filter(|(j, _)| matrix[[i, *j]] != 0.0)
                .map(|(_, name)| name.to_string())
                .collect();
            (out.to_string(), deps)
        })
        .collect())
}

/// Project the components of one sensor.
fn project_group(
    group: &[&Trace],
    matrix: &Array2<f64>,
    in_channels: &[&str],
    out_channels: &[&str],
) -> DspResult<Vec<Trace>> {
    let mut projected = Vec::new();
    for (i, out) in out_channels.iter().enumerate() {
        let deps: Vec<usize> = (0..in_channels.len())
            .filter(|&j| matrix[[i, j]] != 0.0)
            .collect();
        if deps.is_empty() {
            continue;
        }

        let inputs: Option<Vec<&Trace>> = deps
            .iter()
            .map(|&j| group.iter().copied().find(|t| t.codes().channel == in_channels[j]))
            .collect();
        let Some(inputs) = inputs else {
            tracing::debug!("project: skipping {}, inputs missing", out);
            continue;
        };

        let Some(window) = common_window(&inputs)? else {
            tracing::warn!("project: inputs of {} do not overlap", out);
            continue;
        };

        let n = window[0].data_len();
        let mut y = vec![0.0; n];
        for (&j, tr) in deps.iter().zip(&window) {
            let m = matrix[[i, j]];
            for (acc, v) in y.iter_mut().zip(tr.ydata()) {
                *acc += m * v;
            }
        }

        let mut result = window[0].clone();
        result.set_ydata(y);
        result.set_channel(*out);
        projected.push(result);
    }
    Ok(projected)
}

/// Apply `matrix` to the components of every sensor.
///
/// Rows of `matrix` correspond to `out_channels`, columns to `in_channels`.
/// Each output only needs the inputs with non-zero coefficients; outputs
/// whose inputs are missing are skipped.
pub fn project(
    traces: &[Trace],
    matrix: &Array2<f64>,
    in_channels: &[&str],
    out_channels: &[&str],
) -> DspResult<Vec<Trace>> {
    check_shape(matrix, in_channels, out_channels)?;

    let mut groups: BTreeMap<(&str, &str, &str), Vec<&Trace>> = BTreeMap::new();
    for tr in traces {
        groups.entry(tr.codes().nsl()).or_default().push(tr);
    }
    let groups: Vec<Vec<&Trace>> = groups.into_values().collect();

    let projected: Vec<Vec<Trace>> = groups
        .par_iter()
        .map(|group| project_group(group, matrix, in_channels, out_channels))
        .collect::<DspResult<_>>()?;

    Ok(projected.into_iter().flatten().collect())
}
