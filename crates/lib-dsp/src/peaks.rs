//! Peak picking on traces.

use lib_types::{Seconds, Trace};
use std::collections::BTreeSet;

/// Local maxima above a threshold, thinned to a minimum spacing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Peaks {
    pub times: Vec<Seconds>,
    pub amplitudes: Vec<f64>,
}

impl Peaks {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Find peaks of `trace` higher than `threshold`.
///
/// A sample is a candidate if it is greater than its left neighbor, not
/// smaller than its right neighbor and above `threshold`; samples outside
/// the trace count as lower. Candidates are visited from the highest down
/// (earlier first on ties) and kept if no kept peak lies closer than
/// `min_spacing`. The result is in time order.
pub fn peaks(trace: &Trace, threshold: f64, min_spacing: Seconds) -> Peaks {
    let y = trace.ydata();
    let n = y.len();

    let mut candidates: Vec<usize> = (0..n)
        .filter(|&i| {
            let left_lower = i == 0 || y[i] > y[i - 1];
            let right_lower = i + 1 == n || y[i] >= y[i + 1];
            left_lower && right_lower && y[i] > threshold
        })
        .collect();
    candidates.sort_by(|&a, &b| y[b].total_cmp(&y[a]).then(a.cmp(&b)));

    // times grow with the index, so only the nearest kept neighbours matter
    let mut kept: BTreeSet<usize> = BTreeSet::new();
    for i in candidates {
        let t = trace.time_at(i).0;
        let too_close = |k: &usize| (trace.time_at(*k).0 - t).abs() < min_spacing.0;
        let crowded = kept.range(..i).next_back().is_some_and(too_close)
            || kept.range(i..).next().is_some_and(too_close);
        if !crowded {
            kept.insert(i);
        }
    }

    tracing::debug!("peaks {}: {} above {}", trace.codes(), kept.len(), threshold);

    Peaks {
        times: kept.iter().map(|&i| trace.time_at(i)).collect(),
        amplitudes: kept.iter().map(|&i| y[i]).collect(),
    }
}
