//! Evenly sampled, time-stamped scalar signals.
//!
//! # Sample Semantics
//!
//! Samples in a `Trace` are **point measurements** on an infinite virtual grid
//! defined by `tmin` and `deltat`:
//!
//! ```text
//! t[k] = tmin + k * deltat,  for k = 0, 1, ..., N-1
//! ```
//!
//! - `ydata[0]` is measured at `tmin`
//! - `tmax()` is the time of the last sample, `tmin + (N-1) * deltat`
//! - every operation that adds or removes samples moves `tmin` by a whole
//!   number of samples, so the grid of the result is a subset or extension
//!   of the original grid
//!
//! `tmax` is derived rather than stored so it can never disagree with the
//! buffer length.

use crate::codes::{Codes, CodesUpdate};
use crate::error::{TraceError, TraceResult};
use crate::units::Seconds;
use serde::{Deserialize, Serialize};

/// Relative tolerance below which two sampling intervals count as equal.
pub const DELTAT_TOLERANCE: f64 = 1e-4;

/// How samples created by [`Trace::extend`] are filled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    /// Pad with zeros.
    #[default]
    Zeros,
    /// Replicate the nearest edge sample.
    Repeat,
}

/// A uniformly-sampled time series belonging to one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    codes: Codes,
    tmin: Seconds,
    deltat: Seconds,
    ydata: Vec<f64>,
}

impl Trace {
    /// Create a trace with empty codes.
    ///
    /// # Panics
    ///
    /// Panics if `deltat` is not positive and finite; use [`Trace::try_new`]
    /// for unchecked input.
    pub fn new(tmin: Seconds, deltat: Seconds, ydata: Vec<f64>) -> Self {
        assert!(
            deltat.0 > 0.0 && deltat.0.is_finite(),
            "deltat must be positive and finite, got {}",
            deltat.0
        );
        Self {
            codes: Codes::default(),
            tmin,
            deltat,
            ydata,
        }
    }

    /// Create a trace, validating the sampling interval.
    pub fn try_new(tmin: Seconds, deltat: Seconds, ydata: Vec<f64>) -> TraceResult<Self> {
        if !(deltat.0 > 0.0) || !deltat.0.is_finite() {
            return Err(TraceError::InvalidParameter(format!(
                "deltat must be positive and finite, got {}",
                deltat.0
            )));
        }
        Ok(Self {
            codes: Codes::default(),
            tmin,
            deltat,
            ydata,
        })
    }

    /// Builder-style codes assignment.
    pub fn with_codes(mut self, codes: Codes) -> Self {
        self.codes = codes;
        self
    }

    #[inline]
    pub fn codes(&self) -> &Codes {
        &self.codes
    }

    pub fn set_codes(&mut self, codes: Codes) {
        self.codes = codes;
    }

    /// Replace any subset of the codes.
    pub fn update_codes(&mut self, update: CodesUpdate) {
        update.apply(&mut self.codes);
    }

    pub fn set_network(&mut self, network: impl Into<String>) {
        self.codes.network = network.into();
    }

    pub fn set_station(&mut self, station: impl Into<String>) {
        self.codes.station = station.into();
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.codes.location = location.into();
    }

    pub fn set_channel(&mut self, channel: impl Into<String>) {
        self.codes.channel = channel.into();
    }

    /// Channel identity without timing.
    #[inline]
    pub fn nslc_id(&self) -> &Codes {
        &self.codes
    }

    /// Identity used for sorting: codes first, then start time.
    pub fn full_id(&self) -> (&Codes, Seconds) {
        (&self.codes, self.tmin)
    }

    /// Order by [`Trace::full_id`].
    pub fn cmp_full_id(&self, other: &Trace) -> std::cmp::Ordering {
        self.codes
            .cmp(&other.codes)
            .then_with(|| self.tmin.0.total_cmp(&other.tmin.0))
    }

    #[inline]
    pub fn tmin(&self) -> Seconds {
        self.tmin
    }

    /// Time of the last sample. Equals `tmin` for an empty trace.
    #[inline]
    pub fn tmax(&self) -> Seconds {
        if self.ydata.is_empty() {
            return self.tmin;
        }
        Seconds(self.tmin.0 + (self.ydata.len() - 1) as f64 * self.deltat.0)
    }

    #[inline]
    pub fn deltat(&self) -> Seconds {
        self.deltat
    }

    #[inline]
    pub fn ydata(&self) -> &[f64] {
        &self.ydata
    }

    #[inline]
    pub fn ydata_mut(&mut self) -> &mut [f64] {
        &mut self.ydata
    }

    /// Replace the samples, keeping `tmin` and `deltat`.
    pub fn set_ydata(&mut self, ydata: Vec<f64>) {
        self.ydata = ydata;
    }

    /// Replace the samples and the sampling interval, keeping `tmin`.
    pub fn set_ydata_deltat(&mut self, ydata: Vec<f64>, deltat: Seconds) {
        self.ydata = ydata;
        self.deltat = deltat;
    }

    pub fn into_ydata(self) -> Vec<f64> {
        self.ydata
    }

    /// Number of samples.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.ydata.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ydata.is_empty()
    }

    /// Time of sample `index`.
    #[inline]
    pub fn time_at(&self, index: usize) -> Seconds {
        Seconds(self.tmin.0 + index as f64 * self.deltat.0)
    }

    /// Sample times.
    pub fn xdata(&self) -> Vec<f64> {
        (0..self.ydata.len())
            .map(|i| self.tmin.0 + i as f64 * self.deltat.0)
            .collect()
    }

    /// Grid index nearest to `t` (may be negative or beyond the end).
    #[inline]
    pub fn index_of(&self, t: Seconds) -> i64 {
        ((t.0 - self.tmin.0) / self.deltat.0).round() as i64
    }

    /// Move the trace in time without touching the samples.
    pub fn shift(&mut self, dt: Seconds) {
        self.tmin = self.tmin + dt;
    }

    /// Replace `tmin`.
    pub fn set_tmin(&mut self, tmin: Seconds) {
        self.tmin = tmin;
    }

    /// Whether `other` shares this trace's sampling interval.
    pub fn same_sampling_rate(&self, other: &Trace) -> bool {
        same_sampling_rate(self.deltat, other.deltat)
    }

    /// Arithmetic mean of the samples (0 for an empty trace).
    pub fn mean(&self) -> f64 {
        if self.ydata.is_empty() {
            return 0.0;
        }
        self.ydata.iter().sum::<f64>() / self.ydata.len() as f64
    }

    /// Subtract the mean from every sample.
    pub fn demean(&mut self) {
        let mean = self.mean();
        for v in self.ydata.iter_mut() {
            *v -= mean;
        }
    }

    /// Time and value of the largest sample, or `None` for an empty trace.
    ///
    /// Ties resolve to the earliest sample.
    pub fn max(&self) -> Option<(Seconds, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &v) in self.ydata.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, v)| (self.time_at(i), v))
    }

    /// Grow the trace outward to cover `[tmin, tmax]`.
    ///
    /// The number of new samples on each side is the number of whole
    /// sampling intervals that fit between the old and the requested bound,
    /// so the result never reaches beyond the requested span. Bounds inside
    /// the current span are ignored; the trace never shrinks.
    pub fn extend(&mut self, tmin: Seconds, tmax: Seconds, fill: FillMethod) {
        let nl = ((self.tmin.0 - tmin.0) / self.deltat.0).floor().max(0.0) as usize;
        let nh = ((tmax.0 - self.tmax().0) / self.deltat.0).floor().max(0.0) as usize;
        if nl == 0 && nh == 0 {
            return;
        }

        let n_old = self.ydata.len();
        let mut data = vec![0.0; nl + n_old + nh];
        data[nl..nl + n_old].copy_from_slice(&self.ydata);

        if fill == FillMethod::Repeat && n_old >= 1 {
            let first = self.ydata[0];
            let last = self.ydata[n_old - 1];
            data[..nl].fill(first);
            data[nl + n_old..].fill(last);
        }

        self.tmin = Seconds(self.tmin.0 - nl as f64 * self.deltat.0);
        self.ydata = data;
    }

    /// Append samples at the end. Amortized O(1) per sample.
    pub fn append(&mut self, samples: &[f64]) {
        self.ydata.extend_from_slice(samples);
    }

    /// Shorten the trace to its first `len` samples, keeping `tmin`.
    ///
    /// Has no effect when `len` is not smaller than the current length.
    pub fn truncate(&mut self, len: usize) {
        self.ydata.truncate(len);
    }

    /// Remove leading and trailing zero samples.
    ///
    /// Fails with [`TraceError::NoData`] when every sample is zero.
    pub fn crop_zeros(&mut self) -> TraceResult<()> {
        let ibeg = self
            .ydata
            .iter()
            .position(|&v| v != 0.0)
            .ok_or_else(|| TraceError::no_data("all samples are zero"))?;
        // position succeeded, so rposition finds at least the same sample
        let iend = self
            .ydata
            .iter()
            .rposition(|&v| v != 0.0)
            .map_or(ibeg + 1, |i| i + 1);

        if ibeg == 0 && iend == self.ydata.len() {
            return Ok(());
        }

        self.ydata = self.ydata[ibeg..iend].to_vec();
        self.tmin = Seconds(self.tmin.0 + ibeg as f64 * self.deltat.0);
        Ok(())
    }

    /// Sample index range `[ibeg, iend)` selected by a time window.
    fn chop_range(&self, tmin: Seconds, tmax: Seconds, include_last: bool) -> TraceResult<(usize, usize)> {
        if self.ydata.is_empty()
            || tmax.0 <= self.tmin.0 - self.deltat.0
            || self.tmax().0 + self.deltat.0 < tmin.0
        {
            return Err(TraceError::no_data(format!(
                "window [{}, {}] outside trace [{}, {}]",
                tmin.0,
                tmax.0,
                self.tmin.0,
                self.tmax().0
            )));
        }

        let ibeg = self.index_of(tmin).max(0);
        let iplus = i64::from(include_last);
        let iend = (self.index_of(tmax) + iplus).min(self.ydata.len() as i64);

        if ibeg >= iend {
            return Err(TraceError::no_data(format!(
                "window [{}, {}] selects no samples",
                tmin.0, tmax.0
            )));
        }
        Ok((ibeg as usize, iend as usize))
    }

    /// Crop in place to the samples within `[tmin, tmax)`, or `[tmin, tmax]`
    /// with `include_last`. Window bounds snap to the nearest sample.
    pub fn chop(&mut self, tmin: Seconds, tmax: Seconds, include_last: bool) -> TraceResult<()> {
        let (ibeg, iend) = self.chop_range(tmin, tmax, include_last)?;
        if ibeg == 0 && iend == self.ydata.len() {
            return Ok(());
        }
        self.ydata = self.ydata[ibeg..iend].to_vec();
        self.tmin = Seconds(self.tmin.0 + ibeg as f64 * self.deltat.0);
        Ok(())
    }

    /// Cropped copy, see [`Trace::chop`].
    pub fn chopped(&self, tmin: Seconds, tmax: Seconds, include_last: bool) -> TraceResult<Trace> {
        let (ibeg, iend) = self.chop_range(tmin, tmax, include_last)?;
        Ok(Trace {
            codes: self.codes.clone(),
            tmin: Seconds(self.tmin.0 + ibeg as f64 * self.deltat.0),
            deltat: self.deltat,
            ydata: self.ydata[ibeg..iend].to_vec(),
        })
    }

    /// Interpolate the trace value at time `t`; zero outside the trace.
    pub fn value_at(&self, t: Seconds) -> f64 {
        let n = self.ydata.len();
        if n == 0 {
            return 0.0;
        }
        let offset = (t.0 - self.tmin.0) / self.deltat.0;
        if offset < 0.0 || offset > (n - 1) as f64 {
            return 0.0;
        }

        let idx = offset.floor() as usize;
        if idx >= n - 1 {
            return self.ydata[n - 1];
        }
        let frac = offset - idx as f64;
        self.ydata[idx] * (1.0 - frac) + self.ydata[idx + 1] * frac
    }

    /// Add `other` into this trace.
    ///
    /// With `interpolate`, `other` is linearly interpolated onto this trace's
    /// grid and contributes zero outside its own span; this trace must not
    /// be more coarsely sampled than `other`.
    ///
    /// Without `interpolate`, both traces must share `deltat`; `other` is
    /// placed at the nearest whole-sample offset and the overlapping samples
    /// are summed. Fails with [`TraceError::InsufficientOverlap`] when no
    /// sample overlaps.
    pub fn add(&mut self, other: &Trace, interpolate: bool) -> TraceResult<()> {
        if interpolate {
            if self.deltat.0 > other.deltat.0 && !self.same_sampling_rate(other) {
                return Err(TraceError::incompatible(
                    self.deltat.0,
                    other.deltat.0,
                    "interpolated addition needs the receiving trace to be sampled at least as finely",
                ));
            }
            let tmin = self.tmin;
            let deltat = self.deltat;
            for (i, v) in self.ydata.iter_mut().enumerate() {
                *v += other.value_at(Seconds(tmin.0 + i as f64 * deltat.0));
            }
            return Ok(());
        }

        if !self.same_sampling_rate(other) {
            return Err(TraceError::incompatible(
                self.deltat.0,
                other.deltat.0,
                "addition without interpolation needs equal sampling intervals",
            ));
        }

        let ioff = self.index_of(other.tmin);
        let ibeg = ioff.max(0);
        let iend = (ioff + other.data_len() as i64).min(self.data_len() as i64);
        if ibeg >= iend {
            return Err(TraceError::InsufficientOverlap {
                offset: ioff,
                len_a: self.data_len(),
                len_b: other.data_len(),
            });
        }

        let (ibeg, iend) = (ibeg as usize, iend as usize);
        let obeg = (ibeg as i64 - ioff) as usize;
        for (v, o) in self.ydata[ibeg..iend].iter_mut().zip(&other.ydata[obeg..]) {
            *v += o;
        }
        Ok(())
    }
}

/// Whether two sampling intervals are equal within [`DELTAT_TOLERANCE`].
#[inline]
pub fn same_sampling_rate(a: Seconds, b: Seconds) -> bool {
    (a.0 - b.0).abs() <= a.0.abs().max(b.0.abs()) * DELTAT_TOLERANCE
}
