//! Butterworth IIR filters and FFT-domain band-pass.
//!
//! IIR filters are designed as cascaded second-order sections:
//!
//! 1. Poles of the normalized analog Butterworth prototype
//!    `p_k = exp(iπ(2k + n + 1) / 2n)`
//! 2. Frequency pre-warping `ω_c = 2/Δt · tan(π f_c Δt)` so the digital
//!    filter has its -3 dB point exactly at `f_c`
//! 3. Low-pass `s = ω_c p` or high-pass `s = ω_c / p` transformation
//! 4. Bilinear transform `z = (1 + sΔt/2) / (1 - sΔt/2)`
//!
//! Conjugate pole pairs become biquads, the real pole of an odd order
//! becomes a first-order section. Zeros sit at `z = -1` (low-pass) or
//! `z = 1` (high-pass), and every section is normalized to unit gain in the
//! pass band. Sections are run in direct form II transposed.

use crate::error::{DspError, DspResult};
use crate::fft::{rfft_frequencies, with_shared_engine};
use lib_types::{Hertz, Trace};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Pass band of a Butterworth filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

/// Phase behavior of IIR filtering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPhase {
    /// Single forward pass.
    #[default]
    Causal,
    /// Forward and backward pass; doubles the attenuation, no phase shift.
    ZeroPhase,
}

/// One second-order section. `a[0]` is always 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    /// Run the section over `data` in place, starting from rest.
    fn process(&self, data: &mut [f64]) {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let (mut z1, mut z2) = (0.0, 0.0);
        for x in data.iter_mut() {
            let input = *x;
            let y = b0 * input + z1;
            z1 = b1 * input - a1 * y + z2;
            z2 = b2 * input - a2 * y;
            *x = y;
        }
    }

    /// Complex response at normalized angular frequency `w` (radians/sample).
    pub fn response(&self, w: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        (self.b[0] + self.b[1] * z1 + self.b[2] * z2) / (self.a[0] + self.a[1] * z1 + self.a[2] * z2)
    }
}

/// Cascade of second-order sections.
#[derive(Clone, Debug, PartialEq)]
pub struct SosFilter {
    sections: Vec<Biquad>,
}

impl SosFilter {
    /// Design a Butterworth filter of `order` with -3 dB point at `corner`.
    pub fn butterworth(order: usize, corner: Hertz, deltat: f64, kind: FilterKind) -> DspResult<Self> {
        if order == 0 {
            return Err(DspError::InvalidParameter(
                "filter order must be at least 1".into(),
            ));
        }
        let nyquist = 0.5 / deltat;
        if !(corner.0 > 0.0 && corner.0 < nyquist) {
            return Err(DspError::InvalidFrequency {
                frequency: corner.0,
                nyquist,
            });
        }

        let k = 2.0 / deltat;
        let wc = k * (PI * corner.0 * deltat).tan();
        let n = order as f64;

        let analog_pole = |i: usize| {
            let p = Complex64::from_polar(1.0, PI * (2.0 * i as f64 + n + 1.0) / (2.0 * n));
            match kind {
                FilterKind::Lowpass => p * wc,
                FilterKind::Highpass => Complex64::new(wc, 0.0) / p,
            }
        };
        let bilinear = |s: Complex64| (k + s) / (k - s);

        let mut sections = Vec::with_capacity((order + 1) / 2);
        for i in 0..order / 2 {
            let zp = bilinear(analog_pole(i));
            let a = [1.0, -2.0 * zp.re, zp.norm_sqr()];
            let (b, gain) = match kind {
                FilterKind::Lowpass => ([1.0, 2.0, 1.0], (1.0 + a[1] + a[2]) / 4.0),
                FilterKind::Highpass => ([1.0, -2.0, 1.0], (1.0 - a[1] + a[2]) / 4.0),
            };
            sections.push(Biquad {
                b: [b[0] * gain, b[1] * gain, b[2] * gain],
                a,
            });
        }
        if order % 2 == 1 {
            let zr = bilinear(analog_pole(order / 2)).re;
            let section = match kind {
                FilterKind::Lowpass => {
                    let g = (1.0 - zr) / 2.0;
                    Biquad { b: [g, g, 0.0], a: [1.0, -zr, 0.0] }
                }
                FilterKind::Highpass => {
                    let g = (1.0 + zr) / 2.0;
                    Biquad { b: [g, -g, 0.0], a: [1.0, -zr, 0.0] }
                }
            };
            sections.push(section);
        }

        tracing::debug!(
            "Butterworth {:?}: order={}, corner={} Hz, deltat={}, sections={}",
            kind,
            order,
            corner.0,
            deltat,
            sections.len()
        );

        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Magnitude response at `freq` for sampling interval `deltat`.
    pub fn magnitude(&self, freq: f64, deltat: f64) -> f64 {
        let w = 2.0 * PI * freq * deltat;
        self.sections
            .iter()
            .map(|s| s.response(w).norm())
            .product()
    }

    /// Filter `data` in place.
    pub fn apply(&self, data: &mut [f64], phase: FilterPhase) {
        for section in &self.sections {
            section.process(data);
        }
        if phase == FilterPhase::ZeroPhase {
            data.reverse();
            for section in &self.sections {
                section.process(data);
            }
            data.reverse();
        }
    }
}

fn butterworth_trace(
    trace: &mut Trace,
    order: usize,
    corner: Hertz,
    kind: FilterKind,
    phase: FilterPhase,
) -> DspResult<()> {
    let filter = SosFilter::butterworth(order, corner, trace.deltat().0, kind)?;
    trace.demean();
    filter.apply(trace.ydata_mut(), phase);
    Ok(())
}

/// Butterworth low-pass, applied in place after removing the mean.
pub fn lowpass(trace: &mut Trace, order: usize, corner: Hertz, phase: FilterPhase) -> DspResult<()> {
    butterworth_trace(trace, order, corner, FilterKind::Lowpass, phase)
}

/// Butterworth high-pass, applied in place after removing the mean.
pub fn highpass(trace: &mut Trace, order: usize, corner: Hertz, phase: FilterPhase) -> DspResult<()> {
    butterworth_trace(trace, order, corner, FilterKind::Highpass, phase)
}

/// Ideal band-pass: zero every real-FFT bin outside `(low, high)`.
///
/// The DC bin is always removed. The trace keeps its length.
pub fn bandpass_fft(trace: &mut Trace, low: Hertz, high: Hertz) -> DspResult<()> {
    if !(low.0 >= 0.0 && low.0 < high.0) {
        return Err(DspError::InvalidParameter(format!(
            "band-pass corners must satisfy 0 <= low < high, got ({}, {})",
            low.0, high.0
        )));
    }
    let n = trace.data_len();
    if n == 0 {
        return Ok(());
    }

    let freqs = rfft_frequencies(n, trace.deltat().0);
    let filtered = with_shared_engine(|engine| {
        let mut spectrum = engine.rfft(trace.ydata())?;
        for (i, (c, &f)) in spectrum.iter_mut().zip(&freqs).enumerate() {
            if i == 0 || f <= low.0 || f >= high.0 {
                *c = Complex64::new(0.0, 0.0);
            }
        }
        engine.irfft(&spectrum, n)
    })?;
    trace.set_ydata(filtered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::Seconds;

    fn tone(freq: f64, deltat: f64, n: usize) -> Trace {
        let y = (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 * deltat).sin())
            .collect();
        Trace::new(Seconds(0.0), Seconds(deltat), y)
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_corner_is_minus_3db() {
        for order in 1..=6 {
            for kind in [FilterKind::Lowpass, FilterKind::Highpass] {
                let f = SosFilter::butterworth(order, Hertz(2.0), 0.01, kind).unwrap();
                assert_eq!(f.sections().len(), (order + 1) / 2);
                let m = f.magnitude(2.0, 0.01);
                assert!((m - 0.5_f64.sqrt()).abs() < 1e-9, "order {order} {kind:?}: {m}");
            }
        }
    }

    #[test]
    fn test_passband_gain() {
        let lp = SosFilter::butterworth(4, Hertz(5.0), 0.01, FilterKind::Lowpass).unwrap();
        assert!((lp.magnitude(0.0, 0.01) - 1.0).abs() < 1e-12);
        let hp = SosFilter::butterworth(3, Hertz(5.0), 0.01, FilterKind::Highpass).unwrap();
        assert!((hp.magnitude(50.0, 0.01) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_lowpass_attenuates_high_tone() {
        let mut low = tone(0.1, 0.01, 4000);
        lowpass(&mut low, 4, Hertz(1.0), FilterPhase::Causal).unwrap();
        assert!((rms(&low.ydata()[2000..]) - 0.5_f64.sqrt()).abs() < 0.05);

        let mut high = tone(40.0, 0.01, 4000);
        lowpass(&mut high, 4, Hertz(1.0), FilterPhase::Causal).unwrap();
        assert!(rms(&high.ydata()[2000..]) < 1e-3);
    }

    #[test]
    fn test_highpass_removes_offset_and_low_tone() {
        let mut tr = tone(0.05, 0.01, 8000);
        for v in tr.ydata_mut() {
            *v += 3.0;
        }
        highpass(&mut tr, 4, Hertz(2.0), FilterPhase::ZeroPhase).unwrap();
        assert!(rms(&tr.ydata()[2000..6000]) < 1e-3);
    }

    #[test]
    fn test_invalid_corners() {
        let mut tr = tone(1.0, 0.01, 100);
        for corner in [0.0, -1.0, 50.0, 80.0] {
            assert!(matches!(
                lowpass(&mut tr, 4, Hertz(corner), FilterPhase::Causal),
                Err(DspError::InvalidFrequency { .. })
            ));
        }
        assert!(matches!(
            highpass(&mut tr, 0, Hertz(1.0), FilterPhase::Causal),
            Err(DspError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_iir_and_fft_bandpass_agree_mid_band() {
        let base = tone(1.0, 0.01, 4000);

        let mut iir = base.clone();
        highpass(&mut iir, 4, Hertz(0.2), FilterPhase::ZeroPhase).unwrap();
        lowpass(&mut iir, 4, Hertz(5.0), FilterPhase::ZeroPhase).unwrap();

        let mut fft = base.clone();
        bandpass_fft(&mut fft, Hertz(0.2), Hertz(5.0)).unwrap();

        for (i, (a, b)) in iir.ydata()[1000..3000]
            .iter()
            .zip(&fft.ydata()[1000..3000])
            .enumerate()
        {
            assert!((a - b).abs() < 0.02, "sample {}: {} vs {}", i + 1000, a, b);
        }
    }

    #[test]
    fn test_bandpass_fft_rejects_out_of_band() {
        let mut tr = tone(10.0, 0.01, 1000);
        bandpass_fft(&mut tr, Hertz(0.5), Hertz(5.0)).unwrap();
        assert_eq!(tr.data_len(), 1000);
        assert!(tr.ydata().iter().all(|v| v.abs() < 1e-9));

        assert!(bandpass_fft(&mut tr, Hertz(5.0), Hertz(1.0)).is_err());
    }

    #[test]
    fn test_filter_keeps_grid() {
        let mut tr = tone(1.0, 0.01, 500);
        tr.shift(Seconds(12.0));
        lowpass(&mut tr, 2, Hertz(3.0), FilterPhase::ZeroPhase).unwrap();
        assert_eq!(tr.data_len(), 500);
        assert_eq!(tr.tmin(), Seconds(12.0));
    }
}
