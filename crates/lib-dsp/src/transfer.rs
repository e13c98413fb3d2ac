//! Frequency-domain restitution with arbitrary transfer functions.

use crate::error::{DspError, DspResult};
use crate::fft::with_shared_engine;
use crate::window::CosTaper;
use lib_types::{Hertz, Seconds, Trace, TraceError};
use num_complex::Complex64;

/// A linear system described by its complex frequency response.
pub trait FrequencyResponse: Send + Sync {
    /// Response at `freq` Hz.
    fn evaluate(&self, freq: f64) -> Complex64;
}

/// Unit response.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl FrequencyResponse for Identity {
    fn evaluate(&self, _freq: f64) -> Complex64 {
        Complex64::new(1.0, 0.0)
    }
}

/// Time integration, `1 / (iω)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Integration;

impl FrequencyResponse for Integration {
    fn evaluate(&self, freq: f64) -> Complex64 {
        Complex64::new(1.0, 0.0) / Complex64::new(0.0, Hertz(freq).angular())
    }
}

/// Time differentiation, `iω`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Differentiation;

impl FrequencyResponse for Differentiation {
    fn evaluate(&self, freq: f64) -> Complex64 {
        Complex64::new(0.0, Hertz(freq).angular())
    }
}

/// Rational response given by zeros and poles in the Laplace domain:
/// `constant * Π(s - z) / Π(s - p)` with `s = iω`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoleZero {
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
    pub constant: Complex64,
}

impl FrequencyResponse for PoleZero {
    fn evaluate(&self, freq: f64) -> Complex64 {
        let s = Complex64::new(0.0, Hertz(freq).angular());
        let num: Complex64 = self.zeros.iter().map(|z| s - z).product();
        let den: Complex64 = self.poles.iter().map(|p| s - p).product();
        self.constant * num / den
    }
}

/// Spectral coefficients: the response on `[f1, f4]`, cosine tapered,
/// zero elsewhere and at DC.
fn tapered_coefs(
    ntrans: usize,
    deltat: f64,
    freqlimits: &CosTaper,
    response: &dyn FrequencyResponse,
) -> Vec<Complex64> {
    let nfreqs = ntrans / 2 + 1;
    let df = 1.0 / (deltat * ntrans as f64);
    let snap = |f: f64| ((f / df).ceil().max(0.0) as usize).min(nfreqs);

    let mut coefs = vec![Complex64::new(0.0, 0.0); nfreqs];
    for (i, c) in coefs.iter_mut().enumerate().take(snap(freqlimits.d)).skip(snap(freqlimits.a)) {
        let f = i as f64 * df;
        let w = freqlimits.weight(f);
        if w > 0.0 {
            *c = response.evaluate(f) * w;
        }
    }
    // no static offset
    coefs[0] = Complex64::new(0.0, 0.0);
    coefs
}

/// Apply `response` to a trace in the frequency domain.
///
/// The trace is demeaned, faded in and out over `tfade` seconds, zero-padded
/// to the next power of two of 1.2 times its length and multiplied by the
/// response within the band given by `freqlimits`. With `cut_off_fading`,
/// the faded parts are removed from the result.
pub fn transfer(
    trace: &Trace,
    tfade: Seconds,
    freqlimits: CosTaper,
    response: &dyn FrequencyResponse,
    cut_off_fading: bool,
) -> DspResult<Trace> {
    let duration = trace.tmax().0 - trace.tmin().0;
    if duration <= 2.0 * tfade.0 {
        return Err(DspError::TraceTooShort {
            duration,
            required: 2.0 * tfade.0,
        });
    }
    if !freqlimits.is_valid() {
        return Err(DspError::InvalidParameter(format!(
            "frequency limits must be ascending, got {freqlimits:?}"
        )));
    }

    let deltat = trace.deltat().0;
    let ndata = trace.data_len();
    let ntrans = ((ndata as f64 * 1.2).ceil() as usize).next_power_of_two();

    let mean = trace.mean();
    let mut faded: Vec<f64> = trace.ydata().iter().map(|y| y - mean).collect();
    let time_taper = CosTaper::new(
        0.0,
        tfade.0,
        deltat * (ndata - 1) as f64 - tfade.0,
        deltat * ndata as f64,
    );
    time_taper.apply(&mut faded, 0.0, deltat);

    let coefs = tapered_coefs(ntrans, deltat, &freqlimits, response);
    let mut restored = with_shared_engine(|engine| {
        let mut spectrum = engine.rfft_padded(&faded, ntrans)?;
        for (s, c) in spectrum.iter_mut().zip(coefs.iter()) {
            *s *= *c;
        }
        engine.irfft(&spectrum, ntrans)
    })?;
    restored.truncate(ndata);

    tracing::debug!(
        "transfer: ndata={}, ntrans={}, tfade={} s, band={:?}",
        ndata,
        ntrans,
        tfade.0,
        freqlimits
    );

    let mut output = trace.clone();
    output.set_ydata(restored);
    if cut_off_fading {
        let (tmin, tmax) = (output.tmin() + tfade, output.tmax() - tfade);
        output.chop(tmin, tmax, false).map_err(|e| match e {
            TraceError::NoData(_) => DspError::TraceTooShort {
                duration,
                required: 2.0 * tfade.0,
            },
            other => other.into(),
        })?;
    }
    Ok(output)
}
