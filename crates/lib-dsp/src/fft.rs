//! Spectral transforms shared by convolution, band-pass and transfer.
//!
//! All real transforms go through [`FftEngine`], which owns the rustfft and
//! realfft planners so repeated lengths reuse their plans. The processing
//! functions borrow a per-thread engine through [`with_shared_engine`], so
//! plans outlive a single call. Inverse transforms are normalized, so
//! `irfft(rfft(x)) == x`.

use crate::error::{DspError, DspResult};
use num_complex::Complex64;
use realfft::RealFftPlanner;
use rustfft::{Fft, FftPlanner};
use std::cell::RefCell;
use std::sync::Arc;

/// Forward and inverse complex plans of one length.
pub struct ComplexPlans {
    pub forward: Arc<dyn Fft<f64>>,
    pub inverse: Arc<dyn Fft<f64>>,
}

/// Cached FFT planners.
pub struct FftEngine {
    complex_planner: FftPlanner<f64>,
    real_planner: RealFftPlanner<f64>,
}

impl FftEngine {
    pub fn new() -> Self {
        Self {
            complex_planner: FftPlanner::new(),
            real_planner: RealFftPlanner::new(),
        }
    }

    /// Spectrum of `data`, zero-padded to `len` samples.
    ///
    /// Returns the `len / 2 + 1` non-negative frequency bins. Fails when
    /// `len` is zero or shorter than `data`.
    pub fn rfft_padded(&mut self, data: &[f64], len: usize) -> DspResult<Vec<Complex64>> {
        if len == 0 || len < data.len() {
            return Err(DspError::InvalidFftSize(len));
        }

        let r2c = self.real_planner.plan_fft_forward(len);
        let mut input = r2c.make_input_vec();
        input[..data.len()].copy_from_slice(data);
        let mut output = r2c.make_output_vec();

        r2c.process(&mut input, &mut output)
            .map_err(|e| DspError::NumericalInstability(e.to_string()))?;
        Ok(output)
    }

    /// Spectrum of `data` at its own length.
    pub fn rfft(&mut self, data: &[f64]) -> DspResult<Vec<Complex64>> {
        self.rfft_padded(data, data.len())
    }

    /// Inverse of [`FftEngine::rfft`], normalized by `1/len`.
    ///
    /// The imaginary parts of the DC bin (and of the Nyquist bin for even
    /// `len`) are ignored.
    pub fn irfft(&mut self, spectrum: &[Complex64], len: usize) -> DspResult<Vec<f64>> {
        if len == 0 {
            return Err(DspError::InvalidFftSize(len));
        }
        let nbins = len / 2 + 1;
        if spectrum.len() != nbins {
            return Err(DspError::LengthMismatch {
                expected: nbins,
                actual: spectrum.len(),
            });
        }

        let c2r = self.real_planner.plan_fft_inverse(len);
        let mut input = spectrum.to_vec();
        input[0].im = 0.0;
        if len % 2 == 0 {
            input[nbins - 1].im = 0.0;
        }
        let mut output = c2r.make_output_vec();

        c2r.process(&mut input, &mut output)
            .map_err(|e| DspError::NumericalInstability(e.to_string()))?;

        let scale = 1.0 / len as f64;
        for x in output.iter_mut() {
            *x *= scale;
        }
        Ok(output)
    }

    /// Complex plans for block-wise processing; the inverse is unnormalized.
    pub fn complex_plans(&mut self, len: usize) -> ComplexPlans {
        ComplexPlans {
            forward: self.complex_planner.plan_fft_forward(len),
            inverse: self.complex_planner.plan_fft_inverse(len),
        }
    }
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static SHARED_ENGINE: RefCell<FftEngine> = RefCell::new(FftEngine::new());
}

/// Run `f` with the engine shared by all transforms on this thread.
///
/// A nested call, made while the shared engine is already borrowed, gets a
/// fresh engine.
pub fn with_shared_engine<R>(f: impl FnOnce(&mut FftEngine) -> R) -> R {
    SHARED_ENGINE.with(|cell| match cell.try_borrow_mut() {
        Ok(mut engine) => f(&mut engine),
        Err(_) => f(&mut FftEngine::new()),
    })
}

/// Frequencies of the bins returned by [`FftEngine::rfft`] for `n` samples.
pub fn rfft_frequencies(n: usize, deltat: f64) -> Vec<f64> {
    let df = 1.0 / (n as f64 * deltat);
    (0..n / 2 + 1).map(|i| i as f64 * df).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_rfft_irfft_odd_length() {
        let mut engine = FftEngine::new();

        let n = 77;
        let signal: Vec<f64> = (0..n).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();

        let spectrum = engine.rfft(&signal).unwrap();
        assert_eq!(spectrum.len(), n / 2 + 1);
        let recovered = engine.irfft(&spectrum, n).unwrap();

        for (orig, rec) in signal.iter().zip(recovered.iter()) {
            assert!((orig - rec).abs() < 1e-10);
        }
    }

    #[test]
    fn test_padding_keeps_signal() {
        let mut engine = FftEngine::new();
        let signal = [1.0, -2.0, 3.0];
        let spectrum = engine.rfft_padded(&signal, 8).unwrap();
        assert_eq!(spectrum.len(), 5);
        let recovered = engine.irfft(&spectrum, 8).unwrap();
        assert!((recovered[2] - 3.0).abs() < 1e-12);
        assert!(recovered[3..].iter().all(|v| v.abs() < 1e-12));

        assert!(matches!(
            engine.rfft_padded(&signal, 2),
            Err(DspError::InvalidFftSize(2))
        ));
    }

    #[test]
    fn test_rfft_peak_bin() {
        let mut engine = FftEngine::new();
        let n = 64;
        let deltat = 0.25;
        let signal: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 0.25 * i as f64 * deltat).sin())
            .collect();

        let spectrum = engine.rfft(&signal).unwrap();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        let freqs = rfft_frequencies(n, deltat);
        assert!((freqs[peak] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_irfft_length_mismatch() {
        let mut engine = FftEngine::new();
        let data = vec![Complex64::new(1.0, 0.0); 10];
        assert!(matches!(
            engine.irfft(&data, 64),
            Err(DspError::LengthMismatch { expected: 33, actual: 10 })
        ));
    }

    #[test]
    fn test_empty_rejected() {
        let mut engine = FftEngine::new();
        assert!(matches!(engine.rfft(&[]), Err(DspError::InvalidFftSize(0))));
    }

    #[test]
    fn test_shared_engine_keeps_plans() {
        let first = with_shared_engine(|engine| engine.complex_plans(96));
        let second = with_shared_engine(|engine| engine.complex_plans(96));
        assert!(Arc::ptr_eq(&first.forward, &second.forward));
        assert!(Arc::ptr_eq(&first.inverse, &second.inverse));
    }

    #[test]
    fn test_shared_engine_nested() {
        let spectrum = with_shared_engine(|outer| {
            let inner = with_shared_engine(|engine| engine.rfft(&[1.0, 2.0, 3.0, 4.0]));
            outer.rfft(&[1.0, 2.0, 3.0, 4.0]).map(|s| (s, inner))
        });
        let (outer, inner) = spectrum.unwrap();
        let inner = inner.unwrap();
        assert_eq!(outer.len(), 3);
        for (a, b) in outer.iter().zip(&inner) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_complex_plans_roundtrip() {
        let mut engine = FftEngine::new();
        let plans = engine.complex_plans(12);
        let original: Vec<Complex64> = (0..12).map(|i| Complex64::new(i as f64, 0.0)).collect();
        let mut data = original.clone();
        plans.forward.process(&mut data);
        plans.inverse.process(&mut data);
        for (a, b) in original.iter().zip(&data) {
            assert!((a.re - b.re / 12.0).abs() < 1e-10);
        }
    }
}
