//! Linear convolution, direct and FFT-based.
//!
//! Short inputs go through a single zero-padded transform. When one operand
//! is long and the other short, [`ConvolutionEngine`] splits the long one
//! into overlap-save blocks that are processed in parallel with Rayon.

use crate::error::{DspError, DspResult};
use crate::fft::{with_shared_engine, ComplexPlans};
use num_complex::Complex64;
use rayon::prelude::*;

/// Signals at least this long are convolved block-wise.
const OVERLAP_SAVE_MIN_SIGNAL: usize = 1 << 14;

/// Block-wise convolution is used when the signal is this many times longer
/// than the kernel.
const OVERLAP_SAVE_MIN_RATIO: usize = 8;

/// Overlap-save convolver for one fixed kernel.
///
/// The kernel spectrum is computed once; blocks of `fft_size` input samples,
/// each starting `kernel_len - 1` samples before the output it contributes,
/// are transformed independently.
pub struct ConvolutionEngine {
    kernel_spectrum: Vec<Complex64>,
    kernel_len: usize,
    fft_size: usize,
    plans: ComplexPlans,
}

impl ConvolutionEngine {
    /// Block size is four times the kernel length, at least 1024.
    pub fn new(kernel: &[f64]) -> DspResult<Self> {
        if kernel.is_empty() {
            return Err(DspError::InsufficientData { needed: 1, got: 0 });
        }
        let fft_size = (kernel.len() * 4).next_power_of_two().max(1024);
        let plans = with_shared_engine(|engine| engine.complex_plans(fft_size));

        let mut kernel_spectrum = vec![Complex64::new(0.0, 0.0); fft_size];
        for (c, &k) in kernel_spectrum.iter_mut().zip(kernel) {
            c.re = k;
        }
        plans.forward.process(&mut kernel_spectrum);

        tracing::debug!(
            "overlap-save convolver: kernel {} samples, blocks of {}",
            kernel.len(),
            fft_size
        );

        Ok(Self {
            kernel_spectrum,
            kernel_len: kernel.len(),
            fft_size,
            plans,
        })
    }

    /// Output samples each block contributes.
    fn step(&self) -> usize {
        self.fft_size - (self.kernel_len - 1)
    }

    /// Full linear convolution of `input` with the kernel, of length
    /// `input.len() + kernel_len - 1`.
    pub fn convolve(&self, input: &[f64]) -> Vec<f64> {
        if input.is_empty() {
            return Vec::new();
        }
        let output_len = input.len() + self.kernel_len - 1;
        let step = self.step();
        let overlap = self.kernel_len - 1;
        let nblocks = (output_len + step - 1) / step;

        let blocks: Vec<Vec<f64>> = (0..nblocks)
            .into_par_iter()
            .map(|iblock| {
                // block covers input[first - overlap .. first - overlap + fft_size]
                let first = iblock * step;
                let mut block = vec![Complex64::new(0.0, 0.0); self.fft_size];
                for (i, c) in block.iter_mut().enumerate() {
                    let j = (first + i).checked_sub(overlap);
                    if let Some(&v) = j.and_then(|j| input.get(j)) {
                        c.re = v;
                    }
                }
                self.filter_block(block)
            })
            .collect();

        let mut output = Vec::with_capacity(output_len);
        for block in blocks {
            let take = step.min(output_len - output.len());
            output.extend_from_slice(&block[overlap..overlap + take]);
        }
        output
    }

    fn filter_block(&self, mut block: Vec<Complex64>) -> Vec<f64> {
        self.plans.forward.process(&mut block);
        for (c, h) in block.iter_mut().zip(&self.kernel_spectrum) {
            *c *= *h;
        }
        self.plans.inverse.process(&mut block);

        let scale = 1.0 / self.fft_size as f64;
        block.iter().map(|c| c.re * scale).collect()
    }
}

/// Convolution by summation, `O(n m)`. Empty when either input is empty.
pub fn direct_convolve(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    if signal.is_empty() || kernel.is_empty() {
        return Vec::new();
    }
    let output_len = signal.len() + kernel.len() - 1;
    let mut output = vec![0.0; output_len];

    for (i, &s) in signal.iter().enumerate() {
        for (j, &k) in kernel.iter().enumerate() {
            output[i + j] += s * k;
        }
    }

    output
}

/// FFT-based convolution.
///
/// Uses a single zero-padded real transform, or [`ConvolutionEngine`] when
/// one operand is much longer than the other.
pub fn fft_convolve(signal: &[f64], kernel: &[f64]) -> DspResult<Vec<f64>> {
    if signal.is_empty() || kernel.is_empty() {
        return Ok(Vec::new());
    }

    let (long, short) = if signal.len() >= kernel.len() {
        (signal, kernel)
    } else {
        (kernel, signal)
    };
    if long.len() >= OVERLAP_SAVE_MIN_SIGNAL && long.len() >= short.len() * OVERLAP_SAVE_MIN_RATIO {
        return Ok(ConvolutionEngine::new(short)?.convolve(long));
    }

    let output_len = signal.len() + kernel.len() - 1;
    let fft_size = output_len.next_power_of_two();

    let mut output = with_shared_engine(|engine| {
        let signal_fft = engine.rfft_padded(signal, fft_size)?;
        let kernel_fft = engine.rfft_padded(kernel, fft_size)?;

        let product: Vec<Complex64> = signal_fft
            .iter()
            .zip(kernel_fft.iter())
            .map(|(s, k)| s * k)
            .collect();

        engine.irfft(&product, fft_size)
    })?;
    output.truncate(output_len);
    Ok(output)
}
