//! Window and taper functions.
//!
//! The Hamming window weights a fixed number of samples for FIR design. Tapers
//! are defined over a continuous axis by four corner points and are used to
//! fade signals in time and responses in frequency.

use std::f64::consts::PI;

/// Symmetric Hamming window of `length` coefficients.
///
/// Both end points are part of the window.
pub fn hamming(length: usize) -> Vec<f64> {
    if length <= 1 {
        return vec![1.0; length];
    }

    let n = length as f64;
    (0..length)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1.0)).cos())
        .collect()
}

/// Cosine taper with corners `a <= b <= c <= d`.
///
/// Zero outside `[a, d]`, one on `[b, c]`, half-cosine ramps in between.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CosTaper {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl CosTaper {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    /// Whether the corners are ordered.
    pub fn is_valid(&self) -> bool {
        self.a <= self.b && self.b <= self.c && self.c <= self.d
    }

    /// Taper weight at `x`.
    pub fn weight(&self, x: f64) -> f64 {
        if x < self.a || x > self.d {
            0.0
        } else if x < self.b {
            0.5 - 0.5 * (PI * (x - self.a) / (self.b - self.a)).cos()
        } else if x <= self.c {
            1.0
        } else {
            0.5 + 0.5 * (PI * (x - self.c) / (self.d - self.c)).cos()
        }
    }

    /// Multiply `data` sample-wise by the taper on the grid `x0 + i * dx`.
    pub fn apply(&self, data: &mut [f64], x0: f64, dx: f64) {
        for (i, v) in data.iter_mut().enumerate() {
            *v *= self.weight(x0 + i as f64 * dx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_short_lengths() {
        assert!(hamming(0).is_empty());
        assert_eq!(hamming(1), vec![1.0]);
    }

    #[test]
    fn test_hamming_window_symmetry() {
        let window = hamming(31);
        assert!((window[0] - 0.08).abs() < 1e-10);
        assert!((window[15] - 1.0).abs() < 1e-10);
        for i in 0..15 {
            assert!((window[i] - window[30 - i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_costaper_regions() {
        let taper = CosTaper::new(0.0, 1.0, 3.0, 4.0);
        assert!(taper.is_valid());
        assert_eq!(taper.weight(-0.1), 0.0);
        assert!((taper.weight(0.5) - 0.5).abs() < 1e-12);
        assert_eq!(taper.weight(2.0), 1.0);
        assert!((taper.weight(3.5) - 0.5).abs() < 1e-12);
        assert_eq!(taper.weight(4.1), 0.0);
    }

    #[test]
    fn test_costaper_apply() {
        let taper = CosTaper::new(0.0, 1.0, 3.0, 4.0);
        let mut data = vec![1.0; 9];
        taper.apply(&mut data, 0.0, 0.5);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[4], 1.0);
        assert_eq!(data[8], 0.0);
    }
}
