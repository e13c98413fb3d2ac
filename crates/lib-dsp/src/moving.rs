//! Sliding-window sums.

/// Edge handling of [`moving_sum`], with convolution semantics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MovingMode {
    /// Only windows lying completely inside the input.
    #[default]
    Valid,
    /// Every window overlapping the input by at least one sample.
    Full,
}

/// Sum of `x` over a sliding window of `window` samples.
///
/// Equivalent to convolving `x` with `window` ones. `Valid` returns
/// `x.len() - window + 1` values (none when the window is longer than the
/// input), `Full` returns `x.len() + window - 1` values.
pub fn moving_sum(x: &[f64], window: usize, mode: MovingMode) -> Vec<f64> {
    let nn = x.len();
    let n = window;
    if nn == 0 || n == 0 {
        return Vec::new();
    }

    let mut cx = Vec::with_capacity(nn);
    let mut acc = 0.0;
    for &v in x {
        acc += v;
        cx.push(acc);
    }
    let total = cx[nn - 1];

    match mode {
        MovingMode::Valid => {
            if n > nn {
                return Vec::new();
            }
            let mut y = Vec::with_capacity(nn - n + 1);
            y.push(cx[n - 1]);
            for i in n..nn {
                y.push(cx[i] - cx[i - n]);
            }
            y
        }
        MovingMode::Full => {
            let mut y = Vec::with_capacity(nn + n - 1);
            if n <= nn {
                y.extend_from_slice(&cx[..n]);
                for i in n..nn {
                    y.push(cx[i] - cx[i - n]);
                }
                for i in nn - n..nn - 1 {
                    y.push(total - cx[i]);
                }
            } else {
                y.extend_from_slice(&cx);
                y.extend(std::iter::repeat(total).take(n - nn));
                for &c in &cx[..nn - 1] {
                    y.push(total - c);
                }
            }
            y
        }
    }
}
