//! Bounded history of recent observations.
//!
//! Used for robust short-window statistics, e.g. the median of the last few
//! fitted sampling intervals when detecting rate changes or clock drift.

use crate::error::{TraceError, TraceResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity FIFO of `f64` values. The oldest value is evicted first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Queue {
    capacity: usize,
    values: VecDeque<f64>,
}

impl Queue {
    /// Create an empty queue holding at most `capacity` values.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Maximum number of values kept.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append a value, evicting from the front beyond capacity.
    pub fn push_back(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Arithmetic mean of the stored values.
    pub fn mean(&self) -> TraceResult<f64> {
        if self.values.is_empty() {
            return Err(TraceError::QueueIsEmpty);
        }
        Ok(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Median of the stored values; the mean of the two middle values for
    /// an even count.
    pub fn median(&self) -> TraceResult<f64> {
        if self.values.is_empty() {
            return Err(TraceError::QueueIsEmpty);
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        if n % 2 != 0 {
            Ok(sorted[n / 2])
        } else {
            Ok((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
        }
    }

    /// Shift every stored value by `w`.
    pub fn add(&mut self, w: f64) {
        for v in self.values.iter_mut() {
            *v += w;
        }
    }

    /// Remove all values.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }
}
