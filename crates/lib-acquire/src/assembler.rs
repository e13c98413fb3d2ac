//! Assembly of timestamped samples into contiguous traces.
//!
//! Samples arrive one at a time together with the time the host received
//! them. Arrival times carry transport latency, so every `buffer_size`
//! samples the buffer is fitted against sample index and the sampling
//! interval and onset are estimated from the least delayed arrivals. Short
//! histories of the fitted intervals and onset offsets detect rate changes
//! and clock drift. Completed traces continue one time origin as long as the
//! stream stays consistent.

use crate::error::{AcquireError, AcquireResult};
use crate::listener::{ListenerHandle, ListenerRegistry, TraceListener};
use lib_types::{Codes, Queue, Seconds, Trace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of recent fits used for rate and drift decisions.
const HISTORY_LEN: usize = 5;

/// Onset offset, in samples, above which drift is compensated.
const DRIFT_THRESHOLD: f64 = 0.7;

/// Tolerance, in Hz, when comparing integral sampling rates.
const RATE_TOLERANCE_HZ: f64 = 0.5;

/// Options of a [`SampleAssembler`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Samples per emitted trace.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Codes stamped on every emitted trace.
    #[serde(default)]
    pub codes: Codes,
    /// Snap the fitted rate to an integral number of Hz.
    #[serde(default = "default_disallow_uneven")]
    pub disallow_uneven_sampling_rates: bool,
    /// Relative interval change treated as a new rate when rates may be uneven.
    #[serde(default = "default_deltat_tolerance")]
    pub deltat_tolerance: f64,
}

fn default_buffer_size() -> usize {
    128
}

fn default_disallow_uneven() -> bool {
    true
}

fn default_deltat_tolerance() -> f64 {
    0.01
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            codes: Codes::default(),
            disallow_uneven_sampling_rates: default_disallow_uneven(),
            deltat_tolerance: default_deltat_tolerance(),
        }
    }
}

impl AssemblerConfig {
    pub fn validate(&self) -> AcquireResult<()> {
        if self.buffer_size < 2 {
            return Err(AcquireError::InvalidConfig(format!(
                "buffer_size must be at least 2, got {}",
                self.buffer_size
            )));
        }
        if !(self.deltat_tolerance > 0.0) || !self.deltat_tolerance.is_finite() {
            return Err(AcquireError::InvalidConfig(format!(
                "deltat_tolerance must be positive, got {}",
                self.deltat_tolerance
            )));
        }
        Ok(())
    }
}

/// Ordinary least squares fit `y = slope * x + intercept`.
fn linregress(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let xm = x.iter().sum::<f64>() / n as f64;
    let ym = y.iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - xm) * (yi - ym);
        sxx += (xi - xm) * (xi - xm);
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, ym - slope * xm))
}

/// Fit arrival times against sample index, returning `(deltat, tmin)`.
///
/// Points arriving later than the fit are dropped and the fit repeated
/// twice, so the estimate follows the least delayed samples.
fn fit_arrivals(times: &[f64]) -> Option<(f64, f64)> {
    let toff = *times.first()?;
    let index: Vec<f64> = (0..times.len()).map(|i| i as f64).collect();
    let rel: Vec<f64> = times.iter().map(|t| t - toff).collect();

    let (mut deltat, mut tmin) = linregress(&index, &rel)?;
    for _ in 0..2 {
        let (x, y): (Vec<f64>, Vec<f64>) = index
            .iter()
            .zip(&rel)
            .filter(|(i, t)| **t <= tmin + deltat * **i)
            .map(|(i, t)| (*i, *t))
            .unzip();
        match linregress(&x, &y) {
            Some(fit) => (deltat, tmin) = fit,
            None => break,
        }
    }
    Some((deltat, tmin + toff))
}

/// Turns a stream of `(value, arrival time)` pairs into traces.
#[derive(Debug)]
pub struct SampleAssembler {
    config: AssemblerConfig,
    values: Vec<f64>,
    times: Vec<f64>,
    deltat: Option<f64>,
    tmin: Option<f64>,
    ncontinuous: usize,
    previous_deltats: Queue,
    previous_tmin_offsets: Queue,
    listeners: ListenerRegistry,
}

impl SampleAssembler {
    pub fn new(config: AssemblerConfig) -> AcquireResult<Self> {
        config.validate()?;
        Ok(Self {
            values: Vec::with_capacity(config.buffer_size + 1),
            times: Vec::with_capacity(config.buffer_size),
            config,
            deltat: None,
            tmin: None,
            ncontinuous: 0,
            previous_deltats: Queue::new(HISTORY_LEN),
            previous_tmin_offsets: Queue::new(HISTORY_LEN),
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Current sampling interval, once one has been detected.
    pub fn deltat(&self) -> Option<Seconds> {
        self.deltat.map(Seconds)
    }

    /// Samples buffered but not yet emitted.
    pub fn pending(&self) -> usize {
        self.values.len()
    }

    pub fn register(&mut self, listener: impl TraceListener + 'static) -> ListenerHandle {
        self.listeners.register(listener)
    }

    pub fn unregister(&mut self, handle: ListenerHandle) -> bool {
        self.listeners.unregister(handle)
    }

    /// Buffer one sample received at `arrival`.
    pub fn push(&mut self, value: f64, arrival: Seconds) -> AcquireResult<()> {
        self.values.push(value);
        self.times.push(arrival.0);
        if self.values.len() >= self.config.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Buffer every number on a whitespace separated line, all received at
    /// `arrival`. Unparseable tokens are skipped.
    pub fn push_line(&mut self, line: &str, arrival: Seconds) -> AcquireResult<()> {
        for token in line.split_whitespace() {
            match token.parse::<f64>() {
                Ok(value) => self.push(value, arrival)?,
                Err(_) => tracing::warn!("cannot parse sample {:?} in line {:?}", token, line),
            }
        }
        Ok(())
    }

    /// Absorb an onset offset of `soffset` samples. A single sample is
    /// repeated or dropped; anything larger discards the time origin.
    fn compensate_drift(&mut self, soffset: i64, deltat: f64) {
        tracing::info!("{}: drift or jump of {} samples", self.config.codes, soffset);
        match soffset {
            1 => {
                if let Some(&last) = self.values.last() {
                    self.values.push(last);
                }
                self.previous_tmin_offsets.add(-deltat);
                tracing::info!("{}: adding one sample to compensate drift", self.config.codes);
            }
            -1 => {
                self.values.pop();
                self.previous_tmin_offsets.add(deltat);
                tracing::info!("{}: removing one sample to compensate drift", self.config.codes);
            }
            _ => self.tmin = None,
        }
    }

    fn flush(&mut self) -> AcquireResult<()> {
        let Some((mut r_deltat, r_tmin)) = fit_arrivals(&self.times) else {
            tracing::warn!(
                "{}: arrival times of {} samples do not determine a sampling interval, discarding",
                self.config.codes,
                self.values.len()
            );
            self.values.clear();
            self.times.clear();
            return Ok(());
        };
        if !(r_deltat > 0.0) || !r_deltat.is_finite() {
            tracing::warn!(
                "{}: fitted sampling interval {} is not positive, discarding {} samples",
                self.config.codes,
                r_deltat,
                self.values.len()
            );
            self.values.clear();
            self.times.clear();
            return Ok(());
        }

        let uneven = !self.config.disallow_uneven_sampling_rates;
        if !uneven {
            let rate = (1.0 / r_deltat).round();
            if rate >= 1.0 {
                r_deltat = 1.0 / rate;
            }
        }

        if let (Some(deltat), Ok(p_deltat)) = (self.deltat, self.previous_deltats.median()) {
            let changed = if uneven {
                ((deltat - p_deltat) / deltat).abs() > self.config.deltat_tolerance
            } else {
                (1.0 / p_deltat - 1.0 / deltat).abs() > RATE_TOLERANCE_HZ
            };
            if changed {
                self.deltat = None;
                self.previous_deltats.clear();
            }
        }
        self.previous_deltats.push_back(r_deltat);

        let deltat = match self.deltat {
            Some(deltat) => deltat,
            None => {
                // a new rate needs a new origin
                self.deltat = Some(r_deltat);
                self.tmin = None;
                tracing::info!(
                    "{}: sampling rate set to {} Hz (interval {} s)",
                    self.config.codes,
                    1.0 / r_deltat,
                    r_deltat
                );
                r_deltat
            }
        };

        if let Some(tmin) = self.tmin {
            let tmin_offset = r_tmin - (tmin + self.ncontinuous as f64 * deltat);
            if let Ok(toffset) = self.previous_tmin_offsets.median() {
                if toffset.abs() > deltat * DRIFT_THRESHOLD {
                    self.compensate_drift((toffset / deltat).round() as i64, deltat);
                }
            }
            if self.tmin.is_some() {
                self.previous_tmin_offsets.push_back(tmin_offset);
            }
        }

        let tmin = match self.tmin {
            Some(tmin) => tmin,
            None => {
                self.tmin = Some(r_tmin);
                self.ncontinuous = 0;
                // offsets measured against an earlier origin no longer apply
                self.previous_tmin_offsets.clear();
                tracing::info!("{}: time origin set to {} s", self.config.codes, r_tmin);
                r_tmin
            }
        };

        let values = std::mem::take(&mut self.values);
        self.times.clear();
        let n = values.len();
        let trace = Trace::try_new(
            Seconds(tmin + self.ncontinuous as f64 * deltat),
            Seconds(deltat),
            values,
        )?
        .with_codes(self.config.codes.clone());
        self.ncontinuous += n;

        tracing::debug!(
            "completed trace {} at {} s, {} samples",
            trace.codes(),
            trace.tmin().0,
            trace.data_len()
        );
        self.listeners.notify(&Arc::new(trace));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Mutex;

    type Collected = Arc<Mutex<Vec<Arc<Trace>>>>;

    fn collecting(config: AssemblerConfig) -> (SampleAssembler, Collected) {
        let mut assembler = SampleAssembler::new(config).unwrap();
        let collected: Collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        assembler.register(move |tr: Arc<Trace>| sink.lock().unwrap().push(tr));
        (assembler, collected)
    }

    fn small_buffer(n: usize) -> AssemblerConfig {
        AssemblerConfig {
            buffer_size: n,
            codes: Codes::new("XX", "STA", "", "HHZ"),
            ..AssemblerConfig::default()
        }
    }

    fn assert_continuous(traces: &[Arc<Trace>]) {
        for pair in traces.windows(2) {
            let expected = pair[0].tmax().0 + pair[0].deltat().0;
            assert!(
                (pair[1].tmin().0 - expected).abs() < 1e-6,
                "{} does not follow {}",
                pair[1].tmin().0,
                pair[0].tmax().0
            );
        }
    }

    #[test]
    fn test_fit_exact_arrivals() {
        let times: Vec<f64> = (0..50).map(|i| 10.0 + i as f64 * 0.01).collect();
        let (deltat, tmin) = fit_arrivals(&times).unwrap();
        assert!((deltat - 0.01).abs() < 1e-9);
        assert!((tmin - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_prefers_least_delayed() {
        let mut rng = StdRng::seed_from_u64(11);
        let times: Vec<f64> = (0..200)
            .map(|i| 5.0 + i as f64 * 0.01 + rng.gen_range(0.0..0.02))
            .collect();
        let (deltat, tmin) = fit_arrivals(&times).unwrap();
        assert!((deltat - 0.01).abs() < 1e-4);
        // plain regression would land near the mean latency of 0.01
        assert!((tmin - 5.0).abs() < 0.006, "tmin = {tmin}");
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            SampleAssembler::new(small_buffer(1)),
            Err(AcquireError::InvalidConfig(_))
        ));
        let config = AssemblerConfig {
            deltat_tolerance: 0.0,
            ..AssemblerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_emits_contiguous_traces() {
        let (mut assembler, collected) = collecting(small_buffer(100));
        let mut rng = StdRng::seed_from_u64(3);
        for i in 0..1050 {
            let t = 1000.0 + i as f64 * 0.01 + rng.gen_range(0.0..0.005);
            assembler.push(i as f64, Seconds(t)).unwrap();
        }

        let traces = collected.lock().unwrap();
        assert_eq!(traces.len(), 10);
        assert_eq!(assembler.pending(), 50);
        assert_eq!(assembler.deltat(), Some(Seconds(0.01)));
        for tr in traces.iter() {
            assert_eq!(tr.data_len(), 100);
            assert_eq!(tr.codes(), &Codes::new("XX", "STA", "", "HHZ"));
            assert!((tr.deltat().0 - 0.01).abs() < 1e-12);
        }
        assert!((traces[0].tmin().0 - 1000.0).abs() < 0.005);
        assert_continuous(&traces);
        assert_eq!(traces[3].ydata()[0], 300.0);
    }

    #[test]
    fn test_push_line_skips_garbage() {
        let (mut assembler, collected) = collecting(small_buffer(4));
        assembler.push_line("1 x", Seconds(0.0)).unwrap();
        assert_eq!(assembler.pending(), 1);
        assembler.push_line("2", Seconds(0.1)).unwrap();
        assembler.push_line("bad", Seconds(0.15)).unwrap();
        assembler.push_line("3", Seconds(0.2)).unwrap();
        assert_eq!(assembler.pending(), 3);
        assembler.push_line("4.5", Seconds(0.3)).unwrap();
        assert_eq!(assembler.pending(), 0);

        let traces = collected.lock().unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].ydata(), &[1.0, 2.0, 3.0, 4.5]);
        assert!((traces[0].deltat().0 - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_identical_arrivals_are_discarded() {
        let (mut assembler, collected) = collecting(small_buffer(5));
        assembler.push_line("1 2 3 4 5", Seconds(7.0)).unwrap();
        assert_eq!(assembler.pending(), 0);
        assert!(collected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_uneven_rate_kept() {
        let config = AssemblerConfig {
            disallow_uneven_sampling_rates: false,
            ..small_buffer(50)
        };
        let (mut assembler, collected) = collecting(config);
        let deltat = 1.0 / 12.5;
        for i in 0..100 {
            assembler.push(0.0, Seconds(i as f64 * deltat)).unwrap();
        }
        let traces = collected.lock().unwrap();
        assert_eq!(traces.len(), 2);
        assert!((traces[0].deltat().0 - deltat).abs() < 1e-9);
    }

    #[test]
    fn test_integral_rate_snapping() {
        let (mut assembler, collected) = collecting(small_buffer(50));
        let deltat = 1.0 / 12.7;
        for i in 0..50 {
            assembler.push(0.0, Seconds(i as f64 * deltat)).unwrap();
        }
        let traces = collected.lock().unwrap();
        assert!((traces[0].deltat().0 - 1.0 / 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_rate_change_detected() {
        let (mut assembler, collected) = collecting(small_buffer(20));
        let mut t = 0.0;
        for _ in 0..200 {
            assembler.push(0.0, Seconds(t)).unwrap();
            t += 0.1;
        }
        assert_eq!(assembler.deltat(), Some(Seconds(0.1)));

        for _ in 0..400 {
            assembler.push(0.0, Seconds(t)).unwrap();
            t += 0.05;
        }
        assert_eq!(assembler.deltat(), Some(Seconds(0.05)));

        let traces = collected.lock().unwrap();
        let last = traces.last().unwrap();
        assert!((last.deltat().0 - 0.05).abs() < 1e-12);
        // the new origin follows the actual arrivals again
        let expected_tmax = t - 0.05;
        assert!((last.tmax().0 - expected_tmax).abs() < 0.05, "{}", last.tmax().0);
    }

    #[test]
    fn test_drift_compensated_by_dropping_samples() {
        let (mut assembler, collected) = collecting(small_buffer(100));
        // the source runs 0.1 % fast against its nominal 100 Hz
        let true_deltat = 0.01 * (1.0 - 1e-3);
        for i in 0..4000 {
            assembler.push(i as f64, Seconds(50.0 + i as f64 * true_deltat)).unwrap();
        }

        let traces = collected.lock().unwrap();
        assert_eq!(traces.len(), 40);
        assert!(traces.iter().all(|t| (t.deltat().0 - 0.01).abs() < 1e-12));
        assert!(traces.iter().any(|t| t.data_len() == 99));
        assert!(traces.iter().all(|t| t.data_len() >= 99));
        // no origin reset: the emitted samples stay on one grid
        assert_continuous(&traces);

        // and the grid stays about a sample from the true clock
        let last = traces.last().unwrap();
        let true_tmax = 50.0 + 3999.0 * true_deltat;
        assert!((last.tmax().0 - true_tmax).abs() < 0.015, "{}", last.tmax().0 - true_tmax);
    }

    #[test]
    fn test_drift_compensated_by_repeating_samples() {
        let (mut assembler, collected) = collecting(small_buffer(100));
        let true_deltat = 0.01 * (1.0 + 1e-3);
        for i in 0..4000 {
            assembler.push(i as f64, Seconds(i as f64 * true_deltat)).unwrap();
        }

        let traces = collected.lock().unwrap();
        let long: Vec<_> = traces.iter().filter(|t| t.data_len() == 101).collect();
        assert!(!long.is_empty());
        // the repeated sample duplicates the last value of its buffer
        let y = long[0].ydata();
        assert_eq!(y[100], y[99]);
        assert_continuous(&traces);
    }

    #[test]
    fn test_jump_resets_origin() {
        let (mut assembler, collected) = collecting(small_buffer(50));
        let mut t = 0.0;
        for _ in 0..500 {
            assembler.push(0.0, Seconds(t)).unwrap();
            t += 0.02;
        }
        // transmission pauses for two seconds
        t += 2.0;
        for _ in 0..500 {
            assembler.push(0.0, Seconds(t)).unwrap();
            t += 0.02;
        }

        let traces = collected.lock().unwrap();
        let last = traces.last().unwrap();
        assert!((last.tmax().0 - (t - 0.02)).abs() < 0.02, "{}", last.tmax().0);
        let before_jump = &traces[9];
        assert!((before_jump.tmax().0 - (499.0 * 0.02)).abs() < 0.02);
    }

    #[test]
    fn test_unregistered_listener_is_silent() {
        let mut assembler = SampleAssembler::new(small_buffer(2)).unwrap();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let handle = assembler.register(move |_: Arc<Trace>| *sink.lock().unwrap() += 1);

        assembler.push(0.0, Seconds(0.0)).unwrap();
        assembler.push(0.0, Seconds(1.0)).unwrap();
        assert!(assembler.unregister(handle));
        assembler.push(0.0, Seconds(2.0)).unwrap();
        assembler.push(0.0, Seconds(3.0)).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
