//! Cross-module properties of the trace processing engine.

use lib_dsp::{
    correlate, degapper, downsample_to, ContinuousDownsampler, CorrelationMode, DegapConfig,
    DownsampleConfig, Normalization,
};
use lib_types::{Codes, Seconds, Trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SOMETIME: f64 = 1_234_567_890.0;

fn random_vec(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.gen::<f64>()).collect()
}

#[test]
fn direct_and_fft_correlation_agree() {
    let mut rng = StdRng::seed_from_u64(42);

    for na in 1..20 {
        for nb in 1..20 {
            let a = Trace::new(Seconds(0.0), Seconds(1.0), random_vec(&mut rng, na))
                .with_codes(Codes::new("", "t1", "", ""));
            let b = Trace::new(Seconds(0.0), Seconds(1.0), random_vec(&mut rng, nb))
                .with_codes(Codes::new("", "t2", "", ""));

            for mode in [CorrelationMode::Full, CorrelationMode::Same, CorrelationMode::Valid] {
                let c1 = correlate(&a, &b, mode, Normalization::None, false).unwrap();
                let c2 = correlate(&a, &b, mode, Normalization::None, true).unwrap();

                assert_eq!(c1.data_len(), c2.data_len(), "{mode:?} {na} {nb}");
                assert!((c1.tmin().0 - c2.tmin().0).abs() < 1e-9);
                for (x, y) in c1.ydata().iter().zip(c2.ydata()) {
                    assert!((x - y).abs() < 1e-5, "{mode:?} na={na} nb={nb}");
                }
            }
        }
    }
}

#[test]
fn correlation_mode_lengths() {
    let mut rng = StdRng::seed_from_u64(7);
    for (na, nb) in [(3, 8), (8, 3), (5, 5), (1, 4)] {
        let a = Trace::new(Seconds(0.0), Seconds(0.5), random_vec(&mut rng, na));
        let b = Trace::new(Seconds(0.0), Seconds(0.5), random_vec(&mut rng, nb));
        let len = |mode| {
            correlate(&a, &b, mode, Normalization::None, false)
                .unwrap()
                .data_len()
        };
        assert_eq!(len(CorrelationMode::Full), na + nb - 1);
        assert_eq!(len(CorrelationMode::Same), na.max(nb));
        assert_eq!(len(CorrelationMode::Valid), na.abs_diff(nb) + 1);
    }
}

#[test]
fn correlation_reversal_same_mode_odd_length() {
    let mut rng = StdRng::seed_from_u64(3);
    let a = Trace::new(Seconds(0.0), Seconds(0.1), random_vec(&mut rng, 5));
    let b = Trace::new(Seconds(0.0), Seconds(0.1), random_vec(&mut rng, 12));

    let c_ab = correlate(&a, &b, CorrelationMode::Same, Normalization::None, false).unwrap();
    let c_ba = correlate(&b, &a, CorrelationMode::Same, Normalization::None, false).unwrap();
    for (x, y) in c_ab.ydata().iter().zip(c_ba.ydata().iter().rev()) {
        assert!((x - y).abs() < 1e-12);
    }
}

#[test]
fn continuous_downsampling_matches_batch() {
    let mut rng = StdRng::seed_from_u64(1000);
    let y = random_vec(&mut rng, 1000);

    for (dt1, dt2) in [(0.1, 1.0), (0.2, 1.0), (0.5, 1.0), (0.2, 0.4), (0.4, 1.2)] {
        for tadd in [0.0, 0.01, 0.2, 0.5, 0.7, 0.75] {
            let mut batch = Trace::new(Seconds(SOMETIME + tadd), Seconds(dt1), y.clone());
            let config = DownsampleConfig {
                demean: false,
                ..DownsampleConfig::default()
            };
            downsample_to(&mut batch, Seconds(dt2), &config).unwrap();

            let mut downsampler = ContinuousDownsampler::new(Seconds(dt2));
            let mut chunks_out = Vec::new();
            for i in 0..10 {
                let chunk = Trace::new(
                    Seconds(SOMETIME + i as f64 * dt1 * 100.0 + tadd),
                    Seconds(dt1),
                    y[i * 100..(i + 1) * 100].to_vec(),
                )
                .with_codes(Codes::new("", "", "b", ""));
                chunks_out.extend(downsampler.advance(&chunk).unwrap());
            }
            chunks_out.extend(downsampler.close());

            let first = &chunks_out[0];
            let k = (first.tmin().0 / dt2).round();
            assert!(
                ((k * dt2 - first.tmin().0) / dt1).abs() < 0.5001,
                "dt1={dt1} dt2={dt2} tadd={tadd}: first tmin {}",
                first.tmin().0
            );
            assert!((first.tmin().0 - batch.tmin().0).abs() < 1e-6);

            let streamed: Vec<f64> = chunks_out
                .iter()
                .flat_map(|t| t.ydata().iter().copied())
                .collect();
            assert_eq!(streamed.len(), batch.data_len(), "dt1={dt1} dt2={dt2} tadd={tadd}");
            for (s, b) in streamed.iter().zip(batch.ydata()) {
                assert!((s - b).abs() < 1e-12);
            }

            // consecutive output chunks continue the grid
            for pair in chunks_out.windows(2) {
                let expected = pair[0].tmax().0 + dt2;
                assert!((pair[1].tmin().0 - expected).abs() < dt2 * 1e-3);
            }
        }
    }
}

#[test]
fn degap_then_correlate_locates_template() {
    let mut rng = StdRng::seed_from_u64(5);
    let signal = random_vec(&mut rng, 400);

    let pieces: Vec<Trace> = (0..4)
        .map(|i| {
            Trace::new(
                Seconds(i as f64 * 10.0),
                Seconds(0.1),
                signal[i * 100..(i + 1) * 100].to_vec(),
            )
        })
        .collect();
    let merged = degapper(pieces, &DegapConfig::default());
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].data_len(), 400);

    let template = merged[0].chopped(Seconds(12.0), Seconds(15.0), false).unwrap();
    let c = correlate(
        &template,
        &merged[0],
        CorrelationMode::Valid,
        Normalization::Gliding,
        true,
    )
    .unwrap();
    // the template was cut from the same record, so the best lag is zero
    let (t, v) = c.max().unwrap();
    assert!(t.0.abs() < 1e-6);
    assert!((v - 1.0).abs() < 1e-3);
}
