mod common;

use std::fs;

use approx::assert_abs_diff_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::tempdir;
use voice_convert_core::{
    core::f0::{F0Extractor, F0Override, PitchOptions},
    F0Method, PitchEstimator, Result, VcError,
};

struct BrokenEstimator;

impl PitchEstimator for BrokenEstimator {
    fn estimate(&mut self, _: &[f32], _: u32, _: usize, _: f32, _: f32) -> Result<Vec<f32>> {
        Err(VcError::Embedder("estimator crashed".into()))
    }
}

/// Alternates NaN and 200 Hz frames.
struct NanEstimator;

impl PitchEstimator for NanEstimator {
    fn estimate(&mut self, audio: &[f32], _: u32, hop: usize, _: f32, _: f32) -> Result<Vec<f32>> {
        Ok((0..audio.len().div_ceil(hop))
            .map(|i| if i % 2 == 0 { f32::NAN } else { 200.0 })
            .collect())
    }
}

fn median_voiced(hz: &[f32]) -> f32 {
    let mut v: Vec<f32> = hz.iter().copied().filter(|&f| f > 0.0).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v[v.len() / 2]
}

#[test]
fn curve_length_is_ceil_of_len_over_hop() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut f0 = F0Extractor::new(common::SR);
    f0.register(F0Method::Rmvpe, Box::new(common::MockPitch));

    for _ in 0..12 {
        let len = rng.gen_range(1_000..20_000);
        let hop = rng.gen_range(64..400);
        let audio = common::noise(len, 0.3);
        for method in [F0Method::Acf, F0Method::Yin, F0Method::Rmvpe] {
            let curve = f0.extract(&audio, hop, &method);
            assert_eq!(curve.len(), len.div_ceil(hop), "{method} len={len} hop={hop}");
            assert!(curve.voiced_count() <= curve.len());
        }
    }
}

#[test]
fn native_trackers_find_a_steady_tone() {
    let audio = common::tone(220.0, 1.0, 0.5);
    let mut f0 = F0Extractor::new(common::SR);
    for method in [F0Method::Acf, F0Method::Yin] {
        let curve = f0.extract(&audio, 160, &method);
        assert!(curve.voiced_count() > curve.len() / 2, "{method}");
        let m = median_voiced(&curve.hz);
        assert!((m - 220.0).abs() < 220.0 * 0.03, "{method}: {m}");
    }
}

#[test]
fn silence_is_all_unvoiced() {
    let mut f0 = F0Extractor::new(common::SR);
    let curve = f0.extract(&vec![0.0; 8000], 160, &F0Method::Acf);
    assert_eq!(curve.len(), 50);
    assert_eq!(curve.voiced_count(), 0);
}

#[test]
fn failing_estimator_degrades_to_unvoiced() {
    let mut f0 = F0Extractor::new(common::SR);
    f0.register(F0Method::Crepe, Box::new(BrokenEstimator));
    let audio = common::tone(220.0, 0.5, 0.5);
    let curve = f0.extract(&audio, 160, &F0Method::Crepe);
    assert_eq!(curve.len(), 50);
    assert_eq!(curve.voiced_count(), 0);
}

#[test]
fn missing_estimator_falls_back_to_acf() {
    let mut f0 = F0Extractor::new(common::SR);
    let audio = common::tone(220.0, 0.5, 0.5);
    let fallback = f0.extract(&audio, 160, &F0Method::Fcpe);
    let acf = f0.extract(&audio, 160, &F0Method::Acf);
    assert_eq!(fallback, acf);
}

#[test]
fn hybrid_combines_members() {
    let mut f0 = F0Extractor::new(common::SR);
    f0.register(F0Method::Rmvpe, Box::new(common::MockPitch));
    let method: F0Method = "hybrid[rmvpe+acf+yin]".parse().unwrap();
    let audio = common::tone(220.0, 0.5, 0.5);
    let curve = f0.extract(&audio, 160, &method);
    assert_eq!(curve.len(), 50);
    // two trackers near 220 Hz outvote the constant 200 Hz estimator
    let m = median_voiced(&curve.hz);
    assert!((m - 220.0).abs() < 10.0, "{m}");
}

#[test]
fn octave_shift_doubles_pitch() {
    let mut f0 = F0Extractor::new(common::SR);
    f0.register(F0Method::Rmvpe, Box::new(common::MockPitch));
    let audio = common::tone(220.0, 0.5, 0.5);
    let opts = PitchOptions {
        semitones: 12,
        ..PitchOptions::default()
    };
    let curve = f0.pitch_curve(&audio, 50, 160, &opts);
    assert_eq!(curve.len(), 50);
    for &f in &curve.hz {
        assert_abs_diff_eq!(f, 400.0, epsilon = 1e-3);
    }
}

#[test]
fn override_file_replaces_curve_after_offset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f0.csv");
    fs::write(&path, "0.0,300\n0.1,300\n").unwrap();
    let over = F0Override::load(&path).unwrap();

    let mut f0 = F0Extractor::new(common::SR);
    f0.register(F0Method::Rmvpe, Box::new(common::MockPitch));
    let opts = PitchOptions {
        f0_override: Some(over),
        override_offset: 5,
        ..PitchOptions::default()
    };
    let curve = f0.pitch_curve(&common::tone(220.0, 0.5, 0.5), 50, 160, &opts);
    assert_abs_diff_eq!(curve.hz[4], 200.0, epsilon = 1e-3);
    for &f in &curve.hz[5..16] {
        assert_abs_diff_eq!(f, 300.0, epsilon = 1e-3);
    }
    assert_abs_diff_eq!(curve.hz[16], 200.0, epsilon = 1e-3);
}

#[test]
fn malformed_override_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f0.csv");
    fs::write(&path, "zero;300\n").unwrap();
    assert!(F0Override::load(&path).is_err());
}

#[test]
fn non_finite_estimates_become_unvoiced() {
    let mut f0 = F0Extractor::new(common::SR);
    f0.register(F0Method::Rmvpe, Box::new(NanEstimator));
    let audio = common::tone(200.0, 0.5, 0.5);
    let frames = audio.len() / 160;
    let curve = f0.pitch_curve(&audio, frames, 160, &PitchOptions::default());

    assert!(curve.hz.iter().all(|f| f.is_finite()));
    assert!(curve.voiced_count() < curve.len());
    assert!(curve.coarse().iter().all(|c| (1..=255).contains(c)));
}
