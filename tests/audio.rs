mod common;

use approx::assert_abs_diff_eq;
use tempfile::tempdir;
use voice_convert_core::core::audio::{
    limit_peak, load_audio_mono, read_audio, resample, resampled_len, write_wav_mono,
};

#[test]
fn reads_stereo_wav_and_downmixes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..1600 {
        w.write_sample(i16::MAX / 2).unwrap();
        w.write_sample(0i16).unwrap();
    }
    w.finalize().unwrap();

    let audio = read_audio(&path).unwrap();
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.sample_rate, 16_000);
    assert_eq!(audio.frames(), 1600);

    let mono = load_audio_mono(&path, 16_000).unwrap();
    assert_eq!(mono.len(), 1600);
    assert_abs_diff_eq!(mono[800], 0.25, epsilon = 1e-3);
}

#[test]
fn load_resamples_to_target_rate() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let src: Vec<f32> = (0..44_100)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin() * 0.5)
        .collect();
    write_wav_mono(&path, &src, 44_100).unwrap();

    let mono = load_audio_mono(&path, 16_000).unwrap();
    assert_eq!(mono.len(), resampled_len(44_100, 44_100, 16_000));
    assert_eq!(mono.len(), 16_000);
}

#[test]
fn resample_keeps_amplitude() {
    let x = common::tone(220.0, 1.0, 0.5);
    let y = resample(&x, 16_000, 40_000).unwrap();
    assert_eq!(y.len(), 40_000);
    let peak = y[4000..36_000].iter().fold(0.0f32, |a, s| a.max(s.abs()));
    assert_abs_diff_eq!(peak, 0.5, epsilon = 0.02);
}

#[test]
fn limit_peak_only_scales_loud_input() {
    let mut loud = vec![0.0, 1.9, -0.5];
    limit_peak(&mut loud, 0.95);
    assert_abs_diff_eq!(loud[1], 0.95, epsilon = 1e-6);
    assert_abs_diff_eq!(loud[2], -0.25, epsilon = 1e-6);

    let mut quiet = vec![0.1, -0.2];
    limit_peak(&mut quiet, 0.95);
    assert_eq!(quiet, vec![0.1, -0.2]);
}

#[test]
fn missing_file_is_an_error() {
    assert!(read_audio("/definitely/not/here.wav").is_err());
}
