mod common;

use tempfile::tempdir;
use voice_convert_core::{
    core::{
        audio::resampled_len,
        export::{export, nearest_standard_rate},
    },
    ExportFormat,
};

use common::{wav_info, CopyEncoder, FailingEncoder};

#[test]
fn wav_export_keeps_rate_and_length() {
    let dir = tempdir().unwrap();
    let samples = common::noise(40_000, 0.5);
    let (path, rate) = export(
        &samples,
        40_000,
        &dir.path().join("out.wav"),
        ExportFormat::Wav,
        &CopyEncoder,
    )
    .unwrap();
    assert_eq!(rate, 40_000);
    assert_eq!(wav_info(&path), (40_000, 40_000));
}

#[test]
fn compressed_export_snaps_to_standard_rate() {
    let dir = tempdir().unwrap();
    let n = 44_099;
    let samples = common::noise(n, 0.5);
    let (path, rate) = export(
        &samples,
        44_099,
        &dir.path().join("take.wav"),
        ExportFormat::Mp3,
        &CopyEncoder,
    )
    .unwrap();

    assert_eq!(rate, 44_100);
    assert_eq!(path, dir.path().join("take.mp3"));
    assert!(!dir.path().join("take.wav").exists(), "intermediate wav left behind");

    let (decoded_rate, frames) = wav_info(&path);
    assert_eq!(decoded_rate, 44_100);
    assert_eq!(frames, resampled_len(n, 44_099, 44_100));
    let in_secs = n as f64 / 44_099.0;
    let out_secs = frames as f64 / 44_100.0;
    assert!((in_secs - out_secs).abs() <= 1.0 / 44_100.0);
}

#[test]
fn failed_encode_keeps_the_wav() {
    let dir = tempdir().unwrap();
    let samples = common::noise(1_000, 0.5);
    let result = export(
        &samples,
        16_000,
        &dir.path().join("x.flac"),
        ExportFormat::Flac,
        &FailingEncoder,
    );
    assert!(result.is_err());
    assert!(dir.path().join("x.wav").exists());
    assert!(!dir.path().join("x.flac").exists());
}

#[test]
fn nearest_rate_prefers_lower_on_ties() {
    // 12000 and 16000 are equidistant from 14000
    assert_eq!(nearest_standard_rate(14_000), 12_000);
    assert_eq!(nearest_standard_rate(22_000), 22_050);
    assert_eq!(nearest_standard_rate(4_000), 8_000);
}
