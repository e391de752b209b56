mod common;

use std::fs;

use approx::assert_abs_diff_eq;
use tempfile::tempdir;
use voice_convert_core::core::{
    audio::{resample, write_wav_mono},
    segment::{detect_segments, layout_paths, merge, split_to_dir, SegmentManifest, MANIFEST_HEADER},
};

/// 2 s tone, 2 s silence, 2 s tone, 2 s silence, 2 s tone.
fn gapped_clip() -> Vec<f32> {
    let tone = common::tone(220.0, 2.0, 0.5);
    let gap = vec![0.0f32; 32_000];
    let mut clip = Vec::new();
    for part in [&tone, &gap, &tone, &gap, &tone] {
        clip.extend_from_slice(part);
    }
    clip
}

#[test]
fn detects_three_voiced_regions() {
    let spans = detect_segments(&gapped_clip(), 16_000);
    assert_eq!(spans.len(), 3);
    assert_eq!(spans[0].start, 0);
    assert_eq!(spans[1].start, 64_000);
    assert_eq!(spans[2].start, 128_000);
    for s in spans {
        assert_eq!(s.len, 32_000);
    }
}

#[test]
fn silent_input_is_one_segment() {
    let spans = detect_segments(&vec![0.0; 48_000], 16_000);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].len, 48_000);
}

#[test]
fn split_writes_chunks_and_manifest() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.wav");
    let clip = gapped_clip();

    let layout = split_to_dir(&input, &clip, 16_000).unwrap();
    let (chunk_dir, manifest_path) = layout_paths(&input);
    assert_eq!(layout.dir, chunk_dir);
    assert_eq!(manifest_path, dir.path().join("clip_timestamps.txt"));
    assert!(chunk_dir.join("chunk0.wav").exists());
    assert!(chunk_dir.join("chunk2.wav").exists());

    let text = fs::read_to_string(&manifest_path).unwrap();
    assert!(text.starts_with(MANIFEST_HEADER));
    let manifest = SegmentManifest::load(&manifest_path).unwrap();
    assert_eq!(manifest, layout.manifest);
    assert_eq!(manifest.total_samples, clip.len());
}

#[test]
fn merge_places_upsampled_segments_at_scaled_offsets() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.wav");
    let clip = gapped_clip();
    let layout = split_to_dir(&input, &clip, 16_000).unwrap();

    // stand-in conversion: every chunk becomes 40 kHz audio of the same duration
    for path in layout.segment_paths() {
        let audio = voice_convert_core::core::audio::load_audio_mono(&path, 16_000).unwrap();
        let up = resample(&audio, 16_000, 40_000).unwrap();
        write_wav_mono(&path, &up, 40_000).unwrap();
    }

    let (rate, merged) = merge(&layout).unwrap();
    assert_eq!(rate, 40_000);
    assert_eq!(merged.len(), 400_000);
    // the gaps stay silent
    for &s in &merged[85_000..155_000] {
        assert_abs_diff_eq!(s, 0.0, epsilon = 1e-6);
    }
    assert!(merged[160_000..240_000].iter().any(|s| s.abs() > 0.3));
}

#[test]
fn merge_rejects_mixed_rates() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.wav");
    let layout = split_to_dir(&input, &gapped_clip(), 16_000).unwrap();
    let paths = layout.segment_paths();
    write_wav_mono(&paths[1], &vec![0.1; 1000], 22_050).unwrap();
    assert!(merge(&layout).is_err());
}
