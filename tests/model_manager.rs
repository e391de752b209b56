mod common;

use std::fs;

use tempfile::tempdir;
use voice_convert_core::{
    model::model_manager::ModelCache, model_information, ModelCheckpoint, ModelVersion, Precision,
};

use common::{write_checkpoint, MockBackend};

#[test]
fn checkpoint_reads_rate_speakers_and_weights() {
    let dir = tempdir().unwrap();
    let path = write_checkpoint(dir.path(), "tenor", 48_000, 1.0);
    let ckpt = ModelCheckpoint::load(&path).unwrap();
    assert_eq!(ckpt.target_sample_rate, 48_000);
    assert_eq!(ckpt.speakers, 4);
    assert!(ckpt.use_f0);
    assert_eq!(ckpt.version, ModelVersion::V2);
    assert_eq!(ckpt.embedding_width(), 768);
    assert_eq!(ckpt.weights_path, dir.path().join("tenor.onnx"));
}

#[test]
fn v1_checkpoint_with_string_rate() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("old.json");
    fs::write(
        &path,
        r#"{"config": [1, 109, 256, "40k"], "f0": 0, "weights": "/abs/old.onnx", "speakers": 2}"#,
    )
    .unwrap();
    let ckpt = ModelCheckpoint::load(&path).unwrap();
    assert_eq!(ckpt.target_sample_rate, 40_000);
    assert_eq!(ckpt.speakers, 2);
    assert!(!ckpt.use_f0);
    assert_eq!(ckpt.version, ModelVersion::V1);
    assert_eq!(ckpt.embedding_width(), 256);
}

#[test]
fn zero_speakers_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.json");
    fs::write(&path, r#"{"config": [0, 0, 40000], "weights": "w.onnx"}"#).unwrap();
    assert!(ModelCheckpoint::load(&path).is_err());
}

#[test]
fn information_lists_metadata() {
    let dir = tempdir().unwrap();
    let path = write_checkpoint(dir.path(), "tenor", 32_000, 1.0);
    let info = model_information(&path).unwrap();
    assert!(info.contains("Model name: tenor"));
    assert!(info.contains("Sample rate: 32000 Hz"));
    assert!(info.contains("Author: tests"));
}

#[test]
fn cache_evicts_on_switch_and_reuses_on_hit() {
    let dir = tempdir().unwrap();
    let a = write_checkpoint(dir.path(), "a", 40_000, 1.0);
    let b = write_checkpoint(dir.path(), "b", 48_000, 1.0);
    let backend = MockBackend::default();
    let mut cache = ModelCache::new();

    cache.ensure_model(&a, &backend, Precision::Full).unwrap();
    cache.ensure_model(&a, &backend, Precision::Full).unwrap();
    assert_eq!(cache.load_count(), 1);

    let handle = cache.ensure_model(&b, &backend, Precision::Full).unwrap();
    assert_eq!(handle.checkpoint.target_sample_rate, 48_000);
    assert_eq!(cache.current_path(), Some(b.canonicalize().unwrap().as_path()));

    cache.ensure_model(&a, &backend, Precision::Full).unwrap();
    assert_eq!(cache.load_count(), 3);
    assert_eq!(backend.synth_loads(), 3);

    cache.evict();
    assert!(!cache.is_loaded());
}

#[test]
fn failed_load_leaves_cache_empty() {
    let dir = tempdir().unwrap();
    let a = write_checkpoint(dir.path(), "a", 40_000, 1.0);
    let backend = MockBackend::default();
    let mut cache = ModelCache::new();
    cache.ensure_model(&a, &backend, Precision::Full).unwrap();
    assert!(cache
        .ensure_model(&dir.path().join("nope.json"), &backend, Precision::Full)
        .is_err());
    assert!(!cache.is_loaded());
}
