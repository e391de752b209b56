mod common;

use std::{fs, path::PathBuf};

use tempfile::tempdir;
use voice_convert_core::{
    set_convert_progress_callback, ConversionRequest, ConvertProgress, PipelineConfig, VcError,
    VoiceConverter,
};

use common::{write_checkpoint, write_wav, CopyEncoder, MockBackend};

fn setup(files: &[&str]) -> (tempfile::TempDir, PathBuf, PathBuf, ConversionRequest) {
    let dir = tempdir().unwrap();
    let model = write_checkpoint(dir.path(), "alto", 40_000, 1.0);
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&input_dir).unwrap();
    for name in files {
        write_wav(&input_dir.join(name), &common::tone(200.0, 0.5, 0.5), 16_000);
    }
    fs::write(input_dir.join("readme.txt"), "not audio").unwrap();
    let req = ConversionRequest {
        model_path: model,
        ..ConversionRequest::default()
    };
    (dir, input_dir, output_dir, req)
}

fn converter() -> VoiceConverter {
    VoiceConverter::new(Box::new(MockBackend::default()), PipelineConfig::default())
        .unwrap()
        .with_encoder(Box::new(CopyEncoder))
}

#[test]
fn converts_in_order_and_skips_existing_outputs() {
    let (dir, input_dir, output_dir, req) = setup(&["b.wav", "a.wav", "c.wav"]);
    fs::create_dir_all(&output_dir).unwrap();
    fs::write(output_dir.join("b_output.wav"), "already there").unwrap();
    let pid = dir.path().join("batch.pid");

    let report = converter()
        .convert_batch(&input_dir, &output_dir, &pid, &req)
        .unwrap();

    assert_eq!(
        report.converted,
        vec![output_dir.join("a_output.wav"), output_dir.join("c_output.wav")]
    );
    assert_eq!(report.skipped, vec![output_dir.join("b_output.wav")]);
    assert_eq!(fs::read_to_string(output_dir.join("b_output.wav")).unwrap(), "already there");
    assert!(!pid.exists(), "marker must be removed after a finished batch");
}

#[test]
fn removing_the_marker_cancels_the_batch() {
    let (dir, input_dir, output_dir, req) = setup(&["one.wav", "two.wav", "three.wav"]);
    let pid = dir.path().join("cancel.pid");

    let marker = pid.clone();
    set_convert_progress_callback(move |p| {
        if let ConvertProgress::Batch { done: 1, .. } = p {
            let _ = fs::remove_file(&marker);
        }
    });

    let err = converter()
        .convert_batch(&input_dir, &output_dir, &pid, &req)
        .unwrap_err();
    assert!(matches!(err, VcError::Cancelled { .. }), "{err}");
    assert!(!output_dir.join("two_output.wav").exists());
}

#[test]
fn failing_file_aborts_and_keeps_marker() {
    let (dir, input_dir, output_dir, mut req) = setup(&["a.wav"]);
    req.model_path = dir.path().join("missing.json");
    let pid = dir.path().join("fail.pid");

    let result = converter().convert_batch(&input_dir, &output_dir, &pid, &req);
    assert!(result.is_err());
    assert!(pid.exists());
    assert!(!output_dir.join("a_output.wav").exists());
}
