#![allow(dead_code)]

use std::{
    f32::consts::PI,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use ndarray::{Array2, ArrayView2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;

use voice_convert_core::{
    AudioEncoder, Embedder, ExportFormat, F0Method, InferenceBackend, ModelCheckpoint,
    PitchEstimator, PitchInput, Precision, Result, Synthesizer, VcError,
};

pub const SR: u32 = 16_000;

/// One 320-sample frame per row; every column is the frame mean plus a
/// column-dependent offset.
pub struct MockEmbedder;

impl Embedder for MockEmbedder {
    fn embed(&mut self, audio: &[f32], width: usize) -> Result<Array2<f32>> {
        let frames = audio.len() / 320;
        Ok(Array2::from_shape_fn((frames, width), |(f, j)| {
            let chunk = &audio[f * 320..(f + 1) * 320];
            chunk.iter().sum::<f32>() / 320.0 + j as f32 * 1e-3
        }))
    }
}

/// Emits `rate / 100` samples per feature frame: a 220 Hz tone scaled by the
/// checkpoint's `config[0]` gain.
pub struct MockSynthesizer {
    pub rate: u32,
    pub gain: f32,
}

impl Synthesizer for MockSynthesizer {
    fn infer(
        &mut self,
        feats: ArrayView2<'_, f32>,
        pitch: Option<PitchInput<'_>>,
        _speaker_id: i64,
    ) -> Result<Vec<f32>> {
        if let Some(p) = pitch {
            assert_eq!(p.coarse.len(), feats.nrows());
            assert!(p.coarse.iter().all(|&c| (1..=255).contains(&c)));
        }
        let n = feats.nrows() * (self.rate as usize / 100);
        Ok((0..n)
            .map(|i| self.gain * 0.5 * (2.0 * PI * 220.0 * i as f32 / self.rate as f32).sin())
            .collect())
    }
}

/// Constant 200 Hz with a voiced frame count of `ceil(len / hop)`.
pub struct MockPitch;

impl PitchEstimator for MockPitch {
    fn estimate(
        &mut self,
        audio: &[f32],
        _sample_rate: u32,
        hop_length: usize,
        _f0_min: f32,
        _f0_max: f32,
    ) -> Result<Vec<f32>> {
        Ok(vec![200.0; audio.len().div_ceil(hop_length)])
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    pub embedder_loads: Arc<AtomicUsize>,
    pub synth_loads: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn synth_loads(&self) -> usize {
        self.synth_loads.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for MockBackend {
    fn load_embedder(
        &self,
        id: &str,
        _custom: Option<&Path>,
        _precision: Precision,
    ) -> Result<Box<dyn Embedder>> {
        if id == "missing" {
            return Err(VcError::Embedder(format!("no embedder '{id}'")));
        }
        self.embedder_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEmbedder))
    }

    fn load_synthesizer(
        &self,
        checkpoint: &ModelCheckpoint,
        _precision: Precision,
    ) -> Result<Box<dyn Synthesizer>> {
        self.synth_loads.fetch_add(1, Ordering::SeqCst);
        let gain = checkpoint.config[0].as_f64().unwrap_or(1.0) as f32;
        Ok(Box::new(MockSynthesizer {
            rate: checkpoint.target_sample_rate,
            gain,
        }))
    }

    fn load_pitch_estimator(&self, method: &F0Method) -> Result<Option<Box<dyn PitchEstimator>>> {
        match method {
            F0Method::Rmvpe => Ok(Some(Box::new(MockPitch))),
            _ => Ok(None),
        }
    }
}

/// "Encodes" by copying the staged WAV, so outputs stay readable with hound.
pub struct CopyEncoder;

impl AudioEncoder for CopyEncoder {
    fn encode(&self, wav: &Path, output: &Path, _format: ExportFormat, _sample_rate: u32) -> Result<()> {
        fs::copy(wav, output)?;
        Ok(())
    }
}

pub struct FailingEncoder;

impl AudioEncoder for FailingEncoder {
    fn encode(&self, _wav: &Path, output: &Path, _format: ExportFormat, _sample_rate: u32) -> Result<()> {
        Err(VcError::UnsupportedFormat(output.display().to_string()))
    }
}

/// Writes a checkpoint manifest `<dir>/<name>.json` and returns its path.
pub fn write_checkpoint(dir: &Path, name: &str, rate: u32, gain: f32) -> PathBuf {
    let path = dir.join(format!("{name}.json"));
    let body = json!({
        "config": [gain, 4, 0, rate],
        "f0": 1,
        "version": "v2",
        "weights": format!("{name}.onnx"),
        "author": "tests",
    });
    fs::write(&path, body.to_string()).unwrap();
    path
}

pub fn tone(freq: f32, secs: f32, amp: f32) -> Vec<f32> {
    let n = (secs * SR as f32) as usize;
    (0..n)
        .map(|i| amp * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

pub fn noise(len: usize, amp: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..len).map(|_| rng.gen_range(-amp..amp)).collect()
}

pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        w.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).unwrap();
    }
    w.finalize().unwrap();
}

/// `(sample_rate, frames)` of a mono WAV.
pub fn wav_info(path: &Path) -> (u32, usize) {
    let r = hound::WavReader::open(path).unwrap();
    let spec = r.spec();
    (spec.sample_rate, r.duration() as usize)
}
