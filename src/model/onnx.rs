//! ONNX Runtime backend for exported embedder and generator graphs.

use crate::{
    config::Precision,
    error::{Result, VcError},
    model::{
        backend::{Embedder, InferenceBackend, PitchEstimator, PitchInput, Synthesizer},
        checkpoint::ModelCheckpoint,
    },
    core::{dsp::stretch_linear, f0::F0Method},
};

use anyhow::anyhow;
use ndarray::{Array2, ArrayView2};
use once_cell::sync::OnceCell;
use ort::{
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::{Tensor, Value},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static ORT_INIT: OnceCell<()> = OnceCell::new();

/// Latent noise channels the exported generator expects.
const NOISE_CHANNELS: usize = 192;

/// Frame rate of the exported pitch graphs (10 ms at 16 kHz).
const PITCH_GRAPH_HOP: usize = 160;

/// Opens the graph for `base` at `precision`. Half precision needs an
/// fp16 export (`<stem>.fp16.onnx`, float32 inputs and outputs) next to it.
fn open_graph(base: &Path, precision: Precision) -> Result<Session> {
    let path = precision.graph_path(base);
    if precision.is_half() && !path.exists() {
        return Err(VcError::model(
            base,
            format!("half precision requested but {} is missing", path.display()),
        ));
    }
    open_session(&path)
}

fn open_session(path: &Path) -> Result<Session> {
    // Pin error type so `?` is unambiguous.
    ORT_INIT.get_or_try_init::<_, VcError>(|| {
        ort::init().commit().map_err(VcError::from)?;
        Ok(())
    })?;

    if !path.exists() {
        return Err(VcError::model(path, "onnx graph not found"));
    }
    let session = SessionBuilder::new()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)?;
    Ok(session)
}

fn input_name(session: &Session, wanted: &str) -> Result<String> {
    session
        .inputs
        .iter()
        .find(|i| i.name == wanted)
        .map(|i| i.name.clone())
        .ok_or_else(|| anyhow!("Model missing input '{wanted}'").into())
}

/// Looks embedders up as `<embedder_dir>/<id>.onnx` unless a custom path is given.
pub struct OnnxBackend {
    pub embedder_dir: PathBuf,
}

impl OnnxBackend {
    pub fn new(embedder_dir: impl Into<PathBuf>) -> Self {
        Self {
            embedder_dir: embedder_dir.into(),
        }
    }
}

impl InferenceBackend for OnnxBackend {
    fn load_embedder(
        &self,
        id: &str,
        custom: Option<&Path>,
        precision: Precision,
    ) -> Result<Box<dyn Embedder>> {
        let path = match custom {
            Some(p) => p.to_path_buf(),
            None => self.embedder_dir.join(format!("{id}.onnx")),
        };
        let session =
            open_graph(&path, precision).map_err(|e| VcError::Embedder(e.to_string()))?;
        info!("embedder {} loaded ({:?})", path.display(), precision);
        Ok(Box::new(OnnxEmbedder { session }))
    }

    fn load_synthesizer(
        &self,
        checkpoint: &ModelCheckpoint,
        precision: Precision,
    ) -> Result<Box<dyn Synthesizer>> {
        let session = open_graph(&checkpoint.weights_path, precision)?;
        debug!(
            "generator {} loaded ({:?})",
            checkpoint.weights_path.display(),
            precision
        );
        Ok(Box::new(OnnxSynthesizer {
            session,
            rng: StdRng::seed_from_u64(0),
        }))
    }

    /// Neural trackers live next to the embedders as `rmvpe.onnx`,
    /// `fcpe.onnx`, `crepe_full.onnx` and `crepe_tiny.onnx`.
    fn load_pitch_estimator(&self, method: &F0Method) -> Result<Option<Box<dyn PitchEstimator>>> {
        let file = match method {
            F0Method::Rmvpe => "rmvpe.onnx",
            F0Method::Fcpe => "fcpe.onnx",
            F0Method::Crepe => "crepe_full.onnx",
            F0Method::CrepeTiny => "crepe_tiny.onnx",
            _ => return Ok(None),
        };
        let path = self.embedder_dir.join(file);
        if !path.exists() {
            debug!("no pitch graph at {}", path.display());
            return Ok(None);
        }
        let session = open_session(&path)?;
        info!("pitch estimator {} loaded from {}", method, path.display());
        Ok(Some(Box::new(OnnxPitchEstimator { session })))
    }
}

/// Waveform-in, Hz-out pitch graph: input `waveform` `[1, samples]` at 16 kHz,
/// first output one F0 value per 160 samples (`0` unvoiced).
struct OnnxPitchEstimator {
    session: Session,
}

impl PitchEstimator for OnnxPitchEstimator {
    fn estimate(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
        hop_length: usize,
        f0_min: f32,
        f0_max: f32,
    ) -> Result<Vec<f32>> {
        if sample_rate != 16_000 {
            return Err(anyhow!("pitch graph expects 16 kHz input, got {sample_rate}").into());
        }
        let waveform: Value = Tensor::from_array((vec![1, audio.len()], audio.to_vec()))?.into_dyn();
        let name = input_name(&self.session, "waveform")?;
        let outputs = self.session.run(vec![(name, waveform)])?;
        let f0: Value = outputs
            .into_iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| anyhow!("pitch graph returned no output"))?;
        let (_shape, data) = f0.try_extract_tensor::<f32>()?;

        Ok(align_pitch_frames(data, audio.len(), hop_length, f0_min, f0_max))
    }
}

/// Puts graph output (one value per 160 samples) on the `hop_length` grid
/// and zeroes anything outside `[f0_min, f0_max]`.
fn align_pitch_frames(data: &[f32], len: usize, hop_length: usize, f0_min: f32, f0_max: f32) -> Vec<f32> {
    let frames = len.div_ceil(hop_length.max(1));
    let on_grid = if hop_length == PITCH_GRAPH_HOP {
        let mut v = data.to_vec();
        v.resize(frames, 0.0);
        v
    } else {
        stretch_linear(data, frames)
    };
    on_grid
        .into_iter()
        .map(|hz| if hz.is_finite() && hz >= f0_min && hz <= f0_max { hz } else { 0.0 })
        .collect()
}

struct OnnxEmbedder {
    session: Session,
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, audio: &[f32], width: usize) -> Result<Array2<f32>> {
        let source: Value = Tensor::from_array((vec![1, audio.len()], audio.to_vec()))?.into_dyn();
        let name = input_name(&self.session, "source")?;
        let outputs = self.session.run(vec![(name, source)])?;

        let feats: Value = outputs
            .into_iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| anyhow!("embedder returned no output"))?;
        let (_shape, data) = feats.try_extract_tensor::<f32>()?;
        if width == 0 || data.len() % width != 0 {
            return Err(VcError::Embedder(format!(
                "embedder output of {} values is not a multiple of width {}",
                data.len(),
                width
            )));
        }
        let frames = data.len() / width;
        Ok(Array2::from_shape_vec((frames, width), data.to_vec())?)
    }
}

struct OnnxSynthesizer {
    session: Session,
    rng: StdRng,
}

impl OnnxSynthesizer {
    /// Standard normal noise via Box-Muller.
    fn noise(&mut self, n: usize) -> Vec<f32> {
        (0..n)
            .map(|_| {
                let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
                let u2: f32 = self.rng.gen();
                (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
            })
            .collect()
    }
}

impl Synthesizer for OnnxSynthesizer {
    fn infer(
        &mut self,
        feats: ArrayView2<'_, f32>,
        pitch: Option<PitchInput<'_>>,
        speaker_id: i64,
    ) -> Result<Vec<f32>> {
        let (frames, width) = feats.dim();
        let phone: Vec<f32> = feats.iter().copied().collect();

        let mut inputs: Vec<(String, Value)> = vec![
            (
                input_name(&self.session, "phone")?,
                Tensor::from_array((vec![1, frames, width], phone))?.into_dyn(),
            ),
            (
                input_name(&self.session, "phone_lengths")?,
                Tensor::from_array((vec![1], vec![frames as i64]))?.into_dyn(),
            ),
            (
                input_name(&self.session, "ds")?,
                Tensor::from_array((vec![1], vec![speaker_id]))?.into_dyn(),
            ),
        ];
        if let Some(p) = pitch {
            inputs.push((
                input_name(&self.session, "pitch")?,
                Tensor::from_array((vec![1, frames], p.coarse[..frames].to_vec()))?.into_dyn(),
            ));
            inputs.push((
                input_name(&self.session, "pitchf")?,
                Tensor::from_array((vec![1, frames], p.hz[..frames].to_vec()))?.into_dyn(),
            ));
        }
        let rnd = self.noise(NOISE_CHANNELS * frames);
        inputs.push((
            input_name(&self.session, "rnd")?,
            Tensor::from_array((vec![1, NOISE_CHANNELS, frames], rnd))?.into_dyn(),
        ));

        let outputs = self.session.run(inputs)?;
        let audio: Value = outputs
            .into_iter()
            .find_map(|(name, v)| if name == "audio" { Some(v) } else { None })
            .ok_or_else(|| anyhow!("Model did not return 'audio' output"))?;
        let (_shape, data) = audio.try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_without_fp16_graph_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("hubert_base.onnx");
        std::fs::write(&base, b"not a graph").unwrap();
        let Err(err) = open_graph(&base, Precision::Half) else {
            panic!("half precision opened without an fp16 graph");
        };
        assert!(err.to_string().contains("fp16"), "{err}");
    }

    #[test]
    fn missing_pitch_graph_defers_to_native_trackers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OnnxBackend::new(dir.path());
        assert!(backend.load_pitch_estimator(&F0Method::Rmvpe).unwrap().is_none());
        assert!(backend.load_pitch_estimator(&F0Method::Yin).unwrap().is_none());
    }

    #[test]
    fn pitch_frames_follow_the_requested_hop() {
        let data = [200.0, f32::NAN, 2000.0, 220.0];
        assert_eq!(
            align_pitch_frames(&data, 160 * 6, 160, 50.0, 1100.0),
            vec![200.0, 0.0, 0.0, 220.0, 0.0, 0.0]
        );

        let flat = [300.0; 8];
        let coarse = align_pitch_frames(&flat, 160 * 8, 320, 50.0, 1100.0);
        assert_eq!(coarse.len(), 4);
        assert!(coarse.iter().all(|&hz| (hz - 300.0).abs() < 1e-3));
    }
}
