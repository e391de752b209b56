//! Seams to the neural collaborators. The crate only orchestrates; the
//! embedder, generator and neural pitch trackers live behind these traits.

use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::{config::Precision, core::f0::F0Method, error::Result, model::checkpoint::ModelCheckpoint};

/// Content-embedding extractor.
pub trait Embedder: Send {
    /// Returns `(frames, width)` embeddings for 16 kHz mono audio.
    fn embed(&mut self, audio: &[f32], width: usize) -> Result<Array2<f32>>;

    /// Input samples advanced per output frame.
    fn hop_samples(&self) -> usize {
        320
    }
}

/// Pitch conditioning handed to the generator, both on the synthesis grid.
#[derive(Clone, Copy, Debug)]
pub struct PitchInput<'a> {
    pub coarse: &'a [i64],
    pub hz: &'a [f32],
}

/// Pitch-conditioned waveform generator.
pub trait Synthesizer: Send {
    /// `feats` is `(frames, width)` on the 100 fps grid; returns audio at the
    /// checkpoint's sample rate.
    fn infer(
        &mut self,
        feats: ArrayView2<'_, f32>,
        pitch: Option<PitchInput<'_>>,
        speaker_id: i64,
    ) -> Result<Vec<f32>>;
}

/// Neural F0 tracker.
pub trait PitchEstimator: Send {
    /// Per-hop F0 in Hz (`0.0` unvoiced); any length close to `ceil(len / hop)`.
    fn estimate(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
        hop_length: usize,
        f0_min: f32,
        f0_max: f32,
    ) -> Result<Vec<f32>>;
}

pub trait InferenceBackend {
    fn load_embedder(
        &self,
        id: &str,
        custom: Option<&Path>,
        precision: Precision,
    ) -> Result<Box<dyn Embedder>>;

    fn load_synthesizer(
        &self,
        checkpoint: &ModelCheckpoint,
        precision: Precision,
    ) -> Result<Box<dyn Synthesizer>>;

    /// `Ok(None)` when this backend has no estimator for `method`.
    fn load_pitch_estimator(&self, _method: &F0Method) -> Result<Option<Box<dyn PitchEstimator>>> {
        Ok(None)
    }
}
