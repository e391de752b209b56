use ndarray::ArrayView2;
use tracing::debug;

use crate::{
    core::audio::resample,
    error::{Result, VcError},
    model::backend::{PitchInput, Synthesizer},
    types::INTERNAL_SAMPLE_RATE,
};

/// Wraps the generator call and the optional conversion to a caller rate.
pub struct SynthesizerAdapter<'a> {
    synthesizer: &'a mut dyn Synthesizer,
    model_rate: u32,
    output_rate: u32,
}

impl<'a> SynthesizerAdapter<'a> {
    /// A requested rate below 16 kHz is ignored and the model rate kept.
    pub fn new(
        synthesizer: &'a mut dyn Synthesizer,
        model_rate: u32,
        requested_rate: Option<u32>,
    ) -> Self {
        let output_rate = requested_rate
            .filter(|&r| r >= INTERNAL_SAMPLE_RATE)
            .unwrap_or(model_rate);
        Self {
            synthesizer,
            model_rate,
            output_rate,
        }
    }

    pub fn model_rate(&self) -> u32 {
        self.model_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// One generator call; audio comes back at the model rate.
    pub fn infer(
        &mut self,
        feats: ArrayView2<'_, f32>,
        pitch: Option<PitchInput<'_>>,
        speaker_id: i64,
    ) -> Result<Vec<f32>> {
        if let Some(p) = &pitch {
            if p.coarse.len() < feats.nrows() || p.hz.len() < feats.nrows() {
                return Err(VcError::Synthesis(format!(
                    "pitch covers {} frames, features {}",
                    p.coarse.len().min(p.hz.len()),
                    feats.nrows()
                )));
            }
        }
        let audio = self
            .synthesizer
            .infer(feats, pitch, speaker_id)
            .map_err(|e| match e {
                VcError::Synthesis(_) => e,
                other => VcError::Synthesis(other.to_string()),
            })?;
        if audio.iter().any(|s| !s.is_finite()) {
            return Err(VcError::Synthesis("generator produced non-finite samples".into()));
        }
        Ok(audio)
    }

    /// Converts the stitched output to the output rate when it differs.
    pub fn to_output_rate(&self, audio: Vec<f32>) -> Result<Vec<f32>> {
        if self.output_rate == self.model_rate {
            return Ok(audio);
        }
        debug!("resampling output {} Hz -> {} Hz", self.model_rate, self.output_rate);
        resample(&audio, self.model_rate, self.output_rate)
    }
}
