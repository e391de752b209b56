use std::{fmt, path::{Path, PathBuf}, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    core::{effects::PostProcessSpec, f0::F0Method},
    error::{Result, VcError},
};

/// Sample rate every analysis stage runs at.
pub const INTERNAL_SAMPLE_RATE: u32 = 16_000;

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Checkpoint generation; selects the embedding width fed to the generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelVersion {
    #[default]
    V1,
    V2,
}

impl ModelVersion {
    pub fn embedding_width(self) -> usize {
        match self {
            ModelVersion::V1 => 256,
            ModelVersion::V2 => 768,
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVersion::V1 => f.write_str("v1"),
            ModelVersion::V2 => f.write_str("v2"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    #[default]
    Wav,
    Flac,
    Mp3,
    Ogg,
    M4a,
    Opus,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Flac => "flac",
            ExportFormat::Mp3 => "mp3",
            ExportFormat::Ogg => "ogg",
            ExportFormat::M4a => "m4a",
            ExportFormat::Opus => "opus",
        }
    }

    pub fn is_uncompressed(self) -> bool {
        matches!(self, ExportFormat::Wav)
    }
}

impl FromStr for ExportFormat {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(ExportFormat::Wav),
            "flac" => Ok(ExportFormat::Flac),
            "mp3" => Ok(ExportFormat::Mp3),
            "ogg" => Ok(ExportFormat::Ogg),
            "m4a" => Ok(ExportFormat::M4a),
            "opus" => Ok(ExportFormat::Opus),
            other => Err(VcError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Every per-call parameter of one conversion.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionRequest {
    pub model_path: PathBuf,
    /// Raw index path as typed by the caller; resolved with `resolve_index_path`.
    pub index_path: String,
    pub embedder_model: String,
    pub embedder_model_custom: Option<PathBuf>,
    pub speaker_id: i64,
    /// Pitch shift in semitones.
    pub pitch: i32,
    pub f0_method: F0Method,
    pub f0_file: Option<PathBuf>,
    /// Stretch the input's spectral envelope by `formant_timbre` before conversion.
    pub formant_shifting: bool,
    /// Cepstral lifter of the envelope estimate, in milliseconds.
    pub formant_quefrency: f32,
    pub formant_timbre: f32,
    pub index_rate: f32,
    pub volume_envelope: f32,
    pub protect: f32,
    pub hop_length: usize,
    pub filter_radius: usize,
    pub split_audio: bool,
    pub f0_autotune: bool,
    pub f0_autotune_strength: f32,
    pub clean_audio: bool,
    pub clean_strength: f32,
    pub export_format: ExportFormat,
    /// Requested output rate; values below 16 kHz keep the model's rate.
    pub resample_sr: u32,
    pub post_process: bool,
    pub effects: PostProcessSpec,
    pub normalize: bool,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            index_path: String::new(),
            embedder_model: "contentvec".into(),
            embedder_model_custom: None,
            speaker_id: 0,
            pitch: 0,
            f0_method: F0Method::Rmvpe,
            f0_file: None,
            formant_shifting: false,
            formant_quefrency: 1.0,
            formant_timbre: 1.0,
            index_rate: 0.75,
            volume_envelope: 1.0,
            protect: 0.5,
            hop_length: 128,
            filter_radius: 3,
            split_audio: false,
            f0_autotune: false,
            f0_autotune_strength: 1.0,
            clean_audio: false,
            clean_strength: 0.7,
            export_format: ExportFormat::Wav,
            resample_sr: 0,
            post_process: false,
            effects: PostProcessSpec::default(),
            normalize: false,
        }
    }
}

impl ConversionRequest {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let req: ConversionRequest = serde_json::from_str(&text)?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.index_rate) {
            return Err(VcError::InvalidRequest(format!(
                "index_rate must be in [0, 1], got {}",
                self.index_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.protect) {
            return Err(VcError::InvalidRequest(format!(
                "protect must be in [0, 1], got {}",
                self.protect
            )));
        }
        if !(0.0..=1.0).contains(&self.volume_envelope) {
            return Err(VcError::InvalidRequest(format!(
                "volume_envelope must be in [0, 1], got {}",
                self.volume_envelope
            )));
        }
        if !(0.0..=1.0).contains(&self.clean_strength) {
            return Err(VcError::InvalidRequest(format!(
                "clean_strength must be in [0, 1], got {}",
                self.clean_strength
            )));
        }
        if !(0.0..=1.0).contains(&self.f0_autotune_strength) {
            return Err(VcError::InvalidRequest(format!(
                "f0_autotune_strength must be in [0, 1], got {}",
                self.f0_autotune_strength
            )));
        }
        if self.formant_shifting {
            if !(self.formant_quefrency.is_finite() && self.formant_quefrency > 0.0) {
                return Err(VcError::InvalidRequest(format!(
                    "formant_quefrency must be positive, got {}",
                    self.formant_quefrency
                )));
            }
            if !(0.25..=4.0).contains(&self.formant_timbre) {
                return Err(VcError::InvalidRequest(format!(
                    "formant_timbre must be in [0.25, 4], got {}",
                    self.formant_timbre
                )));
            }
        }
        if self.hop_length == 0 {
            return Err(VcError::InvalidRequest("hop_length must be positive".into()));
        }
        self.effects
            .validate()
            .map_err(VcError::InvalidRequest)?;
        Ok(())
    }

    /// Output rate the caller asked for, if it passes the 16 kHz floor.
    pub fn requested_output_rate(&self) -> Option<u32> {
        (self.resample_sr >= INTERNAL_SAMPLE_RATE).then_some(self.resample_sr)
    }
}

#[derive(Clone, Debug)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    pub sample_rate: u32,
    pub samples: usize,
    pub segments: usize,
}

#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub converted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}
