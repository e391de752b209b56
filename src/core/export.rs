use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Context;
use tempfile::tempdir;
use tracing::{info, warn};

use crate::{
    core::audio::{resample, write_wav_mono},
    error::Result,
    types::ExportFormat,
};

/// Rates compressed exports are snapped to.
pub const STANDARD_RATES: [u32; 9] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000,
];

/// Closest entry of [`STANDARD_RATES`]; ties go to the lower rate.
pub fn nearest_standard_rate(sample_rate: u32) -> u32 {
    STANDARD_RATES
        .iter()
        .copied()
        .min_by_key(|&r| (r as i64 - sample_rate as i64).abs())
        .unwrap_or(sample_rate)
}

/// Turns an uncompressed WAV into `format`.
pub trait AudioEncoder {
    fn encode(&self, wav: &Path, output: &Path, format: ExportFormat, sample_rate: u32) -> Result<()>;
}

/// Shells out to `ffmpeg` (or the program named by `VC_FFMPEG`).
pub struct FfmpegEncoder {
    pub program: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        let program = std::env::var("VC_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string());
        Self {
            program: PathBuf::from(program),
        }
    }
}

impl FfmpegEncoder {
    fn codec(format: ExportFormat) -> &'static str {
        match format {
            ExportFormat::Wav => "pcm_s16le",
            ExportFormat::Flac => "flac",
            ExportFormat::Mp3 => "libmp3lame",
            ExportFormat::Ogg => "libvorbis",
            ExportFormat::M4a => "aac",
            ExportFormat::Opus => "libopus",
        }
    }
}

impl AudioEncoder for FfmpegEncoder {
    fn encode(&self, wav: &Path, output: &Path, format: ExportFormat, sample_rate: u32) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(wav)
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg("-c:a")
            .arg(Self::codec(format))
            .arg(output)
            .status()
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        if !status.success() {
            return Err(anyhow::anyhow!(
                "{} exited with {} while encoding {}",
                self.program.display(),
                status,
                output.display()
            )
            .into());
        }
        Ok(())
    }
}

/// Writes `samples` next to `output` as WAV and, for other formats, converts
/// that WAV in place. Returns the final path and its sample rate.
pub fn export(
    samples: &[f32],
    sample_rate: u32,
    output: &Path,
    format: ExportFormat,
    encoder: &dyn AudioEncoder,
) -> Result<(PathBuf, u32)> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let wav_path = output.with_extension("wav");
    write_wav_mono(&wav_path, samples, sample_rate)?;
    if format.is_uncompressed() {
        return Ok((wav_path, sample_rate));
    }

    let target_rate = nearest_standard_rate(sample_rate);
    let final_path = output.with_extension(format.extension());
    info!(
        "converting {} to {} at {} Hz",
        wav_path.display(),
        format.extension(),
        target_rate
    );

    let scratch = tempdir()?;
    let staged = scratch.path().join("staged.wav");
    if target_rate == sample_rate {
        fs::copy(&wav_path, &staged)?;
    } else {
        let converted = resample(samples, sample_rate, target_rate)?;
        write_wav_mono(&staged, &converted, target_rate)?;
    }

    if let Err(e) = encoder.encode(&staged, &final_path, format, target_rate) {
        warn!("encoding failed, keeping {}", wav_path.display());
        return Err(e);
    }
    fs::remove_file(&wav_path)?;
    Ok((final_path, target_rate))
}
