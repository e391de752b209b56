use std::{fs::File, path::Path};

use anyhow::Context;
use hound::WavWriter;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use crate::{
    error::{Result, VcError},
    types::AudioData,
};

/// Peak the model input is scaled down to when it exceeds it.
pub const INPUT_PEAK: f32 = 0.95;

const RESAMPLE_CHUNK: usize = 1024;

pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();

    let file: File =
        File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;

    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format.default_track().context("No default track found")?;
    let track_id = track.id;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!("skipping undecodable packet in {}: {}", path.display(), msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    if sample_rate == 0 || channels == 0 {
        return Err(anyhow::anyhow!("Could not determine audio format of {:?}", path).into());
    }

    debug!(
        "read audio {}: sample_rate={}, channels={}, samples={}",
        path.display(),
        sample_rate,
        channels,
        samples.len()
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Writes 16-bit PCM, clamping to the representable range.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for sample in &audio.samples {
        let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s)?;
    }

    writer.finalize()?;
    Ok(())
}

pub fn write_wav_mono<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    write_audio(path, &AudioData::mono(samples.to_vec(), sample_rate))
}

pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|chunk| chunk.iter().copied().sum::<f32>() / channels as f32)
        .collect()
}

/// Decodes any supported container into a mono buffer at `target_sr`.
pub fn load_audio_mono<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<Vec<f32>> {
    let audio = read_audio(path)?;
    let mono = downmix_to_mono(&audio.samples, audio.channels);
    resample(&mono, audio.sample_rate, target_sr)
}

/// Scales the buffer down so its peak is at most `peak`. Quieter input is untouched.
pub fn limit_peak(samples: &mut [f32], peak: f32) {
    let max = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let ratio = max / peak;
    if ratio > 1.0 {
        for s in samples.iter_mut() {
            *s /= ratio;
        }
    }
}

/// Scales the buffer so its peak equals `peak` exactly (silence is left alone).
pub fn normalize_peak(samples: &mut [f32], peak: f32) {
    let max = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if max <= f32::EPSILON {
        return;
    }
    let gain = peak / max;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Expected length of `len` samples converted from `from` Hz to `to` Hz.
pub fn resampled_len(len: usize, from: u32, to: u32) -> usize {
    if from == 0 {
        return 0;
    }
    ((len as u64 * to as u64 + from as u64 / 2) / from as u64) as usize
}

/// Band-limited sinc resampling. The resampler delay is compensated so the
/// output is time-aligned and exactly `resampled_len` samples long.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from == 0 || to == 0 {
        return Err(VcError::InvalidRequest(format!(
            "cannot resample {} Hz -> {} Hz",
            from, to
        )));
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to as f64 / from as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)?;

    let expected = resampled_len(samples.len(), from, to);
    let delay = resampler.output_delay();
    let mut out: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut pos = 0usize;
    while pos + resampler.input_frames_next() <= samples.len() {
        let n = resampler.input_frames_next();
        let block = resampler.process(&[&samples[pos..pos + n]][..], None)?;
        out.extend_from_slice(&block[0]);
        pos += n;
    }
    if pos < samples.len() {
        let tail: [&[f32]; 1] = [&samples[pos..]];
        let block = resampler.process_partial(Some(&tail[..]), None)?;
        out.extend_from_slice(&block[0]);
    }
    // Flush the filter tail until the delayed signal is fully out.
    while out.len() < expected + delay {
        let block = resampler.process_partial::<&[f32]>(None, None)?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    let start = delay.min(out.len());
    let end = (delay + expected).min(out.len());
    let mut trimmed = out[start..end].to_vec();
    trimmed.resize(expected, 0.0);
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let inter = vec![1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix_to_mono(&inter, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn limit_peak_leaves_quiet_audio() {
        let mut v = vec![0.1, -0.2];
        limit_peak(&mut v, INPUT_PEAK);
        assert_eq!(v, vec![0.1, -0.2]);
    }

    #[test]
    fn limit_peak_scales_loud_audio() {
        let mut v = vec![0.5, -1.9];
        limit_peak(&mut v, INPUT_PEAK);
        let peak = v.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!((peak - INPUT_PEAK).abs() < 1e-6);
    }

    #[test]
    fn resampled_len_rounds() {
        assert_eq!(resampled_len(16_000, 16_000, 40_000), 40_000);
        assert_eq!(resampled_len(441, 44_100, 16_000), 160);
    }
}
