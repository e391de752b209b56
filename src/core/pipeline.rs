//! Windowed conversion: cut long input at quiet points, run every chunk
//! through embedder, retrieval and generator, and butt-join the results.

use ndarray::s;
use tracing::{debug, error};

use crate::{
    config::PipelineConfig,
    core::{
        audio::limit_peak,
        dsp::{frame_rms, highpass_filtfilt, stretch_linear},
        embedder::{extract_features, upsample_frames},
        f0::{F0Extractor, PitchOptions},
        index::{retrieve_and_blend, SimilarityIndex},
        synth::SynthesizerAdapter,
    },
    error::{Result, VcError},
    io::progress::{emit_chunks, emit_convert_progress, ConvertProgress},
    model::backend::{Embedder, PitchInput},
    types::INTERNAL_SAMPLE_RATE,
};

/// Samples per synthesis frame at 16 kHz.
pub const WINDOW: usize = 160;

pub const OUTPUT_PEAK: f32 = 0.99;

const HIGHPASS_ORDER: usize = 5;
const HIGHPASS_CUTOFF: f32 = 48.0;

/// The collaborators one run drives.
pub struct Stages<'a> {
    pub embedder: &'a mut dyn Embedder,
    pub synthesizer: SynthesizerAdapter<'a>,
    pub f0: &'a mut F0Extractor,
    pub index: Option<&'a SimilarityIndex>,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub speaker_id: i64,
    pub use_f0: bool,
    pub embedding_width: usize,
    pub index_rate: f32,
    pub protect: f32,
    pub volume_envelope: f32,
    pub pitch: PitchOptions,
}

pub struct Pipeline {
    x_pad: usize,
    t_pad: usize,
    t_pad_tgt: usize,
    t_query: usize,
    t_center: usize,
    t_max: usize,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, model_rate: u32) -> Self {
        let sr = INTERNAL_SAMPLE_RATE as usize;
        Self {
            x_pad: config.x_pad as usize,
            t_pad: sr * config.x_pad as usize,
            t_pad_tgt: model_rate as usize * config.x_pad as usize,
            t_query: sr * config.x_query as usize,
            t_center: sr * config.x_center as usize,
            t_max: sr * config.x_max as usize,
        }
    }

    /// Cut positions in unpadded sample coordinates, each floored to a
    /// [`WINDOW`] multiple. Empty when the input is short enough to run whole.
    pub fn split_points(&self, audio: &[f32]) -> Vec<usize> {
        let half = reflect_pad(audio, WINDOW / 2);
        if half.len() <= self.t_max {
            return Vec::new();
        }
        // sums[i] covers audio[i - 80 .. i + 80].
        let n = half.len() - WINDOW;
        let mut sums = Vec::with_capacity(n);
        let mut acc: f32 = half[..WINDOW].iter().sum();
        sums.push(acc);
        for i in 1..n {
            acc += half[i + WINDOW - 1] - half[i - 1];
            sums.push(acc);
        }

        let mut points = Vec::new();
        let mut t = self.t_center;
        while t < audio.len() {
            let lo = t.saturating_sub(self.t_query);
            let hi = (t + self.t_query).min(sums.len());
            if lo < hi {
                let best = (lo..hi)
                    .min_by(|&a, &b| sums[a].abs().total_cmp(&sums[b].abs()))
                    .unwrap_or(lo);
                points.push(best / WINDOW * WINDOW);
            }
            t += self.t_center;
        }
        points
    }

    /// Converts 16 kHz mono `audio`; the result is at the adapter's output rate.
    pub fn run(&self, stages: &mut Stages<'_>, audio: &[f32], opts: &RunOptions) -> Result<Vec<f32>> {
        if audio.is_empty() {
            return Err(VcError::InvalidRequest("input audio is empty".into()));
        }
        let mut audio = audio.to_vec();
        highpass_filtfilt(&mut audio, HIGHPASS_ORDER, HIGHPASS_CUTOFF, INTERNAL_SAMPLE_RATE);

        let splits = self.split_points(&audio);
        let audio_pad = reflect_pad(&audio, self.t_pad);
        let p_len = audio_pad.len() / WINDOW;

        let pitch = if opts.use_f0 {
            emit_convert_progress(ConvertProgress::Stage("pitch"));
            let mut pitch_opts = opts.pitch.clone();
            pitch_opts.override_offset = self.x_pad * (INTERNAL_SAMPLE_RATE as usize / WINDOW);
            let curve = stages.f0.pitch_curve(&audio_pad, p_len, WINDOW, &pitch_opts);
            Some((curve.coarse(), curve.hz))
        } else {
            None
        };

        let total = splits.len() + 1;
        let mut output: Vec<f32> = Vec::new();
        let mut s = 0usize;
        let t_pad2 = 2 * self.t_pad;

        for (i, &t) in splits.iter().enumerate() {
            let end = (t + t_pad2 + WINDOW).min(audio_pad.len());
            let frames = (s / WINDOW, (t + t_pad2) / WINDOW);
            let chunk_pitch = pitch
                .as_ref()
                .map(|(c, hz)| (&c[frames.0..frames.1.min(c.len())], &hz[frames.0..frames.1.min(hz.len())]));
            let seg = self
                .voice_chunk(stages, &audio_pad[s..end], chunk_pitch, opts)
                .map_err(|e| {
                    error!("chunk {}/{} failed: {}", i + 1, total, e);
                    e
                })?;
            output.extend_from_slice(&seg);
            s = t;
            emit_chunks(i + 1, total);
        }

        let chunk_pitch = pitch
            .as_ref()
            .map(|(c, hz)| (&c[(s / WINDOW).min(c.len())..], &hz[(s / WINDOW).min(hz.len())..]));
        let seg = self
            .voice_chunk(stages, &audio_pad[s..], chunk_pitch, opts)
            .map_err(|e| {
                error!("chunk {}/{} failed: {}", total, total, e);
                e
            })?;
        output.extend_from_slice(&seg);
        emit_chunks(total, total);

        if opts.volume_envelope != 1.0 {
            change_rms(
                &audio,
                INTERNAL_SAMPLE_RATE,
                &mut output,
                stages.synthesizer.model_rate(),
                opts.volume_envelope,
            );
        }
        limit_peak(&mut output, OUTPUT_PEAK);
        debug!(
            "pipeline produced {} samples at {} Hz from {} chunks",
            output.len(),
            stages.synthesizer.model_rate(),
            total
        );
        stages.synthesizer.to_output_rate(output)
    }

    fn voice_chunk(
        &self,
        stages: &mut Stages<'_>,
        chunk: &[f32],
        pitch: Option<(&[i64], &[f32])>,
        opts: &RunOptions,
    ) -> Result<Vec<f32>> {
        let native = extract_features(stages.embedder, chunk, opts.embedding_width)?;
        let hop = stages.embedder.hop_samples();

        let protect = opts.protect < 0.5 && pitch.is_some();
        let native0 = protect.then(|| native.clone());
        let native = match stages.index {
            Some(index) if opts.index_rate > 0.0 => retrieve_and_blend(&native, index, opts.index_rate),
            _ => native,
        };

        let feats = upsample_frames(&native, hop, WINDOW);
        let mut p_len = (chunk.len() / WINDOW).min(feats.nrows());
        if let Some((coarse, hz)) = pitch {
            p_len = p_len.min(coarse.len()).min(hz.len());
        }
        if p_len == 0 {
            return Err(VcError::Synthesis(format!(
                "chunk of {} samples yields no frames",
                chunk.len()
            )));
        }
        let mut feats = feats.slice(s![..p_len, ..]).to_owned();

        if let (Some(native0), Some((_, hz))) = (native0, pitch) {
            let feats0 = upsample_frames(&native0, hop, WINDOW);
            for (i, (mut row, row0)) in feats.outer_iter_mut().zip(feats0.outer_iter()).enumerate() {
                let w = if hz[i] < 1.0 { opts.protect } else { 1.0 };
                for (x, x0) in row.iter_mut().zip(row0.iter()) {
                    *x = *x * w + x0 * (1.0 - w);
                }
            }
        }

        let pitch_in = pitch.map(|(coarse, hz)| PitchInput {
            coarse: &coarse[..p_len],
            hz: &hz[..p_len],
        });
        let out = stages
            .synthesizer
            .infer(feats.view(), pitch_in, opts.speaker_id)?;

        if out.len() <= 2 * self.t_pad_tgt {
            return Err(VcError::Synthesis(format!(
                "generator returned {} samples, padding alone is {}",
                out.len(),
                2 * self.t_pad_tgt
            )));
        }
        Ok(out[self.t_pad_tgt..out.len() - self.t_pad_tgt].to_vec())
    }
}

/// Blends the loudness envelope of `target` toward that of `source`:
/// `target *= rms_src^(1 - rate) * rms_tgt^(rate - 1)` on half-second frames.
pub fn change_rms(source: &[f32], source_rate: u32, target: &mut [f32], target_rate: u32, rate: f32) {
    let frame_src = (source_rate as usize / 2) * 2;
    let frame_tgt = (target_rate as usize / 2) * 2;
    let rms_src = frame_rms(source, frame_src, frame_src / 2);
    let rms_tgt = frame_rms(target, frame_tgt, frame_tgt / 2);
    let rms_src = stretch_linear(&rms_src, target.len());
    let rms_tgt = stretch_linear(&rms_tgt, target.len());
    for ((x, a), b) in target.iter_mut().zip(&rms_src).zip(&rms_tgt) {
        *x *= a.powf(1.0 - rate) * b.max(1e-6).powf(rate - 1.0);
    }
}

fn reflect_index(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let mut m = i.rem_euclid(period);
    if m >= n as isize {
        m = period - m;
    }
    m as usize
}

/// Mirror padding without repeating the edge sample.
pub fn reflect_pad(x: &[f32], pad: usize) -> Vec<f32> {
    if x.is_empty() {
        return vec![0.0; 2 * pad];
    }
    let n = x.len();
    (0..n + 2 * pad)
        .map(|i| x[reflect_index(i as isize - pad as isize, n)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_pad_mirrors_without_edge_repeat() {
        let v = reflect_pad(&[1.0, 2.0, 3.0], 2);
        assert_eq!(v, vec![3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn short_audio_is_not_split() {
        let p = Pipeline::new(&PipelineConfig::default(), 40_000);
        assert!(p.split_points(&vec![0.1; 16_000 * 10]).is_empty());
    }

    #[test]
    fn split_points_land_on_quiet_window_multiples() {
        let p = Pipeline::new(&PipelineConfig::default(), 40_000);
        let mut audio: Vec<f32> = (0..16_000 * 50)
            .map(|i| (i as f32 * 0.05).sin() * 0.5 + 0.2)
            .collect();
        // silent gap near 40 s
        for s in &mut audio[16_000 * 40..16_000 * 40 + 3200] {
            *s = 0.0;
        }
        let points = p.split_points(&audio);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0] % WINDOW, 0);
        let t = points[0];
        assert!(t >= 16_000 * 40 - WINDOW && t <= 16_000 * 40 + 3200, "{t}");
    }

    #[test]
    fn change_rms_rate_zero_carries_source_envelope() {
        // loud first second, quiet second second
        let mut src = vec![0.5f32; 16_000];
        src.extend(vec![0.05f32; 16_000]);
        let mut tgt = vec![0.2f32; 80_000];
        change_rms(&src, 16_000, &mut tgt, 40_000, 0.0);

        let head: f32 = tgt[4_000..16_000].iter().sum::<f32>() / 12_000.0;
        let tail: f32 = tgt[64_000..76_000].iter().sum::<f32>() / 12_000.0;
        assert!(head > 0.3, "{head}");
        assert!(tail < 0.15, "{tail}");
        assert!(head > 3.0 * tail);
    }

    #[test]
    fn change_rms_rate_one_is_identity() {
        let src = vec![0.5f32; 16_000];
        let mut tgt = vec![0.1f32; 40_000];
        change_rms(&src, 16_000, &mut tgt, 40_000, 1.0);
        assert!(tgt.iter().all(|&x| (x - 0.1).abs() < 1e-6));
    }
}
