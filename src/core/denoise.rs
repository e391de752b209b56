//! Spectral-gating noise reduction.
//!
//! The noise profile is estimated from the quietest frames of the signal
//! itself: per frequency bin, `mean + STD_THRESHOLD * std` of their dB
//! magnitude. Bins above that threshold pass, the rest are attenuated by
//! `strength`. The binary mask is smoothed over neighbouring frames to avoid
//! musical noise.

use tracing::debug;

use crate::core::dsp::{istft, stft};

#[derive(Debug, Clone)]
pub struct DenoiseConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    /// Fraction of frames, quietest first, that define the noise profile.
    pub noise_quantile: f32,
    pub std_threshold: f32,
    /// Half-width, in frames, of the mask smoothing window.
    pub smooth_frames: usize,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop_length: 256,
            noise_quantile: 0.2,
            std_threshold: 1.5,
            smooth_frames: 2,
        }
    }
}

pub struct NoiseReducer {
    config: DenoiseConfig,
}

impl NoiseReducer {
    pub fn new(config: DenoiseConfig) -> Self {
        Self { config }
    }

    /// `strength` in `[0, 1]`; 0 returns the input unchanged.
    pub fn reduce(&self, samples: &[f32], strength: f32) -> Vec<f32> {
        let strength = strength.clamp(0.0, 1.0);
        let n_fft = self.config.n_fft;
        if strength == 0.0 || samples.len() < n_fft {
            return samples.to_vec();
        }

        let mut spec = stft(samples, n_fft, self.config.hop_length);
        let n_frames = spec.frames.len();
        let bins = spec.bins();

        let db: Vec<Vec<f32>> = spec
            .frames
            .iter()
            .map(|f| f.iter().map(|c| 20.0 * (c.norm() + 1e-10).log10()).collect())
            .collect();

        let thresholds = self.noise_thresholds(&spec.frames, &db, bins);

        let raw: Vec<Vec<f32>> = db
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .zip(&thresholds)
                    .map(|(v, t)| if v > t { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();

        let r = self.config.smooth_frames;
        for t in 0..n_frames {
            let lo = t.saturating_sub(r);
            let hi = (t + r + 1).min(n_frames);
            let count = (hi - lo) as f32;
            for k in 0..bins {
                let avg = (lo..hi).map(|u| raw[u][k]).sum::<f32>() / count;
                let gain = avg * strength + (1.0 - strength);
                spec.frames[t][k] *= gain;
            }
        }

        debug!(
            "noise reduction: {} frames, {} bins, strength {:.2}",
            n_frames, bins, strength
        );
        istft(&spec, samples.len())
    }

    fn noise_thresholds(
        &self,
        frames: &[Vec<num_complex::Complex32>],
        db: &[Vec<f32>],
        bins: usize,
    ) -> Vec<f32> {
        let mut order: Vec<(usize, f32)> = frames
            .iter()
            .enumerate()
            .map(|(i, f)| (i, f.iter().map(|c| c.norm_sqr()).sum::<f32>()))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        let take = ((frames.len() as f32 * self.config.noise_quantile).ceil() as usize)
            .clamp(1, frames.len());
        let quiet: Vec<usize> = order[..take].iter().map(|&(i, _)| i).collect();

        (0..bins)
            .map(|k| {
                let n = quiet.len() as f32;
                let mean = quiet.iter().map(|&i| db[i][k]).sum::<f32>() / n;
                let var = quiet.iter().map(|&i| (db[i][k] - mean).powi(2)).sum::<f32>() / n;
                mean + self.config.std_threshold * var.sqrt()
            })
            .collect()
    }
}

impl Default for NoiseReducer {
    fn default() -> Self {
        Self::new(DenoiseConfig::default())
    }
}

pub fn reduce_noise(samples: &[f32], strength: f32) -> Vec<f32> {
    NoiseReducer::default().reduce(samples, strength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_strength_is_identity() {
        let x: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(reduce_noise(&x, 0.0), x);
    }

    #[test]
    fn keeps_length() {
        let x: Vec<f32> = (0..5000).map(|i| ((i * 31 % 17) as f32 - 8.0) * 0.01).collect();
        assert_eq!(reduce_noise(&x, 0.7).len(), x.len());
    }
}
