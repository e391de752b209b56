//! Formant shifting at input preparation: the cepstral spectral envelope of
//! every STFT frame is stretched by the timbre factor while the fine
//! harmonic structure (and so the pitch) stays where it is.

use num_complex::Complex32;
use rustfft::num_traits::Zero;
use tracing::debug;

use crate::core::dsp::{fft_pair, istft, stft};

const N_FFT: usize = 1024;
const HOP: usize = 128;
const LOG_FLOOR: f32 = 1e-9;

/// Shifts the formants of `samples` by `timbre` (> 1 raises them). The
/// envelope is the cepstrum liftered at `quefrency_ms` milliseconds.
pub fn shift_formants(samples: &[f32], sample_rate: u32, quefrency_ms: f32, timbre: f32) -> Vec<f32> {
    if samples.is_empty() || (timbre - 1.0).abs() < 1e-6 {
        return samples.to_vec();
    }
    let half = N_FFT / 2;
    let lifter = ((quefrency_ms * 1e-3 * sample_rate as f32).round() as usize).clamp(1, half - 1);
    debug!(
        "formant shift: timbre {:.3}, lifter {} samples",
        timbre, lifter
    );

    let mut spec = stft(samples, N_FFT, HOP);
    let (fwd, inv) = fft_pair(N_FFT);
    let mut buf = vec![Complex32::zero(); N_FFT];

    for frame in spec.frames.iter_mut() {
        // Real cepstrum of the log magnitude spectrum.
        let log_mag: Vec<f32> = frame.iter().map(|c| c.norm().max(LOG_FLOOR).ln()).collect();
        for k in 0..N_FFT {
            let bin = if k <= half { k } else { N_FFT - k };
            buf[k] = Complex32::new(log_mag[bin], 0.0);
        }
        inv.process(&mut buf);
        let scale = 1.0 / N_FFT as f32;
        for (q, c) in buf.iter_mut().enumerate() {
            if q > lifter && q < N_FFT - lifter {
                *c = Complex32::zero();
            } else {
                *c *= scale;
            }
        }
        fwd.process(&mut buf);
        let envelope: Vec<f32> = buf[..=half].iter().map(|c| c.re).collect();

        for (k, bin) in frame.iter_mut().enumerate() {
            let warped = warp(&envelope, k as f32 / timbre);
            *bin *= (warped - envelope[k]).exp();
        }
    }

    istft(&spec, samples.len())
}

/// Linear read of `envelope` at fractional bin `pos`, clamped at the edges.
fn warp(envelope: &[f32], pos: f32) -> f32 {
    let last = envelope.len() - 1;
    if pos <= 0.0 {
        return envelope[0];
    }
    if pos >= last as f32 {
        return envelope[last];
    }
    let left = pos.floor() as usize;
    let frac = pos - left as f32;
    envelope[left] * (1.0 - frac) + envelope[left + 1] * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_timbre_is_identity() {
        let x: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.07).sin() * 0.3).collect();
        assert_eq!(shift_formants(&x, 16_000, 1.0, 1.0), x);
    }

    #[test]
    fn warp_clamps_at_edges() {
        let env = [0.0, 1.0, 2.0];
        assert_eq!(warp(&env, -1.0), 0.0);
        assert_eq!(warp(&env, 0.5), 0.5);
        assert_eq!(warp(&env, 5.0), 2.0);
    }
}
