use num_complex::Complex32;
use once_cell::sync::Lazy;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::{
    collections::HashMap,
    f32::consts::PI,
    sync::{Arc, Mutex},
};

#[derive(Clone)]
struct FftCache {
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    hann_window: Arc<Vec<f32>>,
}

static FFT_CACHE: Lazy<Mutex<HashMap<usize, FftCache>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn fft_cache(n_fft: usize) -> FftCache {
    let mut guard = match FFT_CACHE.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard
        .entry(n_fft)
        .or_insert_with(|| {
            let mut planner = FftPlanner::new();
            FftCache {
                fft_forward: planner.plan_fft_forward(n_fft),
                fft_inverse: planner.plan_fft_inverse(n_fft),
                hann_window: Arc::new(compute_hann(n_fft)),
            }
        })
        .clone()
}

/// Planned forward/inverse transforms for `n_fft`, shared process-wide.
pub fn fft_pair(n_fft: usize) -> (Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>) {
    let cache = fft_cache(n_fft);
    (cache.fft_forward, cache.fft_inverse)
}

pub fn compute_hann(n_fft: usize) -> Vec<f32> {
    if n_fft <= 1 {
        return vec![1.0];
    }
    let denom = (n_fft - 1) as f32;
    (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * (i as f32) / denom).cos())
        .collect()
}

/// Complex spectrogram stored frame-major: `frames[t][k]`, `k` in `0..=n_fft/2`.
#[derive(Clone, Debug)]
pub struct Spectrogram {
    pub frames: Vec<Vec<Complex32>>,
    pub n_fft: usize,
    pub hop: usize,
}

impl Spectrogram {
    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

/// Centered STFT (zero padding of `n_fft / 2` on both sides) with a Hann window.
pub fn stft(signal: &[f32], n_fft: usize, hop: usize) -> Spectrogram {
    let t = signal.len();
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; pad + t + pad];
    padded[pad..pad + t].copy_from_slice(signal);

    let n_frames = 1 + t / hop;
    let bins = n_fft / 2 + 1;
    let cache = fft_cache(n_fft);
    let window = &cache.hann_window;

    let mut buf = vec![Complex32::zero(); n_fft];
    let mut frames = Vec::with_capacity(n_frames);
    for fr in 0..n_frames {
        let start = fr * hop;
        for i in 0..n_fft {
            let x = padded.get(start + i).copied().unwrap_or(0.0);
            buf[i] = Complex32::new(x * window[i], 0.0);
        }
        cache.fft_forward.process(&mut buf);
        frames.push(buf[..bins].to_vec());
    }

    Spectrogram { frames, n_fft, hop }
}

/// Inverse of [`stft`]; overlap-add normalised by the squared window sum.
pub fn istft(spec: &Spectrogram, target_length: usize) -> Vec<f32> {
    let n_fft = spec.n_fft;
    let hop = spec.hop;
    let half = n_fft / 2;
    let cache = fft_cache(n_fft);
    let window = &cache.hann_window;

    let pad = n_fft / 2;
    let padded_length = target_length + 2 * pad;
    let mut out = vec![0.0f32; padded_length];
    let mut window_sum = vec![0.0f32; padded_length];

    let mut buf = vec![Complex32::zero(); n_fft];
    let scale = 1.0 / (n_fft as f32);

    for (fr, frame) in spec.frames.iter().enumerate() {
        buf.fill(Complex32::zero());
        for (k, bin) in frame.iter().enumerate().take(half + 1) {
            buf[k] = *bin;
        }
        // Hermitian mirror so the inverse is real.
        for k in 1..half {
            buf[n_fft - k] = buf[k].conj();
        }
        buf[0].im = 0.0;
        buf[half].im = 0.0;

        cache.fft_inverse.process(&mut buf);

        let start = fr * hop;
        for i in 0..n_fft {
            let pos = start + i;
            if pos < padded_length {
                let w = window[i];
                out[pos] += buf[i].re * w * scale;
                window_sum[pos] += w * w;
            }
        }
    }

    for i in 0..padded_length {
        let sum = window_sum[i];
        if sum > 1e-10 {
            out[i] /= sum;
        }
    }

    let start = pad.min(out.len());
    let end = (pad + target_length).min(out.len());
    let mut result = if end > start {
        out[start..end].to_vec()
    } else {
        Vec::new()
    };
    result.resize(target_length, 0.0);
    result
}

/// `c[lag] = sum_{j < width} a[j] * x[j + lag]` for `lag` in `0..=max_lag`,
/// computed through the FFT. `x` must hold at least `width + max_lag` samples.
pub fn lag_correlation(x: &[f32], width: usize, max_lag: usize) -> Vec<f32> {
    let needed = width + max_lag;
    let n_fft = (needed + width).next_power_of_two();
    let (fwd, inv) = fft_pair(n_fft);

    let mut a = vec![Complex32::zero(); n_fft];
    let mut b = vec![Complex32::zero(); n_fft];
    for j in 0..width.min(x.len()) {
        a[j] = Complex32::new(x[j], 0.0);
    }
    for j in 0..needed.min(x.len()) {
        b[j] = Complex32::new(x[j], 0.0);
    }
    fwd.process(&mut a);
    fwd.process(&mut b);
    for (ai, bi) in a.iter_mut().zip(b.iter()) {
        *ai = ai.conj() * bi;
    }
    inv.process(&mut a);

    let scale = 1.0 / n_fft as f32;
    (0..=max_lag).map(|lag| a[lag].re * scale).collect()
}

/// One biquad section in transposed direct form II.
#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    fn highpass(cutoff: f32, q: f32, sample_rate: f32) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos) / 2.0 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn first_order_highpass(cutoff: f32, sample_rate: f32) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let a0 = 1.0 + k;
        Self {
            b0: 1.0 / a0,
            b1: -1.0 / a0,
            b2: 0.0,
            a1: (k - 1.0) / a0,
            a2: 0.0,
        }
    }

    fn run(&self, samples: &mut [f32]) {
        let (mut z1, mut z2) = (0.0f32, 0.0f32);
        for s in samples.iter_mut() {
            let x = *s;
            let y = self.b0 * x + z1;
            z1 = self.b1 * x - self.a1 * y + z2;
            z2 = self.b2 * x - self.a2 * y;
            *s = y;
        }
    }
}

/// Odd-order Butterworth high-pass built from biquads plus one first-order section.
fn butterworth_highpass(order: usize, cutoff: f32, sample_rate: f32) -> Vec<Biquad> {
    let mut sections = Vec::with_capacity(order / 2 + 1);
    for k in 0..order / 2 {
        let theta = PI * (2 * k + 1) as f32 / (2 * order) as f32;
        let q = 1.0 / (2.0 * theta.sin());
        sections.push(Biquad::highpass(cutoff, q, sample_rate));
    }
    if order % 2 == 1 {
        sections.push(Biquad::first_order_highpass(cutoff, sample_rate));
    }
    sections
}

/// Zero-phase high-pass: the Butterworth cascade run forward then backward.
pub fn highpass_filtfilt(samples: &mut [f32], order: usize, cutoff: f32, sample_rate: u32) {
    if samples.is_empty() {
        return;
    }
    let sections = butterworth_highpass(order, cutoff, sample_rate as f32);
    for section in &sections {
        section.run(samples);
    }
    samples.reverse();
    for section in &sections {
        section.run(samples);
    }
    samples.reverse();
}

/// Median filter with a window of `2 * radius + 1`, edges clamped.
pub fn median_filter(values: &[f32], radius: usize) -> Vec<f32> {
    if radius == 0 || values.len() < 2 {
        return values.to_vec();
    }
    let n = values.len();
    let mut window = Vec::with_capacity(2 * radius + 1);
    (0..n)
        .map(|i| {
            window.clear();
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);
            window.extend_from_slice(&values[lo..hi]);
            window.sort_by(|a, b| a.total_cmp(b));
            window[window.len() / 2]
        })
        .collect()
}

/// Piecewise-linear interpolation of `(xs, ys)` evaluated at `x`; clamps outside.
pub fn interp(x: f32, xs: &[f32], ys: &[f32]) -> f32 {
    if xs.is_empty() {
        return 0.0;
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    let idx = xs.partition_point(|&v| v <= x);
    let (x0, x1) = (xs[idx - 1], xs[idx]);
    let (y0, y1) = (ys[idx - 1], ys[idx]);
    if (x1 - x0).abs() < f32::EPSILON {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Frame RMS with a hop of `hop` and frame length `frame`, centered frames.
pub fn frame_rms(signal: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    if hop == 0 {
        return Vec::new();
    }
    let n_frames = 1 + signal.len() / hop;
    let half = frame / 2;
    (0..n_frames)
        .map(|i| {
            let center = i * hop;
            let lo = center.saturating_sub(half);
            let hi = (center + half).min(signal.len());
            if hi <= lo {
                return 0.0;
            }
            let energy: f32 = signal[lo..hi].iter().map(|s| s * s).sum();
            (energy / frame.max(1) as f32).sqrt()
        })
        .collect()
}

/// Linear resize of a curve to `len` points (endpoints preserved).
pub fn stretch_linear(values: &[f32], len: usize) -> Vec<f32> {
    if len == 0 {
        return Vec::new();
    }
    if values.is_empty() {
        return vec![0.0; len];
    }
    if values.len() == 1 || len == 1 {
        return vec![values[0]; len];
    }
    let scale = (values.len() - 1) as f32 / (len - 1) as f32;
    (0..len)
        .map(|i| {
            let pos = i as f32 * scale;
            let left = pos.floor() as usize;
            let right = (left + 1).min(values.len() - 1);
            let frac = pos - left as f32;
            values[left] * (1.0 - frac) + values[right] * frac
        })
        .collect()
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-12).log10()
}
