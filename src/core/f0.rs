//! Pitch (F0) estimation.
//!
//! Two estimators run natively (`Acf`, `Yin`); the neural ones are supplied
//! by the inference backend as [`PitchEstimator`]s. Every extraction path ends
//! in a [`PitchCurve`] in Hz with `0.0` marking unvoiced frames.

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    core::dsp::{interp, lag_correlation, median_filter},
    error::{Result, VcError},
    model::backend::PitchEstimator,
};

pub const F0_MIN: f32 = 50.0;
pub const F0_MAX: f32 = 1100.0;

/// Frames per second of the synthesis grid.
const GRID_FPS: f32 = 100.0;

const ACF_VOICING_THRESHOLD: f32 = 0.6;
const YIN_THRESHOLD: f32 = 0.1;
const YIN_UNVOICED_ABOVE: f32 = 0.35;
/// Frames quieter than this fraction of the loudest frame are unvoiced.
const SILENCE_RATIO: f32 = 0.03;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum F0Method {
    Acf,
    Yin,
    Crepe,
    CrepeTiny,
    #[default]
    Rmvpe,
    Fcpe,
    Hybrid(Vec<F0Method>),
}

impl F0Method {
    /// Methods computed in-crate; the rest need a backend estimator.
    pub fn is_native(&self) -> bool {
        matches!(self, F0Method::Acf | F0Method::Yin)
    }

    fn parse_single(s: &str) -> Result<F0Method> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acf" | "pm" => Ok(F0Method::Acf),
            "yin" => Ok(F0Method::Yin),
            "crepe" | "crepe-full" => Ok(F0Method::Crepe),
            "crepe-tiny" | "crepe_tiny" => Ok(F0Method::CrepeTiny),
            "rmvpe" => Ok(F0Method::Rmvpe),
            "fcpe" => Ok(F0Method::Fcpe),
            other => Err(VcError::InvalidRequest(format!("unknown f0 method '{other}'"))),
        }
    }
}

impl FromStr for F0Method {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some(inner) = lower
            .strip_prefix("hybrid[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let methods = inner
                .split('+')
                .filter(|m| !m.trim().is_empty())
                .map(F0Method::parse_single)
                .collect::<Result<Vec<_>>>()?;
            if methods.len() < 2 {
                return Err(VcError::InvalidRequest(format!(
                    "hybrid f0 method needs at least two members: '{s}'"
                )));
            }
            return Ok(F0Method::Hybrid(methods));
        }
        F0Method::parse_single(s)
    }
}

impl fmt::Display for F0Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            F0Method::Acf => f.write_str("acf"),
            F0Method::Yin => f.write_str("yin"),
            F0Method::Crepe => f.write_str("crepe"),
            F0Method::CrepeTiny => f.write_str("crepe-tiny"),
            F0Method::Rmvpe => f.write_str("rmvpe"),
            F0Method::Fcpe => f.write_str("fcpe"),
            F0Method::Hybrid(methods) => {
                let names: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
                write!(f, "hybrid[{}]", names.join("+"))
            }
        }
    }
}

impl TryFrom<String> for F0Method {
    type Error = VcError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<F0Method> for String {
    fn from(value: F0Method) -> Self {
        value.to_string()
    }
}

/// Per-frame F0 in Hz; `0.0` is unvoiced.
#[derive(Clone, Debug, PartialEq)]
pub struct PitchCurve {
    pub hz: Vec<f32>,
    pub hop_length: usize,
}

impl PitchCurve {
    pub fn unvoiced(frames: usize, hop_length: usize) -> Self {
        Self {
            hz: vec![0.0; frames],
            hop_length,
        }
    }

    pub fn len(&self) -> usize {
        self.hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hz.is_empty()
    }

    pub fn voiced_count(&self) -> usize {
        self.hz.iter().filter(|&&f| f > 0.0).count()
    }

    /// Marks non-finite and negative frames unvoiced.
    pub fn sanitize(&mut self) {
        for f in self.hz.iter_mut() {
            if !f.is_finite() || *f < 0.0 {
                *f = 0.0;
            }
        }
    }

    /// Transposes the curve by `semitones`.
    pub fn shift(&mut self, semitones: f32) {
        if semitones == 0.0 {
            return;
        }
        let factor = 2f32.powf(semitones / 12.0);
        for f in self.hz.iter_mut() {
            *f *= factor;
        }
    }

    /// Mel-quantised tokens in `1..=255` consumed by the generator.
    pub fn coarse(&self) -> Vec<i64> {
        let mel_min = hz_to_mel(F0_MIN);
        let mel_max = hz_to_mel(F0_MAX);
        self.hz
            .iter()
            .map(|&f| {
                if !f.is_finite() {
                    return 1;
                }
                let mut mel = hz_to_mel(f);
                if mel > 0.0 {
                    mel = (mel - mel_min) * 254.0 / (mel_max - mel_min) + 1.0;
                }
                mel.clamp(1.0, 255.0).round() as i64
            })
            .collect()
    }

    /// Resamples onto `frames` frames. Voiced frames are interpolated between
    /// voiced neighbours only; a frame is unvoiced if its nearest source is.
    pub fn resample_to(&self, frames: usize, hop_length: usize) -> PitchCurve {
        let n = self.hz.len();
        if n == frames {
            return PitchCurve {
                hz: self.hz.clone(),
                hop_length,
            };
        }
        if n == 0 || frames == 0 {
            return PitchCurve::unvoiced(frames, hop_length);
        }
        let scale = n as f32 / frames as f32;
        let hz = (0..frames)
            .map(|i| {
                let pos = ((i as f32 + 0.5) * scale - 0.5).max(0.0);
                let left = (pos.floor() as usize).min(n - 1);
                let right = (left + 1).min(n - 1);
                let frac = pos - left as f32;
                let nearest = if frac < 0.5 { left } else { right };
                if self.hz[nearest] <= 0.0 {
                    return 0.0;
                }
                match (self.hz[left] > 0.0, self.hz[right] > 0.0) {
                    (true, true) => self.hz[left] * (1.0 - frac) + self.hz[right] * frac,
                    _ => self.hz[nearest],
                }
            })
            .collect();
        PitchCurve { hz, hop_length }
    }
}

pub fn hz_to_mel(f: f32) -> f32 {
    1127.0 * (1.0 + f / 700.0).ln()
}

/// Number of frames a curve over `samples` samples must have.
pub fn frame_count(samples: usize, hop_length: usize) -> usize {
    samples.div_ceil(hop_length.max(1))
}

/// Pulls voiced frames toward the equal-tempered grid (A4 = 440 Hz).
pub fn autotune(hz: &mut [f32], strength: f32) {
    let strength = strength.clamp(0.0, 1.0);
    for f in hz.iter_mut() {
        if *f <= 0.0 {
            continue;
        }
        let note = (12.0 * (*f / 440.0).log2()).round();
        let target = 440.0 * 2f32.powf(note / 12.0);
        *f += (target - *f) * strength;
    }
}

/// Externally supplied curve, lines of `time_seconds,f0_hz`.
#[derive(Clone, Debug, PartialEq)]
pub struct F0Override {
    pub points: Vec<(f32, f32)>,
}

impl F0Override {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut points = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split(',');
            let parsed = match (parts.next(), parts.next()) {
                (Some(t), Some(f)) => t
                    .trim()
                    .parse::<f32>()
                    .ok()
                    .zip(f.trim().parse::<f32>().ok()),
                _ => None,
            };
            match parsed {
                Some(p) => points.push(p),
                None => {
                    return Err(VcError::InvalidRequest(format!(
                        "{}:{}: expected 'time,f0'",
                        path.display(),
                        lineno + 1
                    )))
                }
            }
        }
        if points.is_empty() {
            return Err(VcError::InvalidRequest(format!(
                "{} holds no f0 points",
                path.display()
            )));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { points })
    }

    /// The curve sampled on the 100 fps grid from its first to last timestamp.
    pub fn to_grid(&self) -> Vec<f32> {
        let first = self.points[0].0;
        let last = self.points[self.points.len() - 1].0;
        let frames = ((last - first) * GRID_FPS + 1.0).round().max(1.0) as usize;
        let xs: Vec<f32> = self.points.iter().map(|p| p.0 * GRID_FPS).collect();
        let ys: Vec<f32> = self.points.iter().map(|p| p.1).collect();
        (0..frames).map(|i| interp(i as f32, &xs, &ys)).collect()
    }

    /// Overwrites `hz` from frame `offset` on with the gridded curve.
    pub fn apply(&self, hz: &mut [f32], offset: usize) {
        if offset >= hz.len() {
            return;
        }
        let grid = self.to_grid();
        let n = grid.len().min(hz.len() - offset);
        hz[offset..offset + n].copy_from_slice(&grid[..n]);
    }
}

/// Everything that shapes the curve handed to the synthesizer.
#[derive(Clone, Debug)]
pub struct PitchOptions {
    pub method: F0Method,
    pub hop_length: usize,
    pub semitones: i32,
    pub filter_radius: usize,
    pub autotune_strength: Option<f32>,
    pub f0_override: Option<F0Override>,
    /// Grid frame at which an override starts (the pipeline's reflect padding).
    pub override_offset: usize,
}

impl Default for PitchOptions {
    fn default() -> Self {
        Self {
            method: F0Method::default(),
            hop_length: 160,
            semitones: 0,
            filter_radius: 3,
            autotune_strength: None,
            f0_override: None,
            override_offset: 0,
        }
    }
}

/// Holds the registered neural estimators and runs any [`F0Method`].
pub struct F0Extractor {
    sample_rate: u32,
    estimators: HashMap<F0Method, Box<dyn PitchEstimator>>,
}

impl F0Extractor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            estimators: HashMap::new(),
        }
    }

    pub fn register(&mut self, method: F0Method, estimator: Box<dyn PitchEstimator>) {
        self.estimators.insert(method, estimator);
    }

    pub fn has_estimator(&self, method: &F0Method) -> bool {
        method.is_native() || self.estimators.contains_key(method)
    }

    /// Single-method members a request needs, hybrids flattened.
    pub fn required_methods(method: &F0Method) -> Vec<F0Method> {
        match method {
            F0Method::Hybrid(members) => members.clone(),
            other => vec![other.clone()],
        }
    }

    /// Raw curve of exactly `ceil(len / hop_length)` frames. Never fails:
    /// estimator errors degrade to an all-unvoiced curve.
    pub fn extract(&mut self, audio: &[f32], hop_length: usize, method: &F0Method) -> PitchCurve {
        let hop_length = hop_length.max(1);
        let frames = frame_count(audio.len(), hop_length);
        match self.try_extract(audio, hop_length, method) {
            Ok(mut curve) => {
                curve.sanitize();
                curve.resample_to(frames, hop_length)
            }
            Err(e) => {
                warn!("f0 extraction with {} failed ({}); continuing unvoiced", method, e);
                PitchCurve::unvoiced(frames, hop_length)
            }
        }
    }

    fn try_extract(
        &mut self,
        audio: &[f32],
        hop_length: usize,
        method: &F0Method,
    ) -> Result<PitchCurve> {
        let frames = frame_count(audio.len(), hop_length);
        if audio.iter().all(|s| s.abs() < 1e-7) {
            return Ok(PitchCurve::unvoiced(frames, hop_length));
        }
        match method {
            F0Method::Acf => Ok(PitchCurve {
                hz: acf_f0(audio, self.sample_rate, hop_length),
                hop_length,
            }),
            F0Method::Yin => Ok(PitchCurve {
                hz: yin_f0(audio, self.sample_rate, hop_length),
                hop_length,
            }),
            F0Method::Hybrid(members) => {
                let curves: Vec<PitchCurve> = members
                    .iter()
                    .map(|m| self.extract(audio, hop_length, m))
                    .collect();
                Ok(PitchCurve {
                    hz: hybrid_median(&curves, frames),
                    hop_length,
                })
            }
            neural => match self.estimators.get_mut(neural) {
                Some(estimator) => {
                    let hz =
                        estimator.estimate(audio, self.sample_rate, hop_length, F0_MIN, F0_MAX)?;
                    Ok(PitchCurve { hz, hop_length })
                }
                None => {
                    warn!("no estimator registered for {}; falling back to acf", neural);
                    Ok(PitchCurve {
                        hz: acf_f0(audio, self.sample_rate, hop_length),
                        hop_length,
                    })
                }
            },
        }
    }

    /// Curve on the synthesis grid (`frames` frames of `grid_hop` samples) with
    /// smoothing, autotune, transposition and file override applied in that order.
    pub fn pitch_curve(
        &mut self,
        audio: &[f32],
        frames: usize,
        grid_hop: usize,
        opts: &PitchOptions,
    ) -> PitchCurve {
        let mut raw = self.extract(audio, opts.hop_length, &opts.method);
        let smoothed = matches!(opts.method, F0Method::Acf | F0Method::Yin);
        if smoothed && opts.filter_radius >= 3 {
            raw.hz = median_filter(&raw.hz, opts.filter_radius);
        }
        let mut curve = raw.resample_to(frames, grid_hop);
        if let Some(strength) = opts.autotune_strength {
            autotune(&mut curve.hz, strength);
        }
        curve.shift(opts.semitones as f32);
        if let Some(over) = &opts.f0_override {
            over.apply(&mut curve.hz, opts.override_offset);
        }
        debug!(
            "pitch curve: {} frames, {} voiced, method={}",
            curve.len(),
            curve.voiced_count(),
            opts.method
        );
        curve
    }
}

/// Per-frame median over the voiced votes; unvoiced only when no member is voiced.
pub fn hybrid_median(curves: &[PitchCurve], frames: usize) -> Vec<f32> {
    let mut votes = Vec::with_capacity(curves.len());
    (0..frames)
        .map(|i| {
            votes.clear();
            votes.extend(
                curves
                    .iter()
                    .filter_map(|c| c.hz.get(i).copied())
                    .filter(|&f| f > 0.0),
            );
            if votes.is_empty() {
                return 0.0;
            }
            votes.sort_by(|a, b| a.total_cmp(b));
            let mid = votes.len() / 2;
            if votes.len() % 2 == 0 {
                (votes[mid - 1] + votes[mid]) / 2.0
            } else {
                votes[mid]
            }
        })
        .collect()
}

struct FrameAnalysis {
    min_lag: usize,
    max_lag: usize,
    width: usize,
    silence_floor: f32,
}

impl FrameAnalysis {
    fn new(audio: &[f32], sample_rate: u32, hop_length: usize) -> Self {
        let sr = sample_rate as f32;
        let min_lag = ((sr / F0_MAX).floor() as usize).max(2);
        let max_lag = (sr / F0_MIN).ceil() as usize;
        let width = max_lag;
        let loudest = audio
            .chunks(hop_length.max(1))
            .map(rms)
            .fold(0.0f32, f32::max);
        Self {
            min_lag,
            max_lag,
            width,
            silence_floor: loudest * SILENCE_RATIO,
        }
    }

    /// Mean-removed analysis frame centred on `center`, zero padded at the edges.
    fn frame(&self, audio: &[f32], center: usize) -> Vec<f32> {
        let len = self.width + self.max_lag + 1;
        let start = center as isize - (len / 2) as isize;
        let mut buf: Vec<f32> = (0..len)
            .map(|i| {
                let idx = start + i as isize;
                if idx >= 0 && (idx as usize) < audio.len() {
                    audio[idx as usize]
                } else {
                    0.0
                }
            })
            .collect();
        let mean = buf.iter().sum::<f32>() / len as f32;
        for s in buf.iter_mut() {
            *s -= mean;
        }
        buf
    }
}

fn rms(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt()
}

/// Energy of `x[lag .. lag + width]` for every lag, from a running sum.
fn lagged_energy(x: &[f32], width: usize, max_lag: usize) -> Vec<f32> {
    let mut energy = Vec::with_capacity(max_lag + 1);
    let mut acc: f32 = x[..width].iter().map(|s| s * s).sum();
    energy.push(acc);
    for lag in 1..=max_lag {
        acc += x[lag + width - 1] * x[lag + width - 1] - x[lag - 1] * x[lag - 1];
        energy.push(acc.max(0.0));
    }
    energy
}

fn parabolic_offset(prev: f32, center: f32, next: f32) -> f32 {
    let denom = prev - 2.0 * center + next;
    if denom.abs() < 1e-12 {
        0.0
    } else {
        (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
    }
}

/// Normalised-autocorrelation tracker.
pub fn acf_f0(audio: &[f32], sample_rate: u32, hop_length: usize) -> Vec<f32> {
    let frames = frame_count(audio.len(), hop_length);
    let fa = FrameAnalysis::new(audio, sample_rate, hop_length);
    (0..frames)
        .map(|i| {
            let x = fa.frame(audio, i * hop_length);
            if rms(&x[..fa.width]) <= fa.silence_floor {
                return 0.0;
            }
            let corr = lag_correlation(&x, fa.width, fa.max_lag);
            let energy = lagged_energy(&x, fa.width, fa.max_lag);
            let e0 = energy[0];
            let norm: Vec<f32> = corr
                .iter()
                .zip(energy.iter())
                .map(|(c, e)| {
                    let d = (e0 * e).sqrt();
                    if d > 1e-12 {
                        c / d
                    } else {
                        0.0
                    }
                })
                .collect();

            let range = fa.min_lag..fa.max_lag;
            let best = norm[range.clone()]
                .iter()
                .fold(f32::MIN, |acc, &v| acc.max(v));
            if best < ACF_VOICING_THRESHOLD {
                return 0.0;
            }
            // First local peak close to the best avoids sub-octave picks.
            let lag = range
                .clone()
                .find(|&l| {
                    norm[l] >= 0.9 * best && norm[l] >= norm[l - 1] && norm[l] >= norm[l + 1]
                })
                .unwrap_or(fa.min_lag);
            let refined = lag as f32 + parabolic_offset(norm[lag - 1], norm[lag], norm[lag + 1]);
            sample_rate as f32 / refined
        })
        .collect()
}

/// YIN with the cumulative-mean-normalised difference function.
pub fn yin_f0(audio: &[f32], sample_rate: u32, hop_length: usize) -> Vec<f32> {
    let frames = frame_count(audio.len(), hop_length);
    let fa = FrameAnalysis::new(audio, sample_rate, hop_length);
    (0..frames)
        .map(|i| {
            let x = fa.frame(audio, i * hop_length);
            if rms(&x[..fa.width]) <= fa.silence_floor {
                return 0.0;
            }
            let corr = lag_correlation(&x, fa.width, fa.max_lag);
            let energy = lagged_energy(&x, fa.width, fa.max_lag);
            let mut cmnd = vec![1.0f32; fa.max_lag + 1];
            let mut running = 0.0f32;
            for tau in 1..=fa.max_lag {
                let d = (energy[0] + energy[tau] - 2.0 * corr[tau]).max(0.0);
                running += d;
                cmnd[tau] = if running > 1e-12 {
                    d * tau as f32 / running
                } else {
                    1.0
                };
            }

            let mut tau = fa.min_lag;
            let mut chosen = None;
            while tau < fa.max_lag {
                if cmnd[tau] < YIN_THRESHOLD {
                    while tau + 1 < fa.max_lag && cmnd[tau + 1] < cmnd[tau] {
                        tau += 1;
                    }
                    chosen = Some(tau);
                    break;
                }
                tau += 1;
            }
            let tau = match chosen {
                Some(t) => t,
                None => {
                    let (t, v) = (fa.min_lag..fa.max_lag)
                        .map(|t| (t, cmnd[t]))
                        .fold((fa.min_lag, f32::MAX), |a, b| if b.1 < a.1 { b } else { a });
                    if v > YIN_UNVOICED_ABOVE {
                        return 0.0;
                    }
                    t
                }
            };
            let refined = tau as f32 + parabolic_offset(cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
            sample_rate as f32 / refined
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hybrid_and_round_trips_display() {
        let m: F0Method = "hybrid[rmvpe+crepe]".parse().unwrap();
        assert_eq!(m, F0Method::Hybrid(vec![F0Method::Rmvpe, F0Method::Crepe]));
        assert_eq!(m.to_string(), "hybrid[rmvpe+crepe]");
        assert!("hybrid[rmvpe]".parse::<F0Method>().is_err());
        assert!("harvest2".parse::<F0Method>().is_err());
    }

    #[test]
    fn coarse_maps_unvoiced_to_one_and_clamps() {
        let c = PitchCurve {
            hz: vec![0.0, 50.0, 1100.0, 5000.0],
            hop_length: 160,
        };
        assert_eq!(c.coarse(), vec![1, 1, 255, 255]);
    }

    #[test]
    fn autotune_full_strength_snaps_to_note() {
        let mut hz = vec![0.0, 445.0];
        autotune(&mut hz, 1.0);
        assert_eq!(hz[0], 0.0);
        assert!((hz[1] - 440.0).abs() < 1e-3);
    }

    #[test]
    fn hybrid_median_ignores_unvoiced_votes() {
        let a = PitchCurve { hz: vec![100.0, 0.0, 0.0], hop_length: 160 };
        let b = PitchCurve { hz: vec![110.0, 200.0, 0.0], hop_length: 160 };
        let c = PitchCurve { hz: vec![0.0, 0.0, 0.0], hop_length: 160 };
        assert_eq!(hybrid_median(&[a, b, c], 3), vec![105.0, 200.0, 0.0]);
    }

    #[test]
    fn override_replaces_from_offset() {
        let over = F0Override {
            points: vec![(0.0, 100.0), (0.02, 300.0)],
        };
        let mut hz = vec![1.0; 6];
        over.apply(&mut hz, 2);
        assert_eq!(hz, vec![1.0, 1.0, 100.0, 200.0, 300.0, 1.0]);
    }
}
