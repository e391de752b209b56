//! Post-processing chain. Effects always run in the fixed order of
//! [`EffectKind::ORDER`] regardless of how the slots are listed, and every
//! effect keeps the buffer length unchanged.

use std::{collections::HashSet, f32::consts::PI, sync::Arc};

use num_complex::Complex32;
use rustfft::Fft;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::dsp::{compute_hann, db_to_gain, fft_pair};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    Reverb,
    PitchShift,
    Limiter,
    Gain,
    Distortion,
    Chorus,
    Bitcrush,
    Clipping,
    Compressor,
    Delay,
}

impl EffectKind {
    pub const ORDER: [EffectKind; 10] = [
        EffectKind::Reverb,
        EffectKind::PitchShift,
        EffectKind::Limiter,
        EffectKind::Gain,
        EffectKind::Distortion,
        EffectKind::Chorus,
        EffectKind::Bitcrush,
        EffectKind::Clipping,
        EffectKind::Compressor,
        EffectKind::Delay,
    ];

    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn id(self) -> &'static str {
        match self {
            EffectKind::Reverb => "reverb",
            EffectKind::PitchShift => "pitch_shift",
            EffectKind::Limiter => "limiter",
            EffectKind::Gain => "gain",
            EffectKind::Distortion => "distortion",
            EffectKind::Chorus => "chorus",
            EffectKind::Bitcrush => "bitcrush",
            EffectKind::Clipping => "clipping",
            EffectKind::Compressor => "compressor",
            EffectKind::Delay => "delay",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    pub room_size: f32,
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
    pub width: f32,
    pub freeze_mode: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            wet_level: 0.33,
            dry_level: 0.4,
            width: 1.0,
            freeze_mode: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PitchShiftParams {
    pub semitones: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    pub threshold_db: f32,
    pub release_ms: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold_db: -6.0,
            release_ms: 60.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GainParams {
    pub gain_db: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    pub drive_db: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self { drive_db: 25.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusParams {
    pub rate_hz: f32,
    pub depth: f32,
    pub centre_delay_ms: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for ChorusParams {
    fn default() -> Self {
        Self {
            rate_hz: 1.0,
            depth: 0.25,
            centre_delay_ms: 7.0,
            feedback: 0.0,
            mix: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcrushParams {
    pub bit_depth: f32,
}

impl Default for BitcrushParams {
    fn default() -> Self {
        Self { bit_depth: 8.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClippingParams {
    pub threshold_db: f32,
}

impl Default for ClippingParams {
    fn default() -> Self {
        Self { threshold_db: -6.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorParams {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: 0.0,
            ratio: 1.0,
            attack_ms: 1.0,
            release_ms: 100.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayParams {
    pub delay_seconds: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            delay_seconds: 0.5,
            feedback: 0.0,
            mix: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    Reverb(ReverbParams),
    PitchShift(PitchShiftParams),
    Limiter(LimiterParams),
    Gain(GainParams),
    Distortion(DistortionParams),
    Chorus(ChorusParams),
    Bitcrush(BitcrushParams),
    Clipping(ClippingParams),
    Compressor(CompressorParams),
    Delay(DelayParams),
}

fn in_unit(name: &str, v: f32) -> Result<(), String> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(format!("{name} must be in [0, 1], got {v}"))
    }
}

fn positive(name: &str, v: f32) -> Result<(), String> {
    if v > 0.0 && v.is_finite() {
        Ok(())
    } else {
        Err(format!("{name} must be positive, got {v}"))
    }
}

impl Effect {
    pub fn default_for(kind: EffectKind) -> Self {
        match kind {
            EffectKind::Reverb => Effect::Reverb(ReverbParams::default()),
            EffectKind::PitchShift => Effect::PitchShift(PitchShiftParams::default()),
            EffectKind::Limiter => Effect::Limiter(LimiterParams::default()),
            EffectKind::Gain => Effect::Gain(GainParams::default()),
            EffectKind::Distortion => Effect::Distortion(DistortionParams::default()),
            EffectKind::Chorus => Effect::Chorus(ChorusParams::default()),
            EffectKind::Bitcrush => Effect::Bitcrush(BitcrushParams::default()),
            EffectKind::Clipping => Effect::Clipping(ClippingParams::default()),
            EffectKind::Compressor => Effect::Compressor(CompressorParams::default()),
            EffectKind::Delay => Effect::Delay(DelayParams::default()),
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Reverb(_) => EffectKind::Reverb,
            Effect::PitchShift(_) => EffectKind::PitchShift,
            Effect::Limiter(_) => EffectKind::Limiter,
            Effect::Gain(_) => EffectKind::Gain,
            Effect::Distortion(_) => EffectKind::Distortion,
            Effect::Chorus(_) => EffectKind::Chorus,
            Effect::Bitcrush(_) => EffectKind::Bitcrush,
            Effect::Clipping(_) => EffectKind::Clipping,
            Effect::Compressor(_) => EffectKind::Compressor,
            Effect::Delay(_) => EffectKind::Delay,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Effect::Reverb(p) => {
                in_unit("reverb room_size", p.room_size)?;
                in_unit("reverb damping", p.damping)?;
                in_unit("reverb wet_level", p.wet_level)?;
                in_unit("reverb dry_level", p.dry_level)?;
                in_unit("reverb width", p.width)?;
                in_unit("reverb freeze_mode", p.freeze_mode)
            }
            Effect::PitchShift(p) => {
                if (-24.0..=24.0).contains(&p.semitones) {
                    Ok(())
                } else {
                    Err(format!("pitch_shift semitones must be in [-24, 24], got {}", p.semitones))
                }
            }
            Effect::Limiter(p) => positive("limiter release_ms", p.release_ms),
            Effect::Gain(p) => {
                if p.gain_db.is_finite() {
                    Ok(())
                } else {
                    Err("gain_db must be finite".into())
                }
            }
            Effect::Distortion(p) => {
                if p.drive_db.is_finite() {
                    Ok(())
                } else {
                    Err("distortion drive_db must be finite".into())
                }
            }
            Effect::Chorus(p) => {
                positive("chorus rate_hz", p.rate_hz)?;
                in_unit("chorus depth", p.depth)?;
                in_unit("chorus mix", p.mix)?;
                if !(0.0..100.0).contains(&p.centre_delay_ms) {
                    return Err(format!(
                        "chorus centre_delay_ms must be in [0, 100), got {}",
                        p.centre_delay_ms
                    ));
                }
                if p.feedback.abs() >= 1.0 {
                    return Err(format!("chorus feedback must be in (-1, 1), got {}", p.feedback));
                }
                Ok(())
            }
            Effect::Bitcrush(p) => {
                if (1.0..=32.0).contains(&p.bit_depth) {
                    Ok(())
                } else {
                    Err(format!("bitcrush bit_depth must be in [1, 32], got {}", p.bit_depth))
                }
            }
            Effect::Clipping(p) => {
                if p.threshold_db.is_finite() {
                    Ok(())
                } else {
                    Err("clipping threshold_db must be finite".into())
                }
            }
            Effect::Compressor(p) => {
                if p.ratio < 1.0 {
                    return Err(format!("compressor ratio must be >= 1, got {}", p.ratio));
                }
                positive("compressor attack_ms", p.attack_ms)?;
                positive("compressor release_ms", p.release_ms)
            }
            Effect::Delay(p) => {
                if !(0.0..=30.0).contains(&p.delay_seconds) {
                    return Err(format!(
                        "delay delay_seconds must be in [0, 30], got {}",
                        p.delay_seconds
                    ));
                }
                in_unit("delay mix", p.mix)?;
                if !(0.0..1.0).contains(&p.feedback) {
                    return Err(format!("delay feedback must be in [0, 1), got {}", p.feedback));
                }
                Ok(())
            }
        }
    }

    pub fn process(&self, samples: &mut [f32], sample_rate: u32) {
        let sr = sample_rate.max(1) as f32;
        match self {
            Effect::Reverb(p) => Freeverb::new(p, sr).process(samples),
            Effect::PitchShift(p) => pitch_shift(samples, p.semitones, sr),
            Effect::Limiter(p) => limiter(samples, p, sr),
            Effect::Gain(p) => {
                let g = db_to_gain(p.gain_db);
                samples.iter_mut().for_each(|s| *s *= g);
            }
            Effect::Distortion(p) => {
                let drive = db_to_gain(p.drive_db);
                samples.iter_mut().for_each(|s| *s = (*s * drive).tanh());
            }
            Effect::Chorus(p) => chorus(samples, p, sr),
            Effect::Bitcrush(p) => {
                let levels = 2f32.powf(p.bit_depth) / 2.0;
                samples
                    .iter_mut()
                    .for_each(|s| *s = (*s * levels).round() / levels);
            }
            Effect::Clipping(p) => {
                let t = db_to_gain(p.threshold_db);
                samples.iter_mut().for_each(|s| *s = s.clamp(-t, t));
            }
            Effect::Compressor(p) => compressor(samples, p, sr),
            Effect::Delay(p) => delay(samples, p, sr),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectSlot {
    pub enabled: bool,
    pub effect: Effect,
}

/// Ordered `(effect, enabled, params)` slots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostProcessSpec {
    pub slots: Vec<EffectSlot>,
}

impl Default for PostProcessSpec {
    /// All ten effects, disabled, with their default parameters.
    fn default() -> Self {
        Self {
            slots: EffectKind::ORDER
                .iter()
                .map(|&k| EffectSlot {
                    enabled: false,
                    effect: Effect::default_for(k),
                })
                .collect(),
        }
    }
}

impl PostProcessSpec {
    /// Enables `effect`, replacing the parameters of its slot.
    pub fn enable(&mut self, effect: Effect) -> &mut Self {
        let kind = effect.kind();
        match self.slots.iter_mut().find(|s| s.effect.kind() == kind) {
            Some(slot) => {
                slot.enabled = true;
                slot.effect = effect;
            }
            None => {
                self.slots.push(EffectSlot {
                    enabled: true,
                    effect,
                });
                self.slots.sort_by_key(|s| s.effect.kind().rank());
            }
        }
        self
    }

    pub fn with(mut self, effect: Effect) -> Self {
        self.enable(effect);
        self
    }

    pub fn disable(&mut self, kind: EffectKind) {
        for slot in self.slots.iter_mut().filter(|s| s.effect.kind() == kind) {
            slot.enabled = false;
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.slots.iter().any(|s| s.enabled)
    }

    /// Kinds of the enabled slots in the order they will run.
    pub fn enabled_kinds(&self) -> Vec<EffectKind> {
        let mut kinds: Vec<EffectKind> = self
            .slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.effect.kind())
            .collect();
        kinds.sort();
        kinds
    }

    /// Each kind at most once, listed in chain order, with sane parameters.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        let mut last_rank = None;
        for slot in &self.slots {
            let kind = slot.effect.kind();
            if !seen.insert(kind) {
                return Err(format!("effect '{}' listed twice", kind.id()));
            }
            if let Some(prev) = last_rank {
                if kind.rank() < prev {
                    return Err(format!("effect '{}' is out of chain order", kind.id()));
                }
            }
            last_rank = Some(kind.rank());
            slot.effect.validate()?;
        }
        Ok(())
    }

    /// Runs every enabled effect in chain order; disabled ones are skipped.
    pub fn apply(&self, samples: &mut [f32], sample_rate: u32) {
        let mut enabled: Vec<&EffectSlot> = self.slots.iter().filter(|s| s.enabled).collect();
        enabled.sort_by_key(|s| s.effect.kind().rank());
        for slot in enabled {
            debug!("applying {}", slot.effect.kind().id());
            slot.effect.process(samples, sample_rate);
        }
    }
}

// --- reverb ---

const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const FIXED_GAIN: f32 = 0.015;

struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    last: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            last: 0.0,
        }
    }

    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.last = output * (1.0 - damp) + self.last * damp;
        self.buffer[self.index] = input + self.last * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

struct AllPassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllPassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let buf_out = self.buffer[self.index];
        self.buffer[self.index] = input + buf_out * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        buf_out - input
    }
}

struct Freeverb {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllPassFilter>,
    feedback: f32,
    damp: f32,
    gain: f32,
    wet: f32,
    dry: f32,
}

impl Freeverb {
    fn new(p: &ReverbParams, sr: f32) -> Self {
        let scale = sr / 44_100.0;
        let frozen = p.freeze_mode >= 0.5;
        let wet = p.wet_level * 3.0;
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|&t| CombFilter::new((t as f32 * scale).round() as usize))
                .collect(),
            allpasses: ALLPASS_TUNING
                .iter()
                .map(|&t| AllPassFilter::new((t as f32 * scale).round() as usize))
                .collect(),
            feedback: if frozen { 1.0 } else { p.room_size * 0.28 + 0.7 },
            damp: if frozen { 0.0 } else { p.damping * 0.4 },
            gain: if frozen { 0.0 } else { FIXED_GAIN },
            wet: 0.5 * wet * (1.0 + p.width),
            dry: p.dry_level * 2.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let input = *s * self.gain;
            let mut out = 0.0;
            for comb in &mut self.combs {
                out += comb.process(input, self.feedback, self.damp);
            }
            for ap in &mut self.allpasses {
                out = ap.process(out);
            }
            *s = out * self.wet + *s * self.dry;
        }
    }
}

// --- pitch shift ---

const VOCODER_FFT_SIZE: usize = 2048;
const VOCODER_OVERSAMPLE: usize = 4;

struct PhaseVocoder {
    fft_size: usize,
    step: usize,
    oversample: f32,
    window: Vec<f32>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    buf: Vec<Complex32>,
    last_phase: Vec<f32>,
    sum_phase: Vec<f32>,
    ana_magn: Vec<f32>,
    ana_freq: Vec<f32>,
    syn_magn: Vec<f32>,
    syn_freq: Vec<f32>,
    syn_weight: Vec<f32>,
}

impl PhaseVocoder {
    fn new() -> Self {
        let fft_size = VOCODER_FFT_SIZE;
        let half = fft_size / 2;
        let (fft_forward, fft_inverse) = fft_pair(fft_size);
        // Periodic Hann so overlapping frames sum flat.
        let mut window = compute_hann(fft_size + 1);
        window.truncate(fft_size);
        Self {
            fft_size,
            step: fft_size / VOCODER_OVERSAMPLE,
            oversample: VOCODER_OVERSAMPLE as f32,
            window,
            fft_forward,
            fft_inverse,
            buf: vec![Complex32::new(0.0, 0.0); fft_size],
            last_phase: vec![0.0; half + 1],
            sum_phase: vec![0.0; half + 1],
            ana_magn: vec![0.0; half + 1],
            ana_freq: vec![0.0; half + 1],
            syn_magn: vec![0.0; half + 1],
            syn_freq: vec![0.0; half + 1],
            syn_weight: vec![0.0; half + 1],
        }
    }

    /// Shifts one frame in place (`frame.len() == fft_size`), windowed on output.
    fn process_frame(&mut self, frame: &mut [f32], ratio: f32, sr: f32) {
        let n = self.fft_size;
        let half = n / 2;
        let freq_per_bin = sr / n as f32;
        let expct = 2.0 * PI * self.step as f32 / n as f32;

        for k in 0..n {
            self.buf[k] = Complex32::new(frame[k] * self.window[k], 0.0);
        }
        self.fft_forward.process(&mut self.buf);

        for k in 0..=half {
            let bin = self.buf[k];
            let phase = bin.im.atan2(bin.re);
            let mut delta = phase - self.last_phase[k];
            self.last_phase[k] = phase;
            delta -= k as f32 * expct;
            let mut qpd = (delta / PI) as i32;
            if qpd >= 0 {
                qpd += qpd & 1;
            } else {
                qpd -= qpd & 1;
            }
            delta -= PI * qpd as f32;
            delta = self.oversample * delta / (2.0 * PI);
            self.ana_magn[k] = 2.0 * bin.norm();
            self.ana_freq[k] = (k as f32 + delta) * freq_per_bin;
        }

        self.syn_magn.fill(0.0);
        self.syn_freq.fill(0.0);
        self.syn_weight.fill(0.0);
        for k in 0..=half {
            let index = (k as f32 * ratio).round() as usize;
            if index <= half {
                self.syn_magn[index] += self.ana_magn[k];
                self.syn_freq[index] += self.ana_freq[k] * ratio;
                self.syn_weight[index] += 1.0;
            }
        }

        for k in 0..=half {
            let freq = if self.syn_weight[k] > 0.0 {
                self.syn_freq[k] / self.syn_weight[k]
            } else {
                k as f32 * freq_per_bin
            };
            let mut delta = (freq - k as f32 * freq_per_bin) / freq_per_bin;
            delta = 2.0 * PI * delta / self.oversample + k as f32 * expct;
            self.sum_phase[k] += delta;
            let (sin, cos) = self.sum_phase[k].sin_cos();
            let magn = self.syn_magn[k];
            if k == 0 || k == half {
                self.buf[k] = Complex32::new(magn * cos, 0.0);
            } else {
                self.buf[k] = Complex32::new(magn * cos, magn * sin);
                self.buf[n - k] = Complex32::new(magn * cos, -magn * sin);
            }
        }
        self.fft_inverse.process(&mut self.buf);

        // Unity gain: Hann on both analysis and synthesis sums to 3/8 per overlap.
        let scale = 8.0 / (3.0 * self.oversample * n as f32);
        for k in 0..n {
            frame[k] = self.buf[k].re * self.window[k] * scale;
        }
    }
}

/// Phase-vocoder transposition; output is time-aligned with the input.
fn pitch_shift(samples: &mut [f32], semitones: f32, sr: f32) {
    if semitones == 0.0 || samples.is_empty() {
        return;
    }
    let ratio = 2f32.powf(semitones / 12.0);
    let mut pv = PhaseVocoder::new();
    let n = pv.fft_size;
    let step = pv.step;

    // Frames start `n` samples before the signal so the edges get full overlap.
    let padded_len = samples.len() + 2 * n;
    let mut input = vec![0.0f32; padded_len];
    input[n..n + samples.len()].copy_from_slice(samples);
    let mut out = vec![0.0f32; padded_len + n];
    let mut frame = vec![0.0f32; n];

    let mut pos = 0;
    while pos + n <= padded_len {
        frame.copy_from_slice(&input[pos..pos + n]);
        pv.process_frame(&mut frame, ratio, sr);
        for (o, f) in out[pos..pos + n].iter_mut().zip(&frame) {
            *o += f;
        }
        pos += step;
    }
    samples.copy_from_slice(&out[n..n + samples.len()]);
}

// --- dynamics ---

fn ballistic_coeff(ms: f32, sr: f32) -> f32 {
    let samples = ms * 0.001 * sr;
    if samples < 1.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

fn compressor(samples: &mut [f32], p: &CompressorParams, sr: f32) {
    if p.ratio <= 1.0 {
        return;
    }
    let threshold = db_to_gain(p.threshold_db);
    let attack = ballistic_coeff(p.attack_ms, sr);
    let release = ballistic_coeff(p.release_ms, sr);
    let exponent = 1.0 / p.ratio - 1.0;
    let mut env = 0.0f32;
    for s in samples.iter_mut() {
        let level = s.abs();
        let c = if level > env { attack } else { release };
        env = c * env + (1.0 - c) * level;
        if env > threshold {
            *s *= (env / threshold).powf(exponent);
        }
    }
}

/// Brick-wall limiter: instant attack, smoothed release, hard ceiling at 0 dBFS.
fn limiter(samples: &mut [f32], p: &LimiterParams, sr: f32) {
    let threshold = db_to_gain(p.threshold_db);
    let release = ballistic_coeff(p.release_ms, sr);
    let mut env = 0.0f32;
    for s in samples.iter_mut() {
        let level = s.abs();
        env = if level > env {
            level
        } else {
            release * env + (1.0 - release) * level
        };
        if env > threshold {
            *s *= threshold / env;
        }
        *s = s.clamp(-1.0, 1.0);
    }
}

// --- modulation and delay ---

fn read_fractional(buf: &[f32], write: usize, delay: f32) -> f32 {
    let len = buf.len();
    let pos = write as f32 - delay;
    let pos = pos.rem_euclid(len as f32);
    let i0 = pos.floor() as usize % len;
    let i1 = (i0 + 1) % len;
    let frac = pos - pos.floor();
    buf[i0] * (1.0 - frac) + buf[i1] * frac
}

fn chorus(samples: &mut [f32], p: &ChorusParams, sr: f32) {
    let max_delay = (p.centre_delay_ms * (1.0 + p.depth) * 0.001 * sr).ceil() as usize + 2;
    let mut line = vec![0.0f32; max_delay + 1];
    let mut write = 0usize;
    let phase_inc = 2.0 * PI * p.rate_hz / sr;
    let mut phase = 0.0f32;
    for s in samples.iter_mut() {
        let delay_ms = p.centre_delay_ms * (1.0 + p.depth * phase.sin());
        let delay = (delay_ms * 0.001 * sr).max(1.0);
        let wet = read_fractional(&line, write, delay);
        line[write] = *s + wet * p.feedback;
        write = (write + 1) % line.len();
        *s = *s * (1.0 - p.mix) + wet * p.mix;
        phase = (phase + phase_inc) % (2.0 * PI);
    }
}

fn delay(samples: &mut [f32], p: &DelayParams, sr: f32) {
    let d = (p.delay_seconds * sr).round() as usize;
    if d == 0 {
        return;
    }
    let mut line = vec![0.0f32; d];
    let mut idx = 0usize;
    for s in samples.iter_mut() {
        let wet = line[idx];
        line[idx] = *s + wet * p.feedback;
        idx = (idx + 1) % d;
        *s = *s * (1.0 - p.mix) + wet * p.mix;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_valid_and_disabled() {
        let spec = PostProcessSpec::default();
        assert_eq!(spec.slots.len(), 10);
        assert!(!spec.any_enabled());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn out_of_order_slots_are_rejected() {
        let spec = PostProcessSpec {
            slots: vec![
                EffectSlot {
                    enabled: true,
                    effect: Effect::Delay(DelayParams::default()),
                },
                EffectSlot {
                    enabled: true,
                    effect: Effect::Gain(GainParams::default()),
                },
            ],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn enabled_kinds_follow_chain_order() {
        let spec = PostProcessSpec::default()
            .with(Effect::Delay(DelayParams::default()))
            .with(Effect::Reverb(ReverbParams::default()));
        assert_eq!(
            spec.enabled_kinds(),
            vec![EffectKind::Reverb, EffectKind::Delay]
        );
    }

    #[test]
    fn serde_uses_kind_tag() {
        let slot = EffectSlot {
            enabled: true,
            effect: Effect::Gain(GainParams { gain_db: 3.0 }),
        };
        let json = serde_json::to_string(&slot).unwrap();
        assert!(json.contains("\"kind\":\"gain\""), "{json}");
        let back: EffectSlot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, slot);
    }
}
