//! Silence-based splitting of long inputs and the timestamp manifest used to
//! put the converted pieces back together.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    core::audio::{downmix_to_mono, read_audio, resampled_len, write_wav_mono},
    error::{Result, VcError},
};

pub const MANIFEST_HEADER: &str = "# voice-convert segments v1";

const FRAME_MS: usize = 10;
const SILENCE_THRESHOLD_DB: f32 = -70.0;
const MIN_SILENCE_MS: usize = 750;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentSpan {
    pub start: usize,
    pub len: usize,
}

/// Non-silent stretches, split wherever at least 750 ms fall below -70 dBFS.
/// Fully silent input comes back as one span covering everything.
pub fn detect_segments(samples: &[f32], sample_rate: u32) -> Vec<SegmentSpan> {
    let whole = vec![SegmentSpan {
        start: 0,
        len: samples.len(),
    }];
    let frame = (sample_rate as usize * FRAME_MS / 1000).max(1);
    if samples.len() < frame {
        return whole;
    }

    let threshold = 10f32.powf(SILENCE_THRESHOLD_DB / 20.0);
    let silent: Vec<bool> = samples
        .chunks(frame)
        .map(|c| (c.iter().map(|s| s * s).sum::<f32>() / c.len() as f32).sqrt() < threshold)
        .collect();
    let min_run = MIN_SILENCE_MS / FRAME_MS;

    let mut spans = Vec::new();
    let mut seg_start: Option<usize> = None;
    let mut i = 0;
    while i < silent.len() {
        if silent[i] {
            let run_start = i;
            while i < silent.len() && silent[i] {
                i += 1;
            }
            let long_gap = i - run_start >= min_run;
            if long_gap {
                if let Some(s) = seg_start.take() {
                    spans.push((s, run_start));
                }
            }
        } else {
            if seg_start.is_none() {
                seg_start = Some(i);
            }
            i += 1;
        }
    }
    if let Some(s) = seg_start {
        spans.push((s, silent.len()));
    }

    if spans.is_empty() {
        return whole;
    }
    spans
        .into_iter()
        .map(|(a, b)| {
            let start = a * frame;
            let end = (b * frame).min(samples.len());
            SegmentSpan {
                start,
                len: end - start,
            }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub index: usize,
    pub start: usize,
    pub len: usize,
    pub file: String,
}

/// Text manifest, one item per line:
/// header, `sample_rate <hz>`, `total_samples <n>`, then
/// `segment <i> <start_sample> <len> <file_name>` per piece.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentManifest {
    pub sample_rate: u32,
    pub total_samples: usize,
    pub entries: Vec<ManifestEntry>,
}

impl SegmentManifest {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{MANIFEST_HEADER}");
        let _ = writeln!(out, "sample_rate {}", self.sample_rate);
        let _ = writeln!(out, "total_samples {}", self.total_samples);
        for e in &self.entries {
            let _ = writeln!(out, "segment {} {} {} {}", e.index, e.start, e.len, e.file);
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some(MANIFEST_HEADER) {
            return Err(VcError::Manifest("missing manifest header".into()));
        }

        let mut sample_rate = None;
        let mut total_samples = None;
        let mut entries = Vec::new();
        for line in lines {
            let mut parts = line.splitn(5, ' ');
            match parts.next() {
                Some("sample_rate") => sample_rate = parts.next().and_then(|v| v.parse().ok()),
                Some("total_samples") => total_samples = parts.next().and_then(|v| v.parse().ok()),
                Some("segment") => {
                    let index = parts.next().and_then(|v| v.parse().ok());
                    let start = parts.next().and_then(|v| v.parse().ok());
                    let len = parts.next().and_then(|v| v.parse().ok());
                    let file = parts.next().map(str::to_string);
                    match (index, start, len, file) {
                        (Some(index), Some(start), Some(len), Some(file)) if !file.is_empty() => {
                            entries.push(ManifestEntry {
                                index,
                                start,
                                len,
                                file,
                            })
                        }
                        _ => return Err(VcError::Manifest(format!("bad segment line '{line}'"))),
                    }
                }
                _ => return Err(VcError::Manifest(format!("unknown line '{line}'"))),
            }
        }

        let sample_rate =
            sample_rate.ok_or_else(|| VcError::Manifest("missing sample_rate".into()))?;
        let total_samples =
            total_samples.ok_or_else(|| VcError::Manifest("missing total_samples".into()))?;
        entries.sort_by_key(|e| e.index);
        Ok(Self {
            sample_rate,
            total_samples,
            entries,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }
}

/// Where a split input's pieces live.
#[derive(Clone, Debug)]
pub struct SplitLayout {
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: SegmentManifest,
}

impl SplitLayout {
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.manifest
            .entries
            .iter()
            .map(|e| self.dir.join(&e.file))
            .collect()
    }
}

/// `<dir>/<stem>/` for the pieces and `<dir>/<stem>_timestamps.txt` for the manifest.
pub fn layout_paths(input: &Path) -> (PathBuf, PathBuf) {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    (
        parent.join(stem),
        parent.join(format!("{stem}_timestamps.txt")),
    )
}

/// Cuts `samples` on silence and writes `chunk{i}.wav` files plus the manifest.
pub fn split_to_dir(input: &Path, samples: &[f32], sample_rate: u32) -> Result<SplitLayout> {
    let (dir, manifest_path) = layout_paths(input);
    fs::create_dir_all(&dir)?;

    let spans = detect_segments(samples, sample_rate);
    let mut entries = Vec::with_capacity(spans.len());
    for (i, span) in spans.iter().enumerate() {
        let file = format!("chunk{i}.wav");
        write_wav_mono(
            dir.join(&file),
            &samples[span.start..span.start + span.len],
            sample_rate,
        )?;
        entries.push(ManifestEntry {
            index: i,
            start: span.start,
            len: span.len,
            file,
        });
    }

    let manifest = SegmentManifest {
        sample_rate,
        total_samples: samples.len(),
        entries,
    };
    manifest.save(&manifest_path)?;
    info!(
        "split {} into {} segments under {}",
        input.display(),
        manifest.entries.len(),
        dir.display()
    );
    Ok(SplitLayout {
        dir,
        manifest_path,
        manifest,
    })
}

/// Places every converted piece at its scaled start in a silent buffer of the
/// scaled total length. Pieces overwrite and are clipped at the end.
pub fn merge(layout: &SplitLayout) -> Result<(u32, Vec<f32>)> {
    let manifest = SegmentManifest::load(&layout.manifest_path)?;
    let mut out_rate = None;
    let mut pieces = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let audio = read_audio(layout.dir.join(&entry.file))?;
        let mono = downmix_to_mono(&audio.samples, audio.channels);
        match out_rate {
            None => out_rate = Some(audio.sample_rate),
            Some(r) if r != audio.sample_rate => {
                return Err(VcError::Manifest(format!(
                    "{} is at {} Hz, other segments at {} Hz",
                    entry.file, audio.sample_rate, r
                )))
            }
            _ => {}
        }
        pieces.push((entry.start, mono));
    }
    let out_rate = out_rate.unwrap_or(manifest.sample_rate);

    let total = resampled_len(manifest.total_samples, manifest.sample_rate, out_rate);
    let mut merged = vec![0.0f32; total];
    for (start, piece) in pieces {
        let at = resampled_len(start, manifest.sample_rate, out_rate);
        if at >= total {
            continue;
        }
        let n = piece.len().min(total - at);
        merged[at..at + n].copy_from_slice(&piece[..n]);
    }
    debug!("merged {} samples at {} Hz", merged.len(), out_rate);
    Ok((out_rate, merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_text_round_trips() {
        let m = SegmentManifest {
            sample_rate: 16_000,
            total_samples: 48_000,
            entries: vec![
                ManifestEntry { index: 0, start: 0, len: 16_000, file: "chunk0.wav".into() },
                ManifestEntry { index: 1, start: 32_000, len: 16_000, file: "chunk1.wav".into() },
            ],
        };
        assert_eq!(SegmentManifest::parse(&m.to_text()).unwrap(), m);
    }

    #[test]
    fn manifest_without_header_is_rejected() {
        assert!(SegmentManifest::parse("sample_rate 16000\n").is_err());
    }

    #[test]
    fn short_gaps_do_not_split() {
        let sr = 16_000;
        let mut x = vec![0.3f32; sr as usize * 3];
        // 0.5 s gap
        for s in &mut x[16_000..24_000] {
            *s = 0.0;
        }
        assert_eq!(detect_segments(&x, sr).len(), 1);
    }

    #[test]
    fn long_gaps_split() {
        let sr = 16_000;
        let mut x = vec![0.3f32; sr as usize * 4];
        for s in &mut x[16_000..40_000] {
            *s = 0.0;
        }
        let spans = detect_segments(&x, sr);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], SegmentSpan { start: 0, len: 16_000 });
        assert_eq!(spans[1].start, 40_000);
    }
}
