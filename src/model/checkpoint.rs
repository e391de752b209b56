use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{Result, VcError},
    types::ModelVersion,
};

#[derive(Debug, Deserialize)]
struct CheckpointFile {
    config: Vec<Value>,
    #[serde(default = "default_f0")]
    f0: u8,
    #[serde(default)]
    version: Option<ModelVersion>,
    weights: PathBuf,
    #[serde(default)]
    speakers: Option<usize>,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    epochs: Option<u64>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created: Option<String>,
}

fn default_f0() -> u8 {
    1
}

/// Metadata of one generator checkpoint bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelCheckpoint {
    pub path: PathBuf,
    /// Network hyperparameters; sample rate last, speaker count third from last.
    pub config: Vec<Value>,
    pub target_sample_rate: u32,
    pub speakers: usize,
    pub use_f0: bool,
    pub version: ModelVersion,
    /// Generator weights, resolved against the manifest's directory.
    pub weights_path: PathBuf,
    pub info: Option<String>,
    pub epochs: Option<u64>,
    pub author: Option<String>,
    pub created: Option<String>,
}

impl ModelCheckpoint {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| VcError::model(path, format!("cannot read checkpoint: {e}")))?;
        let file: CheckpointFile = serde_json::from_str(&text)
            .map_err(|e| VcError::model(path, format!("malformed checkpoint: {e}")))?;

        let n = file.config.len();
        if n < 3 {
            return Err(VcError::model(
                path,
                format!("config holds {n} entries, expected at least 3"),
            ));
        }
        let target_sample_rate = parse_rate(&file.config[n - 1])
            .ok_or_else(|| VcError::model(path, "config[-1] is not a sample rate"))?;
        let speakers = match file.speakers {
            Some(s) => s,
            None => file.config[n - 3]
                .as_u64()
                .map(|s| s as usize)
                .ok_or_else(|| VcError::model(path, "config[-3] is not a speaker count"))?,
        };
        if speakers == 0 {
            return Err(VcError::model(path, "checkpoint declares zero speakers"));
        }

        let weights_path = if file.weights.is_absolute() {
            file.weights.clone()
        } else {
            path.parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&file.weights)
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: file.config,
            target_sample_rate,
            speakers,
            use_f0: file.f0 != 0,
            version: file.version.unwrap_or_default(),
            weights_path,
            info: file.info,
            epochs: file.epochs,
            author: file.author,
            created: file.created,
        })
    }

    pub fn embedding_width(&self) -> usize {
        self.version.embedding_width()
    }
}

/// Accepts `40000`, `"40000"` or `"40k"`.
fn parse_rate(v: &Value) -> Option<u32> {
    if let Some(n) = v.as_u64() {
        return u32::try_from(n).ok().filter(|&r| r > 0);
    }
    let s = v.as_str()?.trim().to_ascii_lowercase();
    let rate = match s.strip_suffix('k') {
        Some(k) => k.parse::<f32>().ok().map(|k| (k * 1000.0).round() as u32),
        None => s.parse::<u32>().ok(),
    };
    rate.filter(|&r| r > 0)
}

/// Human-readable summary of a checkpoint, as printed by the `info` command.
pub fn model_information<P: AsRef<Path>>(path: P) -> Result<String> {
    let ckpt = ModelCheckpoint::load(path)?;
    let name = ckpt
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    let mut lines = vec![
        format!("Model name: {name}"),
        format!("Version: {}", ckpt.version),
        format!("Sample rate: {} Hz", ckpt.target_sample_rate),
        format!("Pitch guidance: {}", if ckpt.use_f0 { "yes" } else { "no" }),
        format!("Speakers: {}", ckpt.speakers),
        format!("Embedding width: {}", ckpt.embedding_width()),
        format!("Weights: {}", ckpt.weights_path.display()),
    ];
    if let Some(epochs) = ckpt.epochs {
        lines.push(format!("Epochs: {epochs}"));
    }
    if let Some(author) = &ckpt.author {
        lines.push(format!("Author: {author}"));
    }
    if let Some(created) = &ckpt.created {
        lines.push(format!("Created: {created}"));
    }
    if let Some(info) = &ckpt.info {
        lines.push(format!("Info: {info}"));
    }
    Ok(lines.join("\n"))
}
