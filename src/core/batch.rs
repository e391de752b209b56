//! Directory conversion helpers: input discovery, output naming and the PID
//! marker callers delete to stop a running batch.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{error::Result, types::ExportFormat};

pub const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "m4a", "ogg", "opus"];

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Audio files directly inside `dir`, sorted by file name.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_audio(&path) {
            inputs.push(path);
        }
    }
    inputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("{} audio files in {}", inputs.len(), dir.display());
    Ok(inputs)
}

/// `<out_dir>/<stem>_output.<ext>`
pub fn output_path_for(input: &Path, out_dir: &Path, format: ExportFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    out_dir.join(format!("{stem}_output.{}", format.extension()))
}

/// File holding the running process id while a batch is in flight.
pub struct PidMarker {
    path: PathBuf,
}

impl PidMarker {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not remove pid marker {}: {}", self.path.display(), e);
        }
    }
}
