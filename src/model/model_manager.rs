use crate::{
    config::Precision,
    error::{Result, VcError},
    model::{
        backend::{InferenceBackend, Synthesizer},
        checkpoint::ModelCheckpoint,
    },
};

use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct ModelHandle {
    pub checkpoint: ModelCheckpoint,
    pub synthesizer: Box<dyn Synthesizer>,
}

/// Holds at most one loaded generator, keyed by its canonical checkpoint path.
#[derive(Default)]
pub struct ModelCache {
    current: Option<(PathBuf, ModelHandle)>,
    loads: usize,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached model for `path`, loading it (and evicting any other)
    /// on a miss.
    pub fn ensure_model(
        &mut self,
        path: &Path,
        backend: &dyn InferenceBackend,
        precision: Precision,
    ) -> Result<&mut ModelHandle> {
        let key = cache_key(path);
        let hit = matches!(&self.current, Some((p, _)) if *p == key);

        if !hit {
            if let Some((old, _)) = self.current.take() {
                info!("evicting model {}", old.display());
            }
            let checkpoint = ModelCheckpoint::load(path)?;
            let synthesizer = backend
                .load_synthesizer(&checkpoint, precision)
                .map_err(|e| VcError::model(path, e.to_string()))?;
            info!(
                "loaded model {} ({}, {} Hz, f0={})",
                path.display(),
                checkpoint.version,
                checkpoint.target_sample_rate,
                checkpoint.use_f0
            );
            self.loads += 1;
            self.current = Some((
                key,
                ModelHandle {
                    checkpoint,
                    synthesizer,
                },
            ));
        } else {
            debug!("model cache hit for {}", path.display());
        }

        match self.current.as_mut() {
            Some((_, handle)) => Ok(handle),
            None => Err(VcError::model(path, "model cache is empty after load")),
        }
    }

    pub fn current(&mut self) -> Option<&mut ModelHandle> {
        self.current.as_mut().map(|(_, h)| h)
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(p, _)| p.as_path())
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    pub fn evict(&mut self) {
        self.current = None;
    }

    /// Number of backend loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads
    }
}

pub(crate) fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
