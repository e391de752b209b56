use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis};
use tracing::info;

use crate::{
    config::Precision,
    error::{Result, VcError},
    model::backend::{Embedder, InferenceBackend},
};

/// Exactly one loaded embedder at a time; requesting another evicts it.
#[derive(Default)]
pub struct EmbedderCache {
    current: Option<(String, Box<dyn Embedder>)>,
}

impl EmbedderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(id: &str, custom: Option<&Path>) -> String {
        match custom {
            Some(p) => p.display().to_string(),
            None => id.to_string(),
        }
    }

    pub fn ensure(
        &mut self,
        id: &str,
        custom: Option<&PathBuf>,
        backend: &dyn InferenceBackend,
        precision: Precision,
    ) -> Result<&mut (dyn Embedder + 'static)> {
        let custom = custom.map(|p| p.as_path());
        let key = Self::key(id, custom);
        let hit = matches!(&self.current, Some((k, _)) if *k == key);
        if !hit {
            // Free the previous weights before loading the next ones.
            self.current = None;
            let embedder = backend
                .load_embedder(id, custom, precision)
                .map_err(|e| VcError::Embedder(format!("loading '{key}': {e}")))?;
            info!("embedder '{}' loaded", key);
            self.current = Some((key, embedder));
        }
        match self.current.as_mut() {
            Some((_, e)) => Ok(e.as_mut()),
            None => Err(VcError::Embedder("embedder cache is empty".into())),
        }
    }

    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|(k, _)| k.as_str())
    }
}

/// Embeds `audio` and checks the width the generator expects.
pub fn extract_features(
    embedder: &mut dyn Embedder,
    audio: &[f32],
    width: usize,
) -> Result<Array2<f32>> {
    let feats = embedder.embed(audio, width)?;
    if feats.ncols() != width {
        return Err(VcError::Embedder(format!(
            "embedder produced width {}, model expects {}",
            feats.ncols(),
            width
        )));
    }
    Ok(feats)
}

/// Repeats every row so frames advance `grid_hop` samples instead of `native_hop`.
pub fn upsample_frames(feats: &Array2<f32>, native_hop: usize, grid_hop: usize) -> Array2<f32> {
    let factor = (native_hop / grid_hop.max(1)).max(1);
    if factor == 1 {
        return feats.clone();
    }
    let rows: Vec<usize> = (0..feats.nrows() * factor).map(|i| i / factor).collect();
    feats.select(Axis(0), &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn upsample_repeats_rows() {
        let f = array![[1.0f32, 2.0], [3.0, 4.0]];
        let up = upsample_frames(&f, 320, 160);
        assert_eq!(up, array![[1.0, 2.0], [1.0, 2.0], [3.0, 4.0], [3.0, 4.0]]);
    }
}
