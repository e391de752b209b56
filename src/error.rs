use std::path::PathBuf;

use thiserror::Error;

/// Central error type for the voice-convert-core crate.
#[derive(Debug, Error)]
pub enum VcError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Domain-specific variants
    #[error("Model error for {path}: {reason}")]
    Model { path: String, reason: String },

    #[error("Embedder error: {0}")]
    Embedder(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Segment {index} ({path}) failed: {source}")]
    Segment {
        index: usize,
        path: PathBuf,
        #[source]
        source: Box<VcError>,
    },

    #[error("Batch cancelled: marker {marker} was removed")]
    Cancelled { marker: PathBuf },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Manifest error: {0}")]
    Manifest(String),
}

impl VcError {
    pub fn model(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        VcError::Model {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for VcError {
    fn from(e: std::io::Error) -> Self {
        VcError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for VcError {
    fn from(e: serde_json::Error) -> Self {
        VcError::Anyhow(e.into())
    }
}

impl From<hound::Error> for VcError {
    fn from(e: hound::Error) -> Self {
        VcError::Anyhow(e.into())
    }
}

impl From<symphonia::core::errors::Error> for VcError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        VcError::Anyhow(e.into())
    }
}

impl From<rubato::ResampleError> for VcError {
    fn from(e: rubato::ResampleError) -> Self {
        VcError::Anyhow(e.into())
    }
}

impl From<rubato::ResamplerConstructionError> for VcError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        VcError::Anyhow(e.into())
    }
}

impl From<ndarray::ShapeError> for VcError {
    fn from(e: ndarray::ShapeError) -> Self {
        VcError::Anyhow(e.into())
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for VcError {
    fn from(e: ort::Error) -> Self {
        VcError::Anyhow(anyhow::anyhow!("onnxruntime: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, VcError>;
