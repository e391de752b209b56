//! # voice-convert-core
//!
//! Retrieval-based voice conversion: pitch tracking, windowed inference over
//! pluggable embedder and generator networks, index retrieval, an ordered
//! effects chain and export.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod types;

pub use crate::{
    config::{PipelineConfig, Precision},
    core::{
        audio::{read_audio, write_audio},
        converter::{ConverterState, VoiceConverter},
        effects::{Effect, EffectKind, EffectSlot, PostProcessSpec},
        export::{AudioEncoder, FfmpegEncoder},
        f0::{F0Method, PitchCurve},
        index::SimilarityIndex,
    },
    error::{Result, VcError},
    io::progress::{
        clear_convert_progress_callback, set_convert_progress_callback, ConvertProgress,
    },
    model::{
        backend::{Embedder, InferenceBackend, PitchEstimator, PitchInput, Synthesizer},
        checkpoint::{model_information, ModelCheckpoint},
    },
    types::{
        AudioData, BatchReport, ConversionRequest, ConversionResult, ExportFormat, ModelVersion,
    },
};

#[cfg(feature = "onnx")]
pub use crate::model::onnx::OnnxBackend;
