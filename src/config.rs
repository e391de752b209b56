// Pipeline windowing and precision configuration.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Numeric precision the networks are loaded with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Half,
    #[default]
    Full,
}

impl Precision {
    pub fn is_half(self) -> bool {
        matches!(self, Precision::Half)
    }

    /// Graph file to load for `base`: the `<stem>.fp16.onnx` sibling at half
    /// precision, `base` itself at full precision.
    pub fn graph_path(self, base: &Path) -> PathBuf {
        match self {
            Precision::Full => base.to_path_buf(),
            Precision::Half => {
                let stem = base
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("model");
                base.with_file_name(format!("{stem}.fp16.onnx"))
            }
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("{}={:?} is not a valid value; using the default", key, raw);
                default
            }
        },
    }
}

/// Chunking constants of the windowed pipeline, expressed in seconds.
///
/// `x_pad` is the reflected context added around every chunk, `x_query` the
/// half-width of the quiet-point search around each nominal cut, `x_center`
/// the spacing between nominal cuts and `x_max` the input length above which
/// the audio is cut at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub x_pad: u32,
    pub x_query: u32,
    pub x_center: u32,
    pub x_max: u32,
    pub precision: Precision,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            x_pad: 1,
            x_query: 6,
            x_center: 38,
            x_max: 41,
            precision: Precision::Full,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup` (an environment-like source).
    /// Unparseable values are logged and replaced by the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let precision = match lookup("VC_PRECISION").as_deref().map(str::trim) {
            None => defaults.precision,
            Some("half") | Some("fp16") => Precision::Half,
            Some("full") | Some("fp32") => Precision::Full,
            Some(other) => {
                warn!("VC_PRECISION={:?} is not half or full; using the default", other);
                defaults.precision
            }
        };

        Self {
            x_pad: parse_or(&lookup, "VC_X_PAD", defaults.x_pad),
            x_query: parse_or(&lookup, "VC_X_QUERY", defaults.x_query),
            x_center: parse_or(&lookup, "VC_X_CENTER", defaults.x_center),
            x_max: parse_or(&lookup, "VC_X_MAX", defaults.x_max),
            precision,
        }
    }

    /// Sanity check used before a pipeline is built.
    pub fn validate(&self) -> Result<(), String> {
        if self.x_center == 0 {
            return Err("x_center must be positive".into());
        }
        // Neighbouring search windows must not overlap, or split points could
        // come out of order.
        if 2 * self.x_query >= self.x_center {
            return Err(format!(
                "2 * x_query ({}) must be smaller than x_center ({})",
                self.x_query, self.x_center
            ));
        }
        if self.x_max < self.x_center {
            return Err(format!(
                "x_max ({}) must not be smaller than x_center ({})",
                self.x_max, self.x_center
            ));
        }
        Ok(())
    }
}
