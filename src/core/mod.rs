pub mod audio;
pub mod batch;
pub mod converter;
pub mod denoise;
pub mod dsp;
pub mod effects;
pub mod embedder;
pub mod export;
pub mod f0;
pub mod formant;
pub mod index;
pub mod pipeline;
pub mod segment;
pub mod synth;
