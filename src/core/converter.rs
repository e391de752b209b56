//! Top-level entry points. A [`VoiceConverter`] owns the model, embedder and
//! index caches plus the inference backend, and runs one conversion at a time.

use std::{
    fs,
    path::Path,
    sync::Arc,
    time::Instant,
};

use tracing::{debug, error, info, warn};

use crate::{
    config::PipelineConfig,
    core::{
        audio::{downmix_to_mono, limit_peak, load_audio_mono, normalize_peak, resample, resampled_len, INPUT_PEAK},
        batch::{collect_inputs, output_path_for, PidMarker},
        denoise::reduce_noise,
        embedder::EmbedderCache,
        export::{export, AudioEncoder, FfmpegEncoder},
        f0::{F0Extractor, F0Override, PitchOptions},
        formant::shift_formants,
        index::{resolve_index_path, IndexCache, SimilarityIndex},
        pipeline::{Pipeline, RunOptions, Stages, OUTPUT_PEAK},
        segment::{merge, split_to_dir, SplitLayout},
        synth::SynthesizerAdapter,
    },
    error::{Result, VcError},
    io::progress::{emit_convert_progress, ConvertProgress},
    model::{backend::InferenceBackend, checkpoint::ModelCheckpoint, model_manager::ModelCache},
    types::{AudioData, BatchReport, ConversionRequest, ConversionResult, ExportFormat, INTERNAL_SAMPLE_RATE},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConverterState {
    Idle,
    Loaded,
    Converting,
}

pub struct VoiceConverter {
    backend: Box<dyn InferenceBackend>,
    config: PipelineConfig,
    models: ModelCache,
    embedders: EmbedderCache,
    indexes: IndexCache,
    f0: F0Extractor,
    encoder: Box<dyn AudioEncoder>,
    state: ConverterState,
}

impl VoiceConverter {
    pub fn new(backend: Box<dyn InferenceBackend>, config: PipelineConfig) -> Result<Self> {
        config.validate().map_err(VcError::InvalidRequest)?;
        Ok(Self {
            backend,
            config,
            models: ModelCache::new(),
            embedders: EmbedderCache::new(),
            indexes: IndexCache::new(),
            f0: F0Extractor::new(INTERNAL_SAMPLE_RATE),
            encoder: Box::new(FfmpegEncoder::default()),
            state: ConverterState::Idle,
        })
    }

    /// Replaces the encoder used for non-WAV exports.
    pub fn with_encoder(mut self, encoder: Box<dyn AudioEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn state(&self) -> ConverterState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Makes `path` the loaded model; a no-op when it already is.
    pub fn load_model(&mut self, path: &Path) -> Result<ModelCheckpoint> {
        let handle = self
            .models
            .ensure_model(path, self.backend.as_ref(), self.config.precision)?;
        let checkpoint = handle.checkpoint.clone();
        self.state = ConverterState::Loaded;
        Ok(checkpoint)
    }

    pub fn unload(&mut self) {
        self.models.evict();
        self.state = ConverterState::Idle;
    }

    pub fn model_load_count(&self) -> usize {
        self.models.load_count()
    }

    /// Converts an in-memory buffer. Cleaning, effects and normalisation run as
    /// requested; nothing is written to disk.
    pub fn convert_buffer(&mut self, audio: &AudioData, req: &ConversionRequest) -> Result<AudioData> {
        let result = self.try_convert_buffer(audio, req);
        self.settle();
        if let Err(e) = &result {
            error!("conversion of in-memory audio failed: {}", e);
        }
        result
    }

    fn try_convert_buffer(&mut self, audio: &AudioData, req: &ConversionRequest) -> Result<AudioData> {
        req.validate()?;
        self.load_model(&req.model_path)?;
        let mono = downmix_to_mono(&audio.samples, audio.channels);
        let mut input = resample(&mono, audio.sample_rate, INTERNAL_SAMPLE_RATE)?;
        prepare_input(&mut input, req);

        let (rate, mut samples) = self.render(&input, req)?;
        self.post_chain(&mut samples, rate, req);
        Ok(AudioData::mono(samples, rate))
    }

    /// Converts `input` and writes the result to `output` (extension rewritten
    /// to the export format). Nothing is written when the model cannot load.
    pub fn convert_audio(
        &mut self,
        input: &Path,
        output: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult> {
        let started = Instant::now();
        let result = self.try_convert_audio(input, output, req);
        self.settle();
        match &result {
            Ok(r) => {
                info!(
                    "converted {} -> {} in {:.2}s",
                    input.display(),
                    r.output_path.display(),
                    started.elapsed().as_secs_f32()
                );
                emit_convert_progress(ConvertProgress::Finished);
            }
            Err(e) => error!("conversion of {} failed: {}", input.display(), e),
        }
        result
    }

    fn try_convert_audio(
        &mut self,
        input: &Path,
        output: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult> {
        req.validate()?;
        self.load_model(&req.model_path)?;

        emit_convert_progress(ConvertProgress::Stage("load"));
        let mut samples = load_audio_mono(input, INTERNAL_SAMPLE_RATE)?;
        prepare_input(&mut samples, req);

        if req.split_audio {
            return self.convert_split(input, &samples, output, req);
        }

        let (rate, converted) = self.render(&samples, req)?;
        self.finish(converted, rate, output, req, 1)
    }

    fn convert_split(
        &mut self,
        input: &Path,
        samples: &[f32],
        output: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult> {
        emit_convert_progress(ConvertProgress::Stage("split"));
        let layout = split_to_dir(input, samples, INTERNAL_SAMPLE_RATE)?;
        let paths = layout.segment_paths();
        let total = paths.len();

        // An f0 file describes the whole input, not any one segment.
        let mut segment_req = req.clone();
        if let Some(f0_file) = segment_req.f0_file.take() {
            info!("f0 file {} is not applied to split segments", f0_file.display());
        }

        for (index, path) in paths.iter().enumerate() {
            self.convert_segment(path, &segment_req)
                .map_err(|source| VcError::Segment {
                    index,
                    path: path.clone(),
                    source: Box::new(source),
                })?;
            emit_convert_progress(ConvertProgress::Segments {
                done: index + 1,
                total,
            });
        }

        emit_convert_progress(ConvertProgress::Stage("merge"));
        let (rate, merged) = merge(&layout)?;
        cleanup_split(&layout);
        self.finish(merged, rate, output, req, total)
    }

    /// Converts one segment file in place with splitting and finishing off.
    fn convert_segment(&mut self, path: &Path, req: &ConversionRequest) -> Result<()> {
        let samples = load_audio_mono(path, INTERNAL_SAMPLE_RATE)?;
        let (rate, converted) = self.render(&samples, req)?;
        export(&converted, rate, path, ExportFormat::Wav, self.encoder.as_ref())?;
        debug!("segment {} converted ({} samples)", path.display(), converted.len());
        Ok(())
    }

    /// Runs the windowed pipeline over 16 kHz mono input. Returns the output
    /// rate and the converted samples.
    fn render(&mut self, audio: &[f32], req: &ConversionRequest) -> Result<(u32, Vec<f32>)> {
        let precision = self.config.precision;
        let checkpoint = self.load_model(&req.model_path)?;
        if req.speaker_id < 0 || req.speaker_id as usize >= checkpoint.speakers {
            return Err(VcError::InvalidRequest(format!(
                "speaker id {} out of range, model has {} speakers",
                req.speaker_id, checkpoint.speakers
            )));
        }

        self.state = ConverterState::Converting;
        if checkpoint.use_f0 {
            self.prepare_pitch_estimators(req);
        }
        let f0_override = req.f0_file.as_ref().and_then(|p| match F0Override::load(p) {
            Ok(o) => Some(o),
            Err(e) => {
                warn!("ignoring f0 file {}: {}", p.display(), e);
                None
            }
        });
        let index: Option<Arc<SimilarityIndex>> =
            resolve_index_path(&req.index_path).and_then(|p| self.indexes.get_or_load(&p));

        emit_convert_progress(ConvertProgress::Stage("embedder"));
        let embedder = self.embedders.ensure(
            &req.embedder_model,
            req.embedder_model_custom.as_ref(),
            self.backend.as_ref(),
            precision,
        )?;
        let handle = self
            .models
            .ensure_model(&req.model_path, self.backend.as_ref(), precision)?;

        let model_rate = handle.checkpoint.target_sample_rate;
        let opts = RunOptions {
            speaker_id: req.speaker_id,
            use_f0: handle.checkpoint.use_f0,
            embedding_width: handle.checkpoint.embedding_width(),
            index_rate: req.index_rate,
            protect: req.protect,
            volume_envelope: req.volume_envelope,
            pitch: PitchOptions {
                method: req.f0_method.clone(),
                hop_length: req.hop_length,
                semitones: req.pitch,
                filter_radius: req.filter_radius,
                autotune_strength: req.f0_autotune.then_some(req.f0_autotune_strength),
                f0_override,
                override_offset: 0,
            },
        };

        let pipeline = Pipeline::new(&self.config, model_rate);
        let synthesizer = SynthesizerAdapter::new(
            handle.synthesizer.as_mut(),
            model_rate,
            req.requested_output_rate(),
        );
        let output_rate = synthesizer.output_rate();
        let mut stages = Stages {
            embedder,
            synthesizer,
            f0: &mut self.f0,
            index: index.as_deref(),
        };

        emit_convert_progress(ConvertProgress::Stage("convert"));
        let converted = pipeline.run(&mut stages, audio, &opts)?;
        Ok((output_rate, converted))
    }

    fn prepare_pitch_estimators(&mut self, req: &ConversionRequest) {
        for method in F0Extractor::required_methods(&req.f0_method) {
            if self.f0.has_estimator(&method) {
                continue;
            }
            match self.backend.load_pitch_estimator(&method) {
                Ok(Some(estimator)) => {
                    info!("pitch estimator {} loaded", method);
                    self.f0.register(method, estimator);
                }
                Ok(None) => debug!("backend has no estimator for {}", method),
                Err(e) => warn!("loading pitch estimator {} failed: {}", method, e),
            }
        }
    }

    /// Effects chain, then noise reduction, then peak normalisation.
    fn post_chain(&self, samples: &mut Vec<f32>, rate: u32, req: &ConversionRequest) {
        if req.post_process && req.effects.any_enabled() {
            emit_convert_progress(ConvertProgress::Stage("effects"));
            req.effects.apply(samples, rate);
        }
        if req.clean_audio {
            emit_convert_progress(ConvertProgress::Stage("clean"));
            *samples = reduce_noise(samples, req.clean_strength);
        }
        if req.normalize {
            normalize_peak(samples, OUTPUT_PEAK);
        }
    }

    fn finish(
        &self,
        mut samples: Vec<f32>,
        rate: u32,
        output: &Path,
        req: &ConversionRequest,
        segments: usize,
    ) -> Result<ConversionResult> {
        self.post_chain(&mut samples, rate, req);
        emit_convert_progress(ConvertProgress::Stage("export"));
        let (output_path, sample_rate) =
            export(&samples, rate, output, req.export_format, self.encoder.as_ref())?;
        Ok(ConversionResult {
            output_path,
            sample_rate,
            samples: resampled_len(samples.len(), rate, sample_rate),
            segments,
        })
    }

    /// Converts every audio file of `input_dir` in name order. Files whose
    /// output already exists are skipped. Deleting `pid_file` stops the batch
    /// before the next file; the marker is removed when the batch completes.
    pub fn convert_batch(
        &mut self,
        input_dir: &Path,
        output_dir: &Path,
        pid_file: &Path,
        req: &ConversionRequest,
    ) -> Result<BatchReport> {
        req.validate()?;
        let inputs = collect_inputs(input_dir)?;
        fs::create_dir_all(output_dir)?;
        let marker = PidMarker::create(pid_file)?;
        info!(
            "batch: {} files from {} (marker {})",
            inputs.len(),
            input_dir.display(),
            marker.path().display()
        );

        let total = inputs.len();
        let mut report = BatchReport::default();
        for (i, input) in inputs.iter().enumerate() {
            if !marker.is_present() {
                warn!("pid marker {} removed; stopping batch", marker.path().display());
                return Err(VcError::Cancelled {
                    marker: marker.path().to_path_buf(),
                });
            }
            let output = output_path_for(input, output_dir, req.export_format);
            if output.exists() {
                info!("skipping {}: {} exists", input.display(), output.display());
                report.skipped.push(output);
            } else {
                let result = self.convert_audio(input, &output, req)?;
                report.converted.push(result.output_path);
            }
            emit_convert_progress(ConvertProgress::Batch { done: i + 1, total });
        }

        marker.remove();
        Ok(report)
    }

    fn settle(&mut self) {
        self.state = if self.models.is_loaded() {
            ConverterState::Loaded
        } else {
            ConverterState::Idle
        };
    }
}

/// Formant shift (when requested), then the input peak ceiling.
fn prepare_input(samples: &mut Vec<f32>, req: &ConversionRequest) {
    if req.formant_shifting {
        *samples = shift_formants(
            samples,
            INTERNAL_SAMPLE_RATE,
            req.formant_quefrency,
            req.formant_timbre,
        );
    }
    limit_peak(samples, INPUT_PEAK);
}

/// Drops the manifest and the per-segment files once they are merged.
fn cleanup_split(layout: &SplitLayout) {
    if let Err(e) = fs::remove_file(&layout.manifest_path) {
        warn!("could not remove {}: {}", layout.manifest_path.display(), e);
    }
    if let Err(e) = fs::remove_dir_all(&layout.dir) {
        warn!("could not remove {}: {}", layout.dir.display(), e);
    }
}
