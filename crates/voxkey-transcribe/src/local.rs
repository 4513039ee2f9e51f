//! Local Whisper transcription using whisper-rs.
//!
//! This module provides local transcription using the whisper.cpp library
//! via whisper-rs bindings. The model context is loaded lazily and kept
//! while the requested model size stays the same.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};
use voxkey_core::{ModelOptions, ModelSize};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::model::model_path;
use crate::{Result, TranscribeError, Transcriber};

/// Sample rate whisper.cpp expects.
const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Configuration for the local Whisper transcriber.
#[derive(Debug, Clone, Default)]
pub struct LocalWhisperConfig {
    /// Optional override path to the model file. When set, the model size
    /// from the per-session options is ignored.
    pub model_path: Option<PathBuf>,
}

impl LocalWhisperConfig {
    /// Create a config with a custom model path.
    pub fn with_model_path(mut self, path: PathBuf) -> Self {
        self.model_path = Some(path);
        self
    }
}

/// Local Whisper transcriber using whisper.cpp.
pub struct LocalWhisperClient {
    config: LocalWhisperConfig,
    /// Lazily initialized whisper context, tagged with the size it was
    /// loaded for so a size change reloads it.
    context: Mutex<Option<(ModelSize, WhisperContext)>>,
}

impl LocalWhisperClient {
    /// Create a new local Whisper client.
    pub fn new(config: LocalWhisperConfig) -> Self {
        Self {
            config,
            context: Mutex::new(None),
        }
    }

    /// Get or initialize the whisper context for a model size, returning a guard.
    fn ensure_context(
        &self,
        size: ModelSize,
    ) -> Result<std::sync::MutexGuard<'_, Option<(ModelSize, WhisperContext)>>> {
        let mut guard = self
            .context
            .lock()
            .map_err(|e| TranscribeError::ModelLoad(format!("Failed to lock context: {}", e)))?;

        let loaded_for = guard.as_ref().map(|(loaded, _)| *loaded);
        if loaded_for != Some(size) {
            let path = match &self.config.model_path {
                Some(p) => p.clone(),
                None => model_path(size).map_err(|e| TranscribeError::ModelLoad(e.to_string()))?,
            };

            info!(path = ?path, model = %size, "Loading Whisper model");

            let ctx = WhisperContext::new_with_params(
                path.to_str()
                    .ok_or_else(|| TranscribeError::ModelLoad("Invalid model path".to_string()))?,
                WhisperContextParameters::default(),
            )
            .map_err(|e| TranscribeError::ModelLoad(format!("Failed to load model: {}", e)))?;

            info!("Whisper model loaded successfully");
            *guard = Some((size, ctx));
        }
        Ok(guard)
    }

    /// Convert WAV audio data to 16kHz mono f32 samples.
    fn convert_audio(&self, audio: &[u8]) -> Result<Vec<f32>> {
        use std::io::Cursor;

        let cursor = Cursor::new(audio);
        let reader = hound::WavReader::new(cursor).map_err(|e| {
            TranscribeError::InvalidAudioFormat(format!("Failed to read WAV: {}", e))
        })?;

        let spec = reader.spec();
        let sample_rate = spec.sample_rate;
        let channels = spec.channels as usize;

        debug!(
            sample_rate = sample_rate,
            channels = channels,
            bits_per_sample = spec.bits_per_sample,
            "Converting audio"
        );

        // Read samples as f32
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    TranscribeError::InvalidAudioFormat(format!("Failed to read samples: {}", e))
                })?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                let max_val = (1u32 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| {
                        TranscribeError::InvalidAudioFormat(format!(
                            "Failed to read samples: {}",
                            e
                        ))
                    })?
                    .into_iter()
                    .map(|s| s as f32 / max_val)
                    .collect()
            }
        };

        // Convert to mono if stereo
        let mono_samples: Vec<f32> = if channels > 1 {
            samples
                .chunks(channels)
                .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
                .collect()
        } else {
            samples
        };

        // Artifacts normally arrive at 16 kHz already; resample when the
        // capture layer was configured differently.
        let resampled = if sample_rate != WHISPER_SAMPLE_RATE {
            resample(&mono_samples, sample_rate, WHISPER_SAMPLE_RATE)
        } else {
            mono_samples
        };

        Ok(resampled)
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let src_idx_floor = src_idx.floor() as usize;
        let frac = src_idx - src_idx_floor as f64;

        let sample = if src_idx_floor + 1 < samples.len() {
            let s0 = samples[src_idx_floor] as f64;
            let s1 = samples[src_idx_floor + 1] as f64;
            (s0 * (1.0 - frac) + s1 * frac) as f32
        } else if src_idx_floor < samples.len() {
            samples[src_idx_floor]
        } else {
            0.0
        };

        result.push(sample);
    }

    result
}

#[async_trait]
impl Transcriber for LocalWhisperClient {
    async fn transcribe(&self, audio: Vec<u8>, options: &ModelOptions) -> Result<String> {
        let samples = self.convert_audio(&audio)?;
        let language = options.language.code().map(|s| s.to_string());

        // Get the context (ensures the model for this size is loaded)
        let context = self.ensure_context(options.model_size)?;
        let (_, ctx) = context.as_ref().expect("context should be initialized");

        // Create a new state for this transcription
        let mut state = ctx
            .create_state()
            .map_err(|e| TranscribeError::Engine(format!("Failed to create state: {}", e)))?;

        // Configure transcription parameters
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        // Set language if provided, auto-detect otherwise
        params.set_language(language.as_deref());

        // Disable printing to stdout
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        // Run transcription
        state
            .full(params, &samples)
            .map_err(|e| TranscribeError::Engine(format!("Transcription failed: {}", e)))?;

        // Collect all segments into the result
        let num_segments = state
            .full_n_segments()
            .map_err(|e| TranscribeError::Engine(format!("Failed to get segments: {}", e)))?;

        let mut result = String::new();
        for i in 0..num_segments {
            let segment = state.full_get_segment_text(i).map_err(|e| {
                TranscribeError::Engine(format!("Failed to get segment {}: {}", i, e))
            })?;
            result.push_str(&segment);
        }

        Ok(result.trim().to_string())
    }

    fn name(&self) -> &str {
        "local-whisper"
    }
}
