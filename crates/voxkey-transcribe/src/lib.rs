//! Recognition-engine backends for voxkey.
//!
//! This crate provides a trait-based abstraction for turning a finished
//! audio artifact into text, with implementations for an OpenAI-compatible
//! API and local Whisper models. Scheduling, cancellation, and timeouts
//! are the caller's concern; an engine only does the audio-to-text work.

mod openai;

#[cfg(feature = "local-whisper")]
mod local;
#[cfg(feature = "local-whisper")]
mod model;

use async_trait::async_trait;
#[cfg(feature = "local-whisper")]
pub use local::{LocalWhisperClient, LocalWhisperConfig};
#[cfg(feature = "local-whisper")]
pub use model::{download_model, ensure_model, model_exists, model_filename, model_path};
pub use openai::{OpenAIClient, OpenAIConfig};
use thiserror::Error;
use voxkey_core::ModelOptions;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("failed to load recognition model: {0}")]
    ModelLoad(String),

    #[error("recognition engine failed: {0}")]
    Engine(String),

    #[error("invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Trait for recognition engines.
///
/// Implement this trait to add new backends (other cloud providers,
/// other local model runtimes, etc.)
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to text.
    ///
    /// # Arguments
    /// * `audio` - WAV-encoded audio data; ownership moves to the engine.
    /// * `options` - Model size and language preference. Backends honor
    ///   what applies to them (the remote backend ignores `model_size`).
    async fn transcribe(&self, audio: Vec<u8>, options: &ModelOptions) -> Result<String>;

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;
}
