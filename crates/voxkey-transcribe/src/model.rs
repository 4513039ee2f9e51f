//! Model management for local Whisper transcription.
//!
//! This module handles downloading and locating the ggml model files the
//! local backend runs on. Model sizes map to the quantized variants that
//! offer the best quality for their footprint.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use voxkey_core::{models_dir, ModelSize};

/// Base URL for downloading Whisper models from Hugging Face.
const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Returns the model filename for a model size.
pub fn model_filename(size: ModelSize) -> &'static str {
    match size {
        ModelSize::Tiny => "ggml-tiny-q8_0.bin",
        ModelSize::Base => "ggml-base-q8_0.bin",
        ModelSize::Small => "ggml-small-q8_0.bin",
        ModelSize::Medium => "ggml-medium-q8_0.bin",
        ModelSize::Large => "ggml-large-v3-turbo-q5_0.bin",
    }
}

/// Returns the download URL for a model size.
fn model_url(size: ModelSize) -> String {
    format!("{}/{}", MODEL_BASE_URL, model_filename(size))
}

/// Returns the approximate size of a model in bytes.
fn model_size_bytes(size: ModelSize) -> u64 {
    match size {
        ModelSize::Tiny => 43_500_000,
        ModelSize::Base => 81_800_000,
        ModelSize::Small => 264_000_000,
        ModelSize::Medium => 823_000_000,
        ModelSize::Large => 574_000_000,
    }
}

/// Returns the path where a model should be stored.
pub fn model_path(size: ModelSize) -> Result<PathBuf> {
    Ok(models_dir()?.join(model_filename(size)))
}

/// Checks if a model exists locally.
pub fn model_exists(size: ModelSize) -> Result<bool> {
    let path = model_path(size)?;
    Ok(path.exists())
}

/// Downloads a model to the local models directory.
///
/// The `progress_callback` is called periodically with (bytes_downloaded, total_bytes).
pub async fn download_model<F>(size: ModelSize, progress_callback: F) -> Result<PathBuf>
where
    F: Fn(u64, u64) + Send + 'static,
{
    let path = model_path(size)?;

    // Create models directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create models directory: {:?}", parent))?;
    }

    let url = model_url(size);
    info!(model = %size, url = %url, "Downloading Whisper model");

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to start download from {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }

    let total_size = response.content_length().unwrap_or(model_size_bytes(size));

    // Download to a temporary file first, then rename
    let temp_path = path.with_extension("bin.tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| "Failed to read chunk during download")?;
        file.write_all(&chunk)
            .with_context(|| "Failed to write chunk to file")?;
        downloaded += chunk.len() as u64;
        progress_callback(downloaded, total_size);
    }

    file.flush().with_context(|| "Failed to flush file")?;
    drop(file);

    // Rename temp file to final path
    fs::rename(&temp_path, &path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    info!(path = ?path, "Model download complete");
    Ok(path)
}

/// Ensures a model is available locally, downloading it if necessary.
///
/// Returns the path to the model file.
pub async fn ensure_model<F>(size: ModelSize, progress_callback: F) -> Result<PathBuf>
where
    F: Fn(u64, u64) + Send + 'static,
{
    if model_exists(size)? {
        info!(model = %size, "Model already exists locally");
        return model_path(size);
    }

    warn!(
        model = %size,
        "Model not found locally, downloading..."
    );

    download_model(size, progress_callback).await
}
