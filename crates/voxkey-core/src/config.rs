//! Configuration management for voxkey.
//!
//! This module provides core configuration that doesn't depend on
//! platform-specific UI libraries.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Language, ModelOptions, ModelSize};
use crate::APP_NAME;

/// Core configuration structure for the application.
///
/// The hotkey is stored as a string ("modifier+modifier+key", e.g.
/// "ctrl+shift+space") and parsed by the main application.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Audio capture settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Input device index; `None` selects the system default device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<usize>,

    /// Sample rate of the finished artifact (captures are resampled).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Captures shorter than this are discarded as accidental taps.
    #[serde(default = "default_min_capture_ms")]
    pub min_capture_ms: u64,
}

/// Transcription settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub model_size: ModelSize,

    #[serde(default)]
    pub language: Language,

    /// Recognition requests that take longer than this are failed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// API key for the remote backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Remote model-name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Which recognition engine to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Remote when an API key is configured, local otherwise.
    #[default]
    Auto,
    OpenAI,
    Local,
}

/// Text injection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Pause before typing, to let the target window regain focus.
    /// Clamped to 0..=1000 ms.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

/// Session policy settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionConfig {
    /// What a hotkey press does while a session is transcribing or
    /// sending.
    #[serde(default)]
    pub press_while_busy: BusyPressPolicy,
}

/// Policy for a hotkey press while a session is already past recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPressPolicy {
    /// Abort the in-flight session and return to idle.
    #[default]
    Cancel,
    /// Ignore the press entirely.
    Ignore,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_min_capture_ms() -> u64 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_delay_ms() -> u64 {
    50
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: default_sample_rate(),
            min_capture_ms: default_min_capture_ms(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            model_size: ModelSize::default(),
            language: Language::default(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
            model: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
        }
    }
}

impl Config {
    /// Get the API key for the remote backend
    pub fn api_key(&self) -> Option<&str> {
        self.transcription.api_key.as_deref()
    }

    /// Model options for one transcription submission.
    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            model_size: self.transcription.model_size,
            language: self.transcription.language.clone(),
        }
    }

    /// Get the minimum capture duration as a Duration
    pub fn min_capture(&self) -> Duration {
        Duration::from_millis(self.audio.min_capture_ms)
    }

    /// Get the recognition timeout as a Duration
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription.timeout_secs)
    }

    /// Get the pre-injection delay as a Duration
    pub fn inject_delay(&self) -> Duration {
        Duration::from_millis(self.input.delay_ms)
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    #[cfg(test)]
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        if config.transcription.backend != Backend::Local && config.api_key().is_none() {
            warn!(
                "No API key is set. Remote transcription will not work without one; \
                 set transcription.api_key in the config file."
            );
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}
