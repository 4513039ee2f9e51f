//! Core types and configuration for voxkey.
//!
//! This crate provides platform-agnostic types that can be used across
//! all voxkey sub-crates.

mod config;
mod model;
mod session;

use std::path::PathBuf;

use anyhow::Context;

pub use config::{
    AudioConfig, Backend, BusyPressPolicy, Config, ConfigManager, InputConfig, SessionConfig,
    TranscriptionConfig,
};
pub use model::{Language, ModelOptions, ModelSize};
pub use session::{ErrorInfo, ErrorKind, SessionId, SessionState};

/// Application name
pub const APP_NAME: &str = "voxkey";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Voxkey";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Directory where downloaded recognition models are stored.
pub fn models_dir() -> anyhow::Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Failed to retrieve data directory")?;
    Ok(data_dir.join(APP_NAME).join("models"))
}
