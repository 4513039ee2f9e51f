//! Recognition model options.
//!
//! `ModelOptions` is the per-session configuration handed to the
//! transcription layer: which model size to use and which language to
//! expect. The recognition engine itself decides what to do with them
//! (the remote backend only honors the language hint).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Recognition model size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the string representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Preferred transcription language: an ISO 639-1 code, or automatic
/// detection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    #[default]
    Auto,
    Tag(String),
}

impl Language {
    /// The language code to pass to a recognition engine, or `None` for
    /// auto-detection.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Tag(code) => Some(code),
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        let value = value.trim().to_lowercase();
        if value.is_empty() || value == "auto" {
            Self::Auto
        } else {
            Self::Tag(value)
        }
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        match value {
            Language::Auto => "auto".to_string(),
            Language::Tag(code) => code,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Tag(code) => write!(f, "{code}"),
        }
    }
}

/// Options for a single transcription submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOptions {
    pub model_size: ModelSize,
    pub language: Language,
}
