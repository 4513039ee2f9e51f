//! Session lifecycle types.
//!
//! A session is one complete record → transcribe → inject cycle. The
//! orchestrator in the application crate owns the live session record;
//! these are the shared vocabulary types the UI layer also sees.

use std::fmt;

use thiserror::Error;

/// Opaque identifier for one recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle states of the session machine.
///
/// `Idle` is the no-active-session sentinel; a live session only ever
/// carries one of the other four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Transcribing,
    Sending,
    Error,
}

impl SessionState {
    /// Get the string representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::Sending => "sending",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of failure kinds a session can surface.
///
/// Every fault from the capture, transcription, or injection layer is
/// mapped to exactly one of these before it reaches a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable input device, or the stream could not be opened.
    DeviceUnavailable,
    /// Capture shorter than the minimum duration; recovered silently.
    EmptyCapture,
    /// The recognition model could not be loaded.
    ModelLoad,
    /// The recognition engine failed while processing.
    Engine,
    /// The recognition engine did not settle in time.
    Timeout,
    /// The keystroke-injection backend is missing or unreachable.
    InjectionUnavailable,
    /// The keystroke-injection backend refused to type.
    InjectionDenied,
    /// The dispatcher was invoked while already occupied. Indicates a
    /// broken single-flight invariant, not a user-recoverable fault.
    Busy,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable => "audio device unavailable",
            Self::EmptyCapture => "empty capture",
            Self::ModelLoad => "model load failed",
            Self::Engine => "recognition failed",
            Self::Timeout => "recognition timed out",
            Self::InjectionUnavailable => "text injection unavailable",
            Self::InjectionDenied => "text injection denied",
            Self::Busy => "transcription already in flight",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error kind plus the human-readable message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
