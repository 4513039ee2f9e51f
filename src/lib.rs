// Re-export from sub-crates
pub use voxkey_audio::{
    AudioArtifact, CaptureConfig, CaptureEngine, CaptureError, CaptureHandle, DeviceSelector,
    LevelSink,
};
pub use voxkey_core::{
    Config, ConfigManager, ErrorInfo, ErrorKind, Language, ModelOptions, ModelSize, SessionId,
    SessionState, APP_NAME, APP_NAME_PRETTY, DEFAULT_LOG_LEVEL,
};
pub use voxkey_transcribe::{OpenAIClient, OpenAIConfig, TranscribeError, Transcriber};

// App-specific modules
pub mod dispatch;
pub mod event;
pub mod hotkey;
pub mod inject;
pub mod notify;
pub mod session;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
