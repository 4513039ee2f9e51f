use std::sync::Arc;

use anyhow::{Context, Result};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use parking_lot::RwLock;
use tao::event::{Event, StartCause};
use tao::event_loop::{ControlFlow, EventLoop, EventLoopBuilder};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use voxkey::dispatch::TranscriptionDispatcher;
use voxkey::event::{self, SessionEvent, SessionNotification, StateDetail};
use voxkey::hotkey::ConfigExt;
use voxkey::inject::{EnigoInjector, InjectionGateway};
use voxkey::notify::NotificationLayer;
use voxkey::session::SessionOrchestrator;
use voxkey::{CaptureEngine, ConfigManager, Transcriber, DEFAULT_LOG_LEVEL};
use voxkey_core::{Backend, TranscriptionConfig};
use voxkey_transcribe::{OpenAIClient, OpenAIConfig};

fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VOXKEY_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .finish()
        .with(NotificationLayer::new())
        .init();

    // Load config
    let config_manager = ConfigManager::new()?;
    let config = Arc::new(RwLock::new(config_manager.load()?));
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config.read())?;

    // Set up hotkey
    let hotkey = config.read().hotkey();
    let hotkey_manager = GlobalHotKeyManager::new().context("Failed to create hotkey manager")?;
    hotkey_manager
        .register(hotkey)
        .context("Failed to register hotkey")?;

    // Runtime shared by the orchestrator and the transcription worker
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // Wire the orchestrator to its collaborators: everything talks back
    // through the single inbound event channel.
    let (events_tx, events_rx) = event::channel();
    let engine = build_engine(&runtime, &config.read().transcription)?;
    let dispatcher = TranscriptionDispatcher::new(
        engine,
        events_tx.clone(),
        config.read().transcription_timeout(),
        runtime.handle().clone(),
    );
    let injector = InjectionGateway::spawn(EnigoInjector::new, events_tx.clone())?;
    let orchestrator = SessionOrchestrator::new(
        CaptureEngine::new(),
        dispatcher,
        injector,
        config.clone(),
        events_tx.clone(),
        events_rx,
    );

    // The binary is the presentation layer: it follows orchestrator
    // progress through the subscription channel and logs it. Errors land
    // at warn level, which the notification layer turns into desktop
    // notifications.
    let mut notifications = orchestrator.subscribe();
    runtime.spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(SessionNotification::State {
                    state,
                    session,
                    detail,
                }) => match detail {
                    Some(StateDetail::Error(error)) => warn!(session = ?session, "{}", error),
                    Some(StateDetail::Transcript(text)) => {
                        info!(state = %state, chars = text.chars().count(), "transcript ready")
                    }
                    None => info!(state = %state, "session state"),
                },
                Ok(SessionNotification::Level { value, .. }) => {
                    debug!(level = value, "input level")
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification subscriber lagging")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    runtime.spawn(orchestrator.run());

    // Drive hotkey edges from the tao event loop into the orchestrator.
    let hotkey_channel = GlobalHotKeyEvent::receiver();
    let event_loop: EventLoop<()> = EventLoopBuilder::new().build();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;

        if let Event::NewEvents(StartCause::Init) = event {
            info!("Voxkey ready");
        }

        if let Event::LoopDestroyed = event {
            events_tx.send(SessionEvent::Shutdown).ok();
        }

        if let Ok(hotkey_event) = hotkey_channel.try_recv() {
            if hotkey_event.id() == hotkey.id() {
                let forwarded = match hotkey_event.state() {
                    HotKeyState::Pressed => SessionEvent::HotkeyPressed,
                    HotKeyState::Released => SessionEvent::HotkeyReleased,
                };
                events_tx.send(forwarded).ok();
            }
        }
    });
}

/// Pick the recognition engine for this run.
fn build_engine(
    runtime: &Runtime,
    transcription: &TranscriptionConfig,
) -> Result<Arc<dyn Transcriber>> {
    let wants_remote = match transcription.backend {
        Backend::OpenAI => true,
        Backend::Local => false,
        Backend::Auto => transcription.api_key.is_some(),
    };

    if wants_remote {
        let api_key = transcription
            .api_key
            .clone()
            .context("transcription.api_key must be set for the remote backend")?;
        let mut openai_config = OpenAIConfig::new(api_key);
        if let Some(model) = &transcription.model {
            openai_config = openai_config.with_model(model.clone());
        }
        info!(model = openai_config.model(), "using OpenAI transcription backend");
        return Ok(Arc::new(OpenAIClient::new(openai_config)));
    }

    build_local_engine(runtime, transcription)
}

#[cfg(feature = "local-whisper")]
fn build_local_engine(
    runtime: &Runtime,
    transcription: &TranscriptionConfig,
) -> Result<Arc<dyn Transcriber>> {
    use voxkey_transcribe::{ensure_model, LocalWhisperClient, LocalWhisperConfig};

    let size = transcription.model_size;
    runtime.block_on(ensure_model(size, |downloaded, total| {
        debug!(downloaded, total, "model download progress");
    }))?;
    info!(model = %size, "using local Whisper transcription backend");
    Ok(Arc::new(LocalWhisperClient::new(
        LocalWhisperConfig::default(),
    )))
}

#[cfg(not(feature = "local-whisper"))]
fn build_local_engine(
    _runtime: &Runtime,
    _transcription: &TranscriptionConfig,
) -> Result<Arc<dyn Transcriber>> {
    anyhow::bail!(
        "no transcription backend available: set transcription.api_key \
         or build with the local-whisper feature"
    )
}
