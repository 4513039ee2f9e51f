//! The session orchestrator: the single serialization point that turns
//! hotkey, capture, transcription, and injection events into one
//! race-free record → transcribe → inject lifecycle.
//!
//! All four sources of asynchrony (hotkey edges, the audio callback, the
//! transcription worker, the injection worker) post typed messages onto
//! one unbounded channel; the orchestrator consumes it serially, so no
//! locking is needed around state transitions. Subscribers follow along
//! through an ordered broadcast channel and never poll.
//!
//! At most one session is live at a time. Settlement events carry the
//! handle or session they belong to, and anything that arrives for a
//! session that has already been retired is dropped — once the Idle
//! transition for a session is observable, nothing more is emitted for it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use voxkey_audio::{
    AudioArtifact, CaptureConfig, CaptureEngine, CaptureError, CaptureHandle, DeviceSelector,
    LevelSink,
};
use voxkey_core::{
    BusyPressPolicy, Config, ErrorInfo, ErrorKind, ModelOptions, SessionId, SessionState,
};

use crate::dispatch::{DispatchError, TranscriptionHandle};
use crate::event::{
    EventReceiver, EventSender, SessionEvent, SessionNotification, StateDetail,
    TranscriptionOutcome,
};
use crate::inject::InjectError;

/// How long an unacknowledged error banner lingers before the machine
/// returns to idle on its own.
const ERROR_AUTO_DISMISS: Duration = Duration::from_secs(6);

/// Capacity of the notification channel. Level updates dominate; a slow
/// subscriber lags rather than stalling the orchestrator.
const NOTIFY_CAPACITY: usize = 256;

/// Most-recent level readings kept on the session for UI display.
const LEVEL_RING: usize = 32;

/// Capture seam consumed by the orchestrator.
pub trait CapturePort: Send {
    type Handle: CaptureControl + Send;

    fn start(
        &mut self,
        config: &CaptureConfig,
        level: LevelSink,
    ) -> Result<Self::Handle, CaptureError>;
}

/// Control over one active capture. The consuming receivers make the
/// exactly-one-owner rule for the buffered audio structural.
pub trait CaptureControl {
    fn stop(self) -> Result<AudioArtifact, CaptureError>;
    fn cancel(self);
}

/// Transcription seam.
pub trait DispatchPort: Send {
    fn submit(
        &mut self,
        artifact: AudioArtifact,
        options: ModelOptions,
    ) -> Result<TranscriptionHandle, DispatchError>;

    fn cancel(&mut self, handle: TranscriptionHandle);
}

/// Injection seam. Fire-and-forget; the result arrives as an event.
pub trait InjectionPort: Send {
    fn inject(&mut self, session: SessionId, text: String, delay: Duration);
}

impl CapturePort for CaptureEngine {
    type Handle = CaptureHandle;

    fn start(
        &mut self,
        config: &CaptureConfig,
        level: LevelSink,
    ) -> Result<Self::Handle, CaptureError> {
        CaptureEngine::start(self, config, level)
    }
}

impl CaptureControl for CaptureHandle {
    fn stop(self) -> Result<AudioArtifact, CaptureError> {
        CaptureHandle::stop(self)
    }

    fn cancel(self) {
        CaptureHandle::cancel(self)
    }
}

/// The live session record. Owned exclusively by the orchestrator;
/// dropping it releases whatever the session still holds.
struct Session<H> {
    id: SessionId,
    state: SessionState,
    started_at: Instant,
    capture: Option<H>,
    transcription: Option<TranscriptionHandle>,
    transcript: Option<String>,
    levels: VecDeque<f32>,
    error: Option<ErrorInfo>,
}

impl<H> Session<H> {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Recording,
            started_at: Instant::now(),
            capture: None,
            transcription: None,
            transcript: None,
            levels: VecDeque::with_capacity(LEVEL_RING),
            error: None,
        }
    }

    fn peak_level(&self) -> f32 {
        self.levels.iter().fold(0.0f32, |peak, &level| peak.max(level))
    }
}

/// Drives the session lifecycle. Generic over its three ports so tests
/// can run it against scripted collaborators.
pub struct SessionOrchestrator<C: CapturePort, D: DispatchPort, I: InjectionPort> {
    capture: C,
    dispatcher: D,
    injector: I,
    config: Arc<RwLock<Config>>,
    events: EventReceiver,
    sender: EventSender,
    notifications: broadcast::Sender<SessionNotification>,
    session: Option<Session<C::Handle>>,
    session_seq: u64,
}

impl<C: CapturePort, D: DispatchPort, I: InjectionPort> SessionOrchestrator<C, D, I> {
    pub fn new(
        capture: C,
        dispatcher: D,
        injector: I,
        config: Arc<RwLock<Config>>,
        sender: EventSender,
        events: EventReceiver,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            capture,
            dispatcher,
            injector,
            config,
            events,
            sender,
            notifications,
            session: None,
            session_seq: 0,
        }
    }

    /// Subscribe to state-change and level notifications. This is the
    /// sole channel through which the presentation layer learns about
    /// orchestrator progress.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifications.subscribe()
    }

    /// Consume events until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self) {
        self.publish_state();
        while let Some(event) = self.events.recv().await {
            match event {
                SessionEvent::HotkeyPressed => self.on_press(),
                SessionEvent::HotkeyReleased => self.on_release(),
                SessionEvent::Level(value) => self.on_level(value),
                SessionEvent::TranscriptionSettled { handle, outcome } => {
                    self.on_transcription_settled(handle, outcome)
                }
                SessionEvent::InjectionSettled { session, result } => {
                    self.on_injection_settled(session, result)
                }
                SessionEvent::CancelRequested => self.cancel_active("cancel requested"),
                SessionEvent::ErrorAcknowledged => self.on_error_acknowledged(),
                SessionEvent::ErrorExpired(session) => self.on_error_expired(session),
                SessionEvent::Shutdown => {
                    self.cancel_active("shutting down");
                    break;
                }
            }
        }
        debug!("orchestrator loop ended");
    }

    fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle)
    }

    fn on_press(&mut self) {
        match self.state() {
            SessionState::Idle => self.begin_recording(),
            SessionState::Recording => {
                debug!("hotkey press repeated while recording, ignoring");
            }
            SessionState::Transcribing | SessionState::Sending => {
                let press_while_busy = self.config.read().session.press_while_busy;
                match press_while_busy {
                    BusyPressPolicy::Cancel => self.cancel_active("hotkey pressed while busy"),
                    BusyPressPolicy::Ignore => {
                        debug!("hotkey press while busy ignored by policy");
                    }
                }
            }
            SessionState::Error => {
                // A press on the error banner acknowledges it and starts over.
                self.drop_session();
                self.begin_recording();
            }
        }
    }

    fn begin_recording(&mut self) {
        self.session_seq += 1;
        let id = SessionId::new(self.session_seq);
        let mut session = Session::new(id);

        let capture_config = self.capture_config();
        let sender = self.sender.clone();
        let level: LevelSink = Box::new(move |value| {
            sender.send(SessionEvent::Level(value)).ok();
        });

        match self.capture.start(&capture_config, level) {
            Ok(handle) => {
                session.capture = Some(handle);
                info!(session = %id, "recording started");
                self.session = Some(session);
                self.publish_state();
            }
            Err(e) => {
                warn!(session = %id, error = %e, "failed to start capture");
                session.state = SessionState::Error;
                session.error = Some(capture_error_info(&e));
                self.session = Some(session);
                self.publish_state();
                self.schedule_error_expiry(id);
            }
        }
    }

    fn capture_config(&self) -> CaptureConfig {
        let config = self.config.read();
        CaptureConfig {
            device: match config.audio.device_index {
                Some(index) => DeviceSelector::Index(index),
                None => DeviceSelector::Default,
            },
            target_rate: config.audio.sample_rate,
            min_duration: config.min_capture(),
        }
    }

    fn on_release(&mut self) {
        let handle = match self.session.as_mut() {
            Some(session) if session.state == SessionState::Recording => session.capture.take(),
            _ => {
                debug!("hotkey release out of turn, ignoring");
                return;
            }
        };
        let Some(handle) = handle else {
            self.fail_session(ErrorInfo::new(
                ErrorKind::DeviceUnavailable,
                "capture stream was lost",
            ));
            return;
        };

        match handle.stop() {
            Ok(artifact) => self.submit_artifact(artifact),
            Err(CaptureError::EmptyCapture { got, minimum }) => {
                // Too short to mean anything; not worth an error banner.
                info!(got = ?got, minimum = ?minimum, "capture below minimum duration");
                self.drop_session();
            }
            Err(e) => self.fail_session(capture_error_info(&e)),
        }
    }

    fn submit_artifact(&mut self, artifact: AudioArtifact) {
        if let Some(session) = self.session.as_ref() {
            debug!(
                session = %session.id,
                peak_level = session.peak_level(),
                duration_secs = artifact.duration().as_secs_f64(),
                "submitting artifact"
            );
        }

        let options: ModelOptions = self.config.read().model_options();
        match self.dispatcher.submit(artifact, options) {
            Ok(handle) => {
                if let Some(session) = self.session.as_mut() {
                    session.transcription = Some(handle);
                    session.state = SessionState::Transcribing;
                }
                self.publish_state();
            }
            Err(DispatchError::Busy) => {
                error!("dispatcher busy despite the single-flight invariant");
                self.fail_session(ErrorInfo::new(
                    ErrorKind::Busy,
                    "internal consistency fault: dispatcher busy",
                ));
            }
        }
    }

    fn on_level(&mut self, value: f32) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state != SessionState::Recording {
            // Reading from a capture that has already been stopped.
            return;
        }
        if session.levels.len() == LEVEL_RING {
            session.levels.pop_front();
        }
        session.levels.push_back(value);
        let note = SessionNotification::Level {
            session: session.id,
            value,
        };
        self.notifications.send(note).ok();
    }

    fn on_transcription_settled(
        &mut self,
        handle: TranscriptionHandle,
        outcome: TranscriptionOutcome,
    ) {
        let current = self.session.as_ref().is_some_and(|session| {
            session.state == SessionState::Transcribing && session.transcription == Some(handle)
        });
        if !current {
            debug!("stale transcription settlement, discarding");
            return;
        }

        match outcome {
            TranscriptionOutcome::Completed(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    info!("empty transcription, nothing to send");
                    self.drop_session();
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.transcript = Some(text.clone());
                session.state = SessionState::Sending;
                let id = session.id;
                self.publish_state();
                let delay = self.config.read().inject_delay();
                self.injector.inject(id, text, delay);
            }
            TranscriptionOutcome::Failed(info) => self.fail_session(info),
            TranscriptionOutcome::Cancelled => {
                debug!("transcription reported cancelled");
                self.drop_session();
            }
        }
    }

    fn on_injection_settled(&mut self, session_id: SessionId, result: Result<(), InjectError>) {
        let current = self.session.as_ref().is_some_and(|session| {
            session.id == session_id && session.state == SessionState::Sending
        });
        if !current {
            debug!("stale injection settlement, discarding");
            return;
        }

        match result {
            Ok(()) => {
                info!(session = %session_id, "transcript delivered");
                self.drop_session();
            }
            Err(e) => self.fail_session(inject_error_info(&e)),
        }
    }

    /// Abort the active session, cancel whatever it still owns, and
    /// return to idle. No-op when already idle.
    fn cancel_active(&mut self, reason: &str) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!(session = %session.id, state = %session.state, reason, "cancelling session");
        if let Some(handle) = session.capture.take() {
            handle.cancel();
        }
        if let Some(handle) = session.transcription.take() {
            self.dispatcher.cancel(handle);
        }
        // A pending injection settles on its own; the result is dropped
        // as stale because the session is gone.
        self.publish_state();
    }

    /// Park the session in the error state, releasing whatever it holds.
    fn fail_session(&mut self, info: ErrorInfo) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        warn!(session = %session.id, error = %info, "session failed");
        if let Some(handle) = session.capture.take() {
            handle.cancel();
        }
        session.transcription = None;
        session.state = SessionState::Error;
        session.error = Some(info);
        let id = session.id;
        self.publish_state();
        self.schedule_error_expiry(id);
    }

    fn on_error_acknowledged(&mut self) {
        if self.state() == SessionState::Error {
            info!("error acknowledged");
            self.drop_session();
        }
    }

    fn on_error_expired(&mut self, session_id: SessionId) {
        let expired = self.session.as_ref().is_some_and(|session| {
            session.id == session_id && session.state == SessionState::Error
        });
        if expired {
            debug!(session = %session_id, "error banner expired");
            self.drop_session();
        }
    }

    /// Arrange for the error banner of `session_id` to dismiss itself.
    /// The expiry is keyed to the session, so a banner raised later is
    /// never cleared by an earlier timer.
    fn schedule_error_expiry(&self, session_id: SessionId) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ERROR_AUTO_DISMISS).await;
            sender.send(SessionEvent::ErrorExpired(session_id)).ok();
        });
    }

    /// Retire the session and go back to idle. Dropping the record
    /// releases its capture handle and buffered audio synchronously.
    fn drop_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(
                session = %session.id,
                lifetime = ?session.started_at.elapsed(),
                "session retired"
            );
        }
        self.publish_state();
    }

    /// Emit a state-change notification for the machine's current state.
    fn publish_state(&self) {
        let note = match &self.session {
            None => SessionNotification::State {
                state: SessionState::Idle,
                session: None,
                detail: None,
            },
            Some(session) => {
                let detail = match session.state {
                    SessionState::Sending => {
                        session.transcript.clone().map(StateDetail::Transcript)
                    }
                    SessionState::Error => session.error.clone().map(StateDetail::Error),
                    _ => None,
                };
                SessionNotification::State {
                    state: session.state,
                    session: Some(session.id),
                    detail,
                }
            }
        };
        if let SessionNotification::State { state, .. } = &note {
            info!(state = %state, "state changed");
        }
        self.notifications.send(note).ok();
    }
}

fn capture_error_info(e: &CaptureError) -> ErrorInfo {
    let kind = match e {
        CaptureError::EmptyCapture { .. } => ErrorKind::EmptyCapture,
        CaptureError::DeviceUnavailable(_)
        | CaptureError::SampleFormatNotSupported(_)
        | CaptureError::BuildStream(_)
        | CaptureError::Anyhow(_) => ErrorKind::DeviceUnavailable,
    };
    ErrorInfo::new(kind, e.to_string())
}

fn inject_error_info(e: &InjectError) -> ErrorInfo {
    let kind = match e {
        InjectError::Unavailable(_) => ErrorKind::InjectionUnavailable,
        InjectError::Denied(_) => ErrorKind::InjectionDenied,
    };
    ErrorInfo::new(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::event;

    fn artifact() -> AudioArtifact {
        AudioArtifact::new(vec![0; 1600], 16_000)
    }

    type StopOutcome = Result<AudioArtifact, CaptureError>;

    struct MockCapture {
        starts: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
        stop_outcomes: Arc<Mutex<VecDeque<StopOutcome>>>,
        fail_start: bool,
    }

    struct MockHandle {
        cancels: Arc<AtomicUsize>,
        stop_outcomes: Arc<Mutex<VecDeque<StopOutcome>>>,
    }

    impl CapturePort for MockCapture {
        type Handle = MockHandle;

        fn start(
            &mut self,
            _config: &CaptureConfig,
            _level: LevelSink,
        ) -> Result<Self::Handle, CaptureError> {
            if self.fail_start {
                return Err(CaptureError::DeviceUnavailable("no microphone".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(MockHandle {
                cancels: self.cancels.clone(),
                stop_outcomes: self.stop_outcomes.clone(),
            })
        }
    }

    impl CaptureControl for MockHandle {
        fn stop(self) -> Result<AudioArtifact, CaptureError> {
            self.stop_outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(artifact()))
        }

        fn cancel(self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockDispatch {
        submissions: Arc<Mutex<Vec<TranscriptionHandle>>>,
        cancelled: Arc<Mutex<Vec<TranscriptionHandle>>>,
        busy: bool,
        next_id: u64,
    }

    impl DispatchPort for MockDispatch {
        fn submit(
            &mut self,
            _artifact: AudioArtifact,
            _options: ModelOptions,
        ) -> Result<TranscriptionHandle, DispatchError> {
            if self.busy {
                return Err(DispatchError::Busy);
            }
            self.next_id += 1;
            let handle = TranscriptionHandle::new(self.next_id);
            self.submissions.lock().push(handle);
            Ok(handle)
        }

        fn cancel(&mut self, handle: TranscriptionHandle) {
            self.cancelled.lock().push(handle);
        }
    }

    struct MockInject {
        injected: Arc<Mutex<Vec<(SessionId, String, Duration)>>>,
        /// Result sent back on the event channel; `None` leaves the
        /// session hanging in `Sending` so the test can settle it.
        auto_result: Option<Result<(), InjectError>>,
        events: EventSender,
    }

    impl InjectionPort for MockInject {
        fn inject(&mut self, session: SessionId, text: String, delay: Duration) {
            self.injected.lock().push((session, text, delay));
            if let Some(result) = self.auto_result.clone() {
                self.events
                    .send(SessionEvent::InjectionSettled { session, result })
                    .ok();
            }
        }
    }

    struct Harness {
        tx: EventSender,
        notifications: broadcast::Receiver<SessionNotification>,
        starts: Arc<AtomicUsize>,
        capture_cancels: Arc<AtomicUsize>,
        submissions: Arc<Mutex<Vec<TranscriptionHandle>>>,
        dispatch_cancelled: Arc<Mutex<Vec<TranscriptionHandle>>>,
        injected: Arc<Mutex<Vec<(SessionId, String, Duration)>>>,
    }

    struct HarnessOptions {
        stop_outcomes: VecDeque<StopOutcome>,
        inject_result: Option<Result<(), InjectError>>,
        fail_start: bool,
        dispatch_busy: bool,
        config: Config,
    }

    impl Default for HarnessOptions {
        fn default() -> Self {
            Self {
                stop_outcomes: VecDeque::new(),
                inject_result: Some(Ok(())),
                fail_start: false,
                dispatch_busy: false,
                config: Config::default(),
            }
        }
    }

    fn spawn_orchestrator(options: HarnessOptions) -> Harness {
        let (tx, rx) = event::channel();

        let starts = Arc::new(AtomicUsize::new(0));
        let capture_cancels = Arc::new(AtomicUsize::new(0));
        let stop_outcomes = Arc::new(Mutex::new(options.stop_outcomes));
        let capture = MockCapture {
            starts: starts.clone(),
            cancels: capture_cancels.clone(),
            stop_outcomes,
            fail_start: options.fail_start,
        };

        let dispatcher = MockDispatch {
            busy: options.dispatch_busy,
            ..Default::default()
        };
        let submissions = dispatcher.submissions.clone();
        let dispatch_cancelled = dispatcher.cancelled.clone();

        let injected = Arc::new(Mutex::new(Vec::new()));
        let injector = MockInject {
            injected: injected.clone(),
            auto_result: options.inject_result,
            events: tx.clone(),
        };

        let orchestrator = SessionOrchestrator::new(
            capture,
            dispatcher,
            injector,
            Arc::new(RwLock::new(options.config)),
            tx.clone(),
            rx,
        );
        let notifications = orchestrator.subscribe();
        tokio::spawn(orchestrator.run());

        Harness {
            tx,
            notifications,
            starts,
            capture_cancels,
            submissions,
            dispatch_cancelled,
            injected,
        }
    }

    impl Harness {
        /// Next state-change notification, skipping level updates.
        async fn next_state(&mut self) -> (SessionState, Option<StateDetail>) {
            loop {
                let note = tokio::time::timeout(Duration::from_secs(20), self.notifications.recv())
                    .await
                    .expect("timed out waiting for a notification")
                    .expect("notification channel closed");
                match note {
                    SessionNotification::State { state, detail, .. } => return (state, detail),
                    SessionNotification::Level { .. } => continue,
                }
            }
        }

        /// Assert that nothing further is observable after the event
        /// queue has drained.
        async fn assert_quiescent(&mut self) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            match self.notifications.try_recv() {
                Err(TryRecvError::Empty) => {}
                other => panic!("expected no further notifications, got {:?}", other),
            }
        }

        fn latest_submission(&self) -> TranscriptionHandle {
            *self.submissions.lock().last().expect("nothing submitted")
        }
    }

    async fn drive_to_transcribing(harness: &mut Harness) -> TranscriptionHandle {
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Recording);
        harness.tx.send(SessionEvent::HotkeyReleased).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Transcribing);
        harness.latest_submission()
    }

    #[tokio::test]
    async fn full_cycle_emits_five_notifications_in_order() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        let handle = drive_to_transcribing(&mut harness).await;
        harness
            .tx
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Completed("hello world".into()),
            })
            .unwrap();

        let (state, detail) = harness.next_state().await;
        assert_eq!(state, SessionState::Sending);
        assert!(matches!(detail, Some(StateDetail::Transcript(text)) if text == "hello world"));

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.assert_quiescent().await;

        // Idle, Recording, Transcribing, Sending, Idle — and the
        // transcript reached the injector exactly once.
        let injected = harness.injected.lock();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].1, "hello world");
        assert_eq!(injected[0].2, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn short_capture_goes_straight_back_to_idle() {
        let mut options = HarnessOptions::default();
        options.stop_outcomes.push_back(Err(CaptureError::EmptyCapture {
            got: Duration::from_millis(50),
            minimum: Duration::from_millis(100),
        }));
        let mut harness = spawn_orchestrator(options);

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Recording);
        harness.tx.send(SessionEvent::HotkeyReleased).unwrap();

        // No Transcribing, no Error: straight back to idle, silently.
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.assert_quiescent().await;
        assert!(harness.submissions.lock().is_empty());
    }

    #[tokio::test]
    async fn repeated_press_while_recording_is_idempotent() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();

        assert_eq!(harness.next_state().await.0, SessionState::Recording);
        harness.assert_quiescent().await;
        assert_eq!(harness.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_during_transcribing_discards_stale_result() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        let handle = drive_to_transcribing(&mut harness).await;

        // Press again: default policy cancels the busy session.
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        assert_eq!(harness.dispatch_cancelled.lock().as_slice(), &[handle]);

        // The stale settlement must not resurrect the session.
        harness
            .tx
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Completed("too late".into()),
            })
            .unwrap();
        harness.assert_quiescent().await;
        assert!(harness.injected.lock().is_empty());
    }

    #[tokio::test]
    async fn engine_error_surfaces_then_acknowledge_clears_it() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        let handle = drive_to_transcribing(&mut harness).await;
        harness
            .tx
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Failed(ErrorInfo::new(
                    ErrorKind::Engine,
                    "backend exploded",
                )),
            })
            .unwrap();

        let (state, detail) = harness.next_state().await;
        assert_eq!(state, SessionState::Error);
        match detail {
            Some(StateDetail::Error(info)) => {
                assert_eq!(info.kind, ErrorKind::Engine);
                assert!(info.message.contains("backend exploded"));
            }
            other => panic!("expected error detail, got {:?}", other),
        }

        harness.tx.send(SessionEvent::ErrorAcknowledged).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.assert_quiescent().await;
    }

    #[tokio::test]
    async fn injection_failure_surfaces_as_error() {
        let mut options = HarnessOptions::default();
        options.inject_result = Some(Err(InjectError::Denied("not permitted".into())));
        let mut harness = spawn_orchestrator(options);

        let handle = drive_to_transcribing(&mut harness).await;
        harness
            .tx
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Completed("hello".into()),
            })
            .unwrap();

        assert_eq!(harness.next_state().await.0, SessionState::Sending);
        let (state, detail) = harness.next_state().await;
        assert_eq!(state, SessionState::Error);
        assert!(matches!(
            detail,
            Some(StateDetail::Error(info)) if info.kind == ErrorKind::InjectionDenied
        ));
    }

    #[tokio::test]
    async fn failed_capture_start_surfaces_device_error() {
        let mut options = HarnessOptions::default();
        options.fail_start = true;
        let mut harness = spawn_orchestrator(options);

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();

        let (state, detail) = harness.next_state().await;
        assert_eq!(state, SessionState::Error);
        assert!(matches!(
            detail,
            Some(StateDetail::Error(info)) if info.kind == ErrorKind::DeviceUnavailable
        ));

        harness.tx.send(SessionEvent::ErrorAcknowledged).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
    }

    #[tokio::test]
    async fn press_while_busy_can_be_ignored_by_policy() {
        let mut options = HarnessOptions::default();
        options.config.session.press_while_busy = BusyPressPolicy::Ignore;
        let mut harness = spawn_orchestrator(options);

        let handle = drive_to_transcribing(&mut harness).await;
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        harness.assert_quiescent().await;
        assert!(harness.dispatch_cancelled.lock().is_empty());

        // The in-flight session still completes normally.
        harness
            .tx
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Completed("still here".into()),
            })
            .unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Sending);
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
    }

    #[tokio::test]
    async fn empty_transcript_is_recovered_silently() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        let handle = drive_to_transcribing(&mut harness).await;
        harness
            .tx
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Completed("   ".into()),
            })
            .unwrap();

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.assert_quiescent().await;
        assert!(harness.injected.lock().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_recording_releases_the_capture() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Recording);

        harness.tx.send(SessionEvent::CancelRequested).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        assert_eq!(harness.capture_cancels.load(Ordering::SeqCst), 1);
        assert!(harness.submissions.lock().is_empty());
    }

    #[tokio::test]
    async fn level_updates_flow_only_while_recording() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Recording);

        harness.tx.send(SessionEvent::Level(42.0)).unwrap();
        let note = tokio::time::timeout(Duration::from_secs(20), harness.notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(note, SessionNotification::Level { value, .. } if value == 42.0));

        // After release, a late reading from the stopped stream is dropped.
        harness.tx.send(SessionEvent::HotkeyReleased).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Transcribing);
        harness.tx.send(SessionEvent::Level(17.0)).unwrap();
        harness.assert_quiescent().await;
    }

    #[tokio::test]
    async fn press_on_error_banner_starts_a_fresh_session() {
        let mut options = HarnessOptions::default();
        options.fail_start = true;
        let mut harness = spawn_orchestrator(options);

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Error);

        // The press acknowledges the banner and immediately records again
        // (which fails again here, but through a fresh session).
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        assert_eq!(harness.next_state().await.0, SessionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn error_banner_expires_on_its_own() {
        let mut options = HarnessOptions::default();
        options.fail_start = true;
        let mut harness = spawn_orchestrator(options);

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Error);

        // No acknowledgment: the banner dismisses itself.
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
    }

    #[tokio::test]
    async fn at_most_one_session_across_a_press_storm() {
        let mut harness = spawn_orchestrator(HarnessOptions::default());
        assert_eq!(harness.next_state().await.0, SessionState::Idle);

        // press, press (ignored), release, stale release, press
        // (cancels the transcribing session), press (new recording).
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        harness.tx.send(SessionEvent::HotkeyReleased).unwrap();
        harness.tx.send(SessionEvent::HotkeyReleased).unwrap();
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();

        assert_eq!(harness.next_state().await.0, SessionState::Recording);
        assert_eq!(harness.next_state().await.0, SessionState::Transcribing);
        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        assert_eq!(harness.next_state().await.0, SessionState::Recording);
        harness.assert_quiescent().await;

        // Two sessions were started in total, never two at once.
        assert_eq!(harness.starts.load(Ordering::SeqCst), 2);
        assert_eq!(harness.submissions.lock().len(), 1);
    }

    #[tokio::test]
    async fn busy_dispatcher_is_surfaced_as_internal_fault() {
        let mut options = HarnessOptions::default();
        options.dispatch_busy = true;
        let mut harness = spawn_orchestrator(options);

        assert_eq!(harness.next_state().await.0, SessionState::Idle);
        harness.tx.send(SessionEvent::HotkeyPressed).unwrap();
        assert_eq!(harness.next_state().await.0, SessionState::Recording);
        harness.tx.send(SessionEvent::HotkeyReleased).unwrap();

        let (state, detail) = harness.next_state().await;
        assert_eq!(state, SessionState::Error);
        assert!(matches!(
            detail,
            Some(StateDetail::Error(info)) if info.kind == ErrorKind::Busy
        ));
    }
}
