//! Typed messages in and out of the session orchestrator.
//!
//! Every external happening — hotkey edges, level readings, settlement of
//! transcription or injection work — becomes a [`SessionEvent`] on one
//! unbounded channel that the orchestrator consumes serially. Subscribers
//! observe progress through [`SessionNotification`]s, delivered in
//! transition order.

use tokio::sync::mpsc;
use voxkey_core::{ErrorInfo, SessionId, SessionState};

use crate::dispatch::TranscriptionHandle;
use crate::inject::InjectError;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the orchestrator's inbound event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Everything the orchestrator reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    /// The push-to-talk hotkey went down.
    HotkeyPressed,
    /// The push-to-talk hotkey came back up.
    HotkeyReleased,
    /// Loudness reading from the active capture, in `[0, 100]`.
    Level(f32),
    /// The dispatcher settled a submission.
    TranscriptionSettled {
        handle: TranscriptionHandle,
        outcome: TranscriptionOutcome,
    },
    /// The injection gateway finished typing, or failed to.
    InjectionSettled {
        session: SessionId,
        result: Result<(), InjectError>,
    },
    /// Abort whatever session is active and return to idle.
    CancelRequested,
    /// The user dismissed the error banner.
    ErrorAcknowledged,
    /// The error banner for a session reached its display timeout.
    ErrorExpired(SessionId),
    /// Stop the orchestrator loop.
    Shutdown,
}

/// Final outcome of one transcription submission. Exactly one of these is
/// delivered per handle; after it, the handle is settled.
#[derive(Debug, Clone)]
pub enum TranscriptionOutcome {
    Completed(String),
    Failed(ErrorInfo),
    Cancelled,
}

/// Notification emitted to subscribers.
#[derive(Debug, Clone)]
pub enum SessionNotification {
    /// The machine changed state. `session` is the active session, absent
    /// for `Idle`.
    State {
        state: SessionState,
        session: Option<SessionId>,
        detail: Option<StateDetail>,
    },
    /// Live loudness while recording.
    Level { session: SessionId, value: f32 },
}

/// Optional payload attached to a state change.
#[derive(Debug, Clone)]
pub enum StateDetail {
    /// The transcript being sent, attached to `Sending`.
    Transcript(String),
    /// What went wrong, attached to `Error`.
    Error(ErrorInfo),
}
