//! Text injection into the focused window.
//!
//! Enigo is not Send, so we keep it parked in a worker thread and talk to
//! it via a channel. The orchestrator fires a request and forgets it; the
//! worker settles each request with a [`SessionEvent::InjectionSettled`]
//! on the event channel after the configured focus-latency pause.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};
use voxkey_core::SessionId;

use crate::event::{EventSender, SessionEvent};
use crate::session::InjectionPort;

/// Longest allowed pre-injection pause.
pub const MAX_INJECT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    /// The backend could not be reached at all.
    #[error("injection backend unavailable: {0}")]
    Unavailable(String),
    /// The backend refused to type.
    #[error("injection denied: {0}")]
    Denied(String),
}

/// Backend that actually produces keystrokes.
pub trait TextInjector {
    fn inject(&mut self, text: &str) -> Result<(), InjectError>;
}

/// Production backend typing through enigo.
pub struct EnigoInjector {
    enigo: enigo::Enigo,
}

impl EnigoInjector {
    pub fn new() -> Result<Self, InjectError> {
        let enigo = enigo::Enigo::new(&enigo::Settings::default())
            .map_err(|e| InjectError::Unavailable(e.to_string()))?;
        Ok(Self { enigo })
    }
}

impl TextInjector for EnigoInjector {
    fn inject(&mut self, text: &str) -> Result<(), InjectError> {
        use enigo::Keyboard;
        self.enigo
            .text(text)
            .map_err(|e| InjectError::Denied(e.to_string()))
    }
}

struct InjectRequest {
    session: SessionId,
    text: String,
    delay: Duration,
}

/// Fire-and-forget gateway to the injection worker thread.
pub struct InjectionGateway {
    requests: mpsc::Sender<InjectRequest>,
    events: EventSender,
}

impl InjectionGateway {
    /// Spawn the worker thread. The backend is constructed inside the
    /// thread because it may not be Send; if construction fails, every
    /// request settles with `Unavailable` instead of panicking.
    pub fn spawn<I, F>(make: F, events: EventSender) -> anyhow::Result<Self>
    where
        I: TextInjector,
        F: FnOnce() -> Result<I, InjectError> + Send + 'static,
    {
        let (requests, receiver) = mpsc::channel::<InjectRequest>();
        let worker_events = events.clone();
        thread::Builder::new()
            .name("voxkey-inject".into())
            .spawn(move || worker(make, receiver, worker_events))?;
        Ok(Self { requests, events })
    }

    /// Queue one injection. The result comes back on the event channel.
    pub fn inject(&self, session: SessionId, text: String, delay: Duration) {
        let request = InjectRequest {
            session,
            text,
            delay: clamp_delay(delay),
        };
        if self.requests.send(request).is_err() {
            error!("injection worker is gone");
            self.events
                .send(SessionEvent::InjectionSettled {
                    session,
                    result: Err(InjectError::Unavailable("injection worker is gone".into())),
                })
                .ok();
        }
    }
}

impl InjectionPort for InjectionGateway {
    fn inject(&mut self, session: SessionId, text: String, delay: Duration) {
        InjectionGateway::inject(self, session, text, delay)
    }
}

fn clamp_delay(delay: Duration) -> Duration {
    delay.min(MAX_INJECT_DELAY)
}

fn worker<I, F>(make: F, requests: mpsc::Receiver<InjectRequest>, events: EventSender)
where
    I: TextInjector,
    F: FnOnce() -> Result<I, InjectError>,
{
    let mut backend = make();
    if let Err(e) = &backend {
        error!(error = %e, "failed to construct injection backend");
    }

    while let Ok(request) = requests.recv() {
        // Give the target window a moment to regain focus.
        thread::sleep(request.delay);

        let result = match backend.as_mut() {
            Ok(backend) => {
                debug!(
                    session = %request.session,
                    chars = request.text.chars().count(),
                    "typing transcript"
                );
                // A panicking backend must settle the request, not kill
                // the worker with the session stuck in Sending.
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    backend.inject(&request.text)
                }))
                .unwrap_or_else(|_| Err(InjectError::Denied("injection backend panicked".into())))
            }
            Err(e) => Err(e.clone()),
        };

        if let Err(e) = &result {
            warn!(session = %request.session, error = %e, "text injection failed");
        }
        events
            .send(SessionEvent::InjectionSettled {
                session: request.session,
                result,
            })
            .ok();
    }
}
