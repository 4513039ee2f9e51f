//! Transcription scheduling. The dispatcher hands recognition work to the
//! runtime and returns immediately; completion comes back asynchronously
//! as a [`SessionEvent::TranscriptionSettled`] on the orchestrator channel.
//!
//! At most one submission may be outstanding. Cancellation settles the
//! handle on the spot: whatever the engine eventually produces for a
//! cancelled submission is discarded, never delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use voxkey_audio::AudioArtifact;
use voxkey_core::{ErrorInfo, ErrorKind, ModelOptions};
use voxkey_transcribe::{TranscribeError, Transcriber};

use crate::event::{EventSender, SessionEvent, TranscriptionOutcome};
use crate::session::DispatchPort;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A submission is already outstanding. The orchestrator's
    /// single-flight invariant should make this unreachable.
    #[error("a transcription is already in flight")]
    Busy,
}

/// Identifies one submission; settlement events carry it back so stale
/// results can be told apart from live ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptionHandle {
    id: u64,
}

impl TranscriptionHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }
}

struct InFlight {
    id: u64,
    settled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Schedules recognition work; the audio-to-text algorithm itself lives
/// behind the [`Transcriber`] trait.
pub struct TranscriptionDispatcher {
    engine: Arc<dyn Transcriber>,
    events: EventSender,
    timeout: Duration,
    runtime: Handle,
    next_id: u64,
    in_flight: Option<InFlight>,
}

impl TranscriptionDispatcher {
    pub fn new(
        engine: Arc<dyn Transcriber>,
        events: EventSender,
        timeout: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            events,
            timeout,
            runtime,
            next_id: 0,
            in_flight: None,
        }
    }

    /// Submit an artifact for recognition. Non-blocking; the outcome
    /// arrives later on the event channel.
    pub fn submit(
        &mut self,
        artifact: AudioArtifact,
        options: ModelOptions,
    ) -> Result<TranscriptionHandle, DispatchError> {
        if let Some(in_flight) = &self.in_flight {
            if !in_flight.settled.load(Ordering::Acquire) {
                return Err(DispatchError::Busy);
            }
        }

        self.next_id += 1;
        let handle = TranscriptionHandle::new(self.next_id);

        info!(
            samples = artifact.samples().len(),
            length_seconds = artifact.duration().as_secs_f64(),
            engine = self.engine.name(),
            "audio submitted"
        );

        let settled = Arc::new(AtomicBool::new(false));
        let task = self.runtime.spawn(run_transcription(
            self.engine.clone(),
            artifact,
            options,
            self.timeout,
            settled.clone(),
            self.events.clone(),
            handle,
        ));

        self.in_flight = Some(InFlight {
            id: handle.id,
            settled,
            task,
        });
        Ok(handle)
    }

    /// Best-effort cancellation. The handle is settled as `Cancelled`
    /// immediately; if the engine cannot be interrupted its eventual
    /// result is dropped when it arrives.
    pub fn cancel(&mut self, handle: TranscriptionHandle) {
        let Some(in_flight) = &self.in_flight else {
            debug!("cancel with nothing in flight, ignoring");
            return;
        };
        if in_flight.id != handle.id {
            debug!("cancel for a settled submission, ignoring");
            return;
        }
        if in_flight.settled.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(id = handle.id, "cancelling transcription");
        in_flight.task.abort();
        self.events
            .send(SessionEvent::TranscriptionSettled {
                handle,
                outcome: TranscriptionOutcome::Cancelled,
            })
            .ok();
    }
}

impl DispatchPort for TranscriptionDispatcher {
    fn submit(
        &mut self,
        artifact: AudioArtifact,
        options: ModelOptions,
    ) -> Result<TranscriptionHandle, DispatchError> {
        TranscriptionDispatcher::submit(self, artifact, options)
    }

    fn cancel(&mut self, handle: TranscriptionHandle) {
        TranscriptionDispatcher::cancel(self, handle)
    }
}

/// Runs one submission to completion and settles it exactly once.
async fn run_transcription(
    engine: Arc<dyn Transcriber>,
    artifact: AudioArtifact,
    options: ModelOptions,
    timeout: Duration,
    settled: Arc<AtomicBool>,
    events: EventSender,
    handle: TranscriptionHandle,
) {
    let outcome = match artifact.to_wav_bytes() {
        Err(e) => TranscriptionOutcome::Failed(ErrorInfo::new(ErrorKind::Engine, e.to_string())),
        Ok(wav) => {
            let before = Instant::now();
            // The engine runs in its own task so that a panic inside an
            // external backend settles the submission instead of losing it.
            let work = tokio::spawn(async move { engine.transcribe(wav, &options).await });
            let abort = work.abort_handle();
            match tokio::time::timeout(timeout, work).await {
                Err(_) => {
                    abort.abort();
                    TranscriptionOutcome::Failed(ErrorInfo::new(
                        ErrorKind::Timeout,
                        format!("no result after {:.0?}", timeout),
                    ))
                }
                Ok(Err(join_error)) => TranscriptionOutcome::Failed(ErrorInfo::new(
                    ErrorKind::Engine,
                    format!("recognition worker died: {join_error}"),
                )),
                Ok(Ok(Err(e))) => TranscriptionOutcome::Failed(failure_info(&e)),
                Ok(Ok(Ok(text))) => {
                    info!(
                        duration = ?before.elapsed(),
                        chars = text.chars().count(),
                        "transcription completed"
                    );
                    TranscriptionOutcome::Completed(text)
                }
            }
        }
    };

    if settled.swap(true, Ordering::AcqRel) {
        debug!("discarding result for a cancelled submission");
        return;
    }
    events
        .send(SessionEvent::TranscriptionSettled { handle, outcome })
        .ok();
}

fn failure_info(e: &TranscribeError) -> ErrorInfo {
    let kind = match e {
        TranscribeError::ModelLoad(_) => ErrorKind::ModelLoad,
        TranscribeError::Engine(_)
        | TranscribeError::InvalidAudioFormat(_)
        | TranscribeError::Network(_) => ErrorKind::Engine,
    };
    ErrorInfo::new(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc::error::TryRecvError;

    use crate::event;

    struct FixedEngine {
        text: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Transcriber for FixedEngine {
        async fn transcribe(
            &self,
            _audio: Vec<u8>,
            _options: &ModelOptions,
        ) -> voxkey_transcribe::Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.text.to_string())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl Transcriber for FailingEngine {
        async fn transcribe(
            &self,
            _audio: Vec<u8>,
            _options: &ModelOptions,
        ) -> voxkey_transcribe::Result<String> {
            Err(TranscribeError::Engine("backend exploded".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn artifact() -> AudioArtifact {
        AudioArtifact::new(vec![0; 1600], 16_000)
    }

    fn dispatcher(engine: Arc<dyn Transcriber>, timeout: Duration) -> (TranscriptionDispatcher, event::EventReceiver) {
        let (tx, rx) = event::channel();
        let dispatcher = TranscriptionDispatcher::new(engine, tx, timeout, Handle::current());
        (dispatcher, rx)
    }

    async fn next_settle(rx: &mut event::EventReceiver) -> (TranscriptionHandle, TranscriptionOutcome) {
        loop {
            match tokio::time::timeout(Duration::from_secs(300), rx.recv())
                .await
                .expect("timed out waiting for settlement")
                .expect("event channel closed")
            {
                SessionEvent::TranscriptionSettled { handle, outcome } => return (handle, outcome),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn completed_result_is_delivered() {
        let engine = Arc::new(FixedEngine {
            text: "hello world",
            delay: Duration::ZERO,
        });
        let (mut dispatcher, mut rx) = dispatcher(engine, Duration::from_secs(5));

        let handle = dispatcher.submit(artifact(), ModelOptions::default()).unwrap();
        let (settled, outcome) = next_settle(&mut rx).await;

        assert_eq!(settled, handle);
        assert!(matches!(outcome, TranscriptionOutcome::Completed(text) if text == "hello world"));
    }

    #[tokio::test]
    async fn second_submit_while_in_flight_is_busy() {
        let engine = Arc::new(FixedEngine {
            text: "slow",
            delay: Duration::from_secs(60),
        });
        let (mut dispatcher, _rx) = dispatcher(engine, Duration::from_secs(120));

        dispatcher.submit(artifact(), ModelOptions::default()).unwrap();
        let second = dispatcher.submit(artifact(), ModelOptions::default());
        assert!(matches!(second, Err(DispatchError::Busy)));
    }

    #[tokio::test]
    async fn cancel_settles_immediately_and_frees_the_slot() {
        let engine = Arc::new(FixedEngine {
            text: "slow",
            delay: Duration::from_secs(60),
        });
        let (mut dispatcher, mut rx) = dispatcher(engine, Duration::from_secs(120));

        let handle = dispatcher.submit(artifact(), ModelOptions::default()).unwrap();
        dispatcher.cancel(handle);

        let (settled, outcome) = next_settle(&mut rx).await;
        assert_eq!(settled, handle);
        assert!(matches!(outcome, TranscriptionOutcome::Cancelled));

        // The slot is free again right away.
        let next = dispatcher.submit(artifact(), ModelOptions::default());
        assert!(next.is_ok());

        // No stale result for the cancelled submission ever shows up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        match rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(SessionEvent::TranscriptionSettled { handle: stale, .. }) => {
                assert_ne!(stale, handle, "cancelled submission settled twice")
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_engine_times_out() {
        let engine = Arc::new(FixedEngine {
            text: "late",
            delay: Duration::from_secs(600),
        });
        let (mut dispatcher, mut rx) = dispatcher(engine, Duration::from_secs(30));

        dispatcher.submit(artifact(), ModelOptions::default()).unwrap();
        let (_, outcome) = next_settle(&mut rx).await;

        match outcome {
            TranscriptionOutcome::Failed(info) => assert_eq!(info.kind, ErrorKind::Timeout),
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn engine_failure_maps_to_engine_kind() {
        let (mut dispatcher, mut rx) = dispatcher(Arc::new(FailingEngine), Duration::from_secs(5));

        dispatcher.submit(artifact(), ModelOptions::default()).unwrap();
        let (_, outcome) = next_settle(&mut rx).await;

        match outcome {
            TranscriptionOutcome::Failed(info) => {
                assert_eq!(info.kind, ErrorKind::Engine);
                assert!(info.message.contains("backend exploded"));
            }
            other => panic!("expected engine failure, got {:?}", other),
        }
    }
}
