//! Module for managing audio capture. There can only be one active capture
//! at a time; the caller owns the handle and decides whether a capture is
//! finished (`stop`) or discarded (`cancel`).
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
//! and the handle talks to it over a control channel. The audio callback
//! pushes frames into a shared chunked buffer and feeds the level meter;
//! it never blocks.

mod artifact;

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

pub use artifact::AudioArtifact;

/// Sample rate of finished artifacts unless configured otherwise.
pub const DEFAULT_TARGET_RATE: u32 = 16_000;

/// Captures shorter than this are treated as accidental taps.
pub const DEFAULT_MIN_CAPTURE: Duration = Duration::from_millis(100);

/// Samples per buffered chunk; bounds per-callback copy cost.
const CHUNK_SAMPLES: usize = 4096;

/// Peak-hold window for the level meter.
const LEVEL_WINDOW: Duration = Duration::from_millis(100);

/// Minimum spacing between level emissions (~60 Hz).
const LEVEL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum CaptureError {
    /// generic anyhow error
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    /// No usable input device, or the device rejected its own config
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Sample format not supported
    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),
    /// Build stream error
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    /// Capture shorter than the configured minimum
    #[error("capture too short: {got:?} < {minimum:?}")]
    EmptyCapture { got: Duration, minimum: Duration },
}

type Result<T> = std::result::Result<T, CaptureError>;

/// Callback fed with loudness values in `[0, 100]`. Invoked from the
/// audio callback path; must not block.
pub type LevelSink = Box<dyn Fn(f32) + Send + 'static>;

/// Which input device to capture from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
}

/// Parameters for one capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: DeviceSelector,
    /// Sample rate of the delivered artifact; the device may capture at
    /// another rate and is resampled on finalize.
    pub target_rate: u32,
    pub min_duration: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::Default,
            target_rate: DEFAULT_TARGET_RATE,
            min_duration: DEFAULT_MIN_CAPTURE,
        }
    }
}

/// Growable sequence of fixed-size chunks.
#[derive(Debug, Default)]
struct ChunkBuffer {
    chunks: Vec<Vec<f32>>,
}

impl ChunkBuffer {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, mut data: &[f32]) {
        while !data.is_empty() {
            let needs_chunk = self
                .chunks
                .last()
                .is_none_or(|chunk| chunk.len() == CHUNK_SAMPLES);
            if needs_chunk {
                self.chunks.push(Vec::with_capacity(CHUNK_SAMPLES));
            }
            let chunk = self.chunks.last_mut().unwrap();
            let take = (CHUNK_SAMPLES - chunk.len()).min(data.len());
            chunk.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
    }

    fn samples(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    fn concat(self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples());
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Loudness meter over the capture callback stream.
///
/// Each callback contributes the mean absolute amplitude of its slice,
/// normalized against the maximum representable magnitude (1.0 for f32).
/// The emitted value is the peak over the last ~100 ms, scaled to
/// `[0, 100]` and rate-limited to ~60 Hz.
struct LevelMeter {
    window: VecDeque<(Instant, f32)>,
    last_emit: Option<Instant>,
}

impl LevelMeter {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            last_emit: None,
        }
    }

    fn feed(&mut self, now: Instant, data: &[f32]) -> Option<f32> {
        let mean = mean_abs(data);
        self.window.push_back((now, mean));
        while let Some(&(t, _)) = self.window.front() {
            if now.duration_since(t) > LEVEL_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        let due = self
            .last_emit
            .is_none_or(|t| now.duration_since(t) >= LEVEL_INTERVAL);
        if !due {
            return None;
        }
        self.last_emit = Some(now);

        let peak = self
            .window
            .iter()
            .map(|&(_, mean)| mean)
            .fold(0.0f32, f32::max);
        Some((peak * 100.0).clamp(0.0, 100.0))
    }
}

/// Mean absolute amplitude of a sample slice.
fn mean_abs(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|s| s.abs()).sum::<f32>() / data.len() as f32
}

type SharedBuffer = Arc<Mutex<ChunkBuffer>>;

struct StreamInfo {
    sample_rate: u32,
    channels: u16,
}

pub struct CaptureEngine;

impl CaptureEngine {
    pub fn new() -> Self {
        Self
    }

    /// Open the input stream and start buffering frames.
    pub fn start(&self, config: &CaptureConfig, level: LevelSink) -> Result<CaptureHandle> {
        let buffer: SharedBuffer = Arc::new(Mutex::new(ChunkBuffer::new()));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_buffer = buffer.clone();
        let device = config.device.clone();
        let thread = thread::Builder::new()
            .name("voxkey-capture".into())
            .spawn(move || stream_thread(device, thread_buffer, level, ready_tx, stop_rx))
            .map_err(|e| anyhow!("failed to spawn capture thread: {e}"))?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                thread.join().ok();
                return Err(e);
            }
            Err(_) => {
                thread.join().ok();
                return Err(anyhow!("capture thread exited during startup").into());
            }
        };

        Ok(CaptureHandle {
            stop: stop_tx,
            thread: Some(thread),
            buffer: Some(buffer),
            source_rate: info.sample_rate,
            source_channels: info.channels,
            target_rate: config.target_rate,
            min_duration: config.min_duration,
        })
    }
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the cpal stream for the duration of a capture. The stream is
/// built, played, and dropped here because it is not `Send`.
fn stream_thread(
    device: DeviceSelector,
    buffer: SharedBuffer,
    level: LevelSink,
    ready_tx: mpsc::Sender<Result<StreamInfo>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let stream = match build_stream(device, buffer, level) {
        Ok((stream, info)) => {
            if ready_tx.send(Ok(info)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            ready_tx.send(Err(e)).ok();
            return;
        }
    };

    // Park until the handle tears us down; a hangup counts too.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream(
    selector: DeviceSelector,
    buffer: SharedBuffer,
    level: LevelSink,
) -> Result<(cpal::Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = match selector {
        DeviceSelector::Default => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into()))?,
        DeviceSelector::Index(index) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .nth(index)
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!("no input device at index {index}"))
            })?,
    };
    let config = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    info!(
        device_name = %device.name().unwrap_or_else(|_| "<unknown>".into()),
        config = ?config,
        "Recording from device"
    );

    let info = StreamInfo {
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    };

    let mut meter = LevelMeter::new();
    let err_fn = move |err| {
        error!("an error occurred on stream: {}", err);
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &_| write_frames(&mut meter, data, &buffer, &level),
            err_fn,
            None,
        )?,
        sample_format => {
            return Err(CaptureError::SampleFormatNotSupported(format!(
                "{:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| anyhow!("failed to play stream: {e}"))?;

    Ok((stream, info))
}

fn write_frames(meter: &mut LevelMeter, data: &[f32], buffer: &SharedBuffer, level: &LevelSink) {
    if let Some(value) = meter.feed(Instant::now(), data) {
        level(value);
    }
    if let Some(mut guard) = buffer.try_lock() {
        guard.push(data);
    }
}

/// Handle to the active capture. `stop` finalizes the buffered audio into
/// an artifact; `cancel` (or dropping the handle) discards it.
pub struct CaptureHandle {
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
    // Presence indicates the capture has not been finalized yet.
    buffer: Option<SharedBuffer>,
    source_rate: u32,
    source_channels: u16,
    target_rate: u32,
    min_duration: Duration,
}

impl CaptureHandle {
    /// End the capture and produce the finished artifact.
    pub fn stop(mut self) -> Result<AudioArtifact> {
        self.shutdown();
        let buffer = self.take_buffer()?;
        finalize(
            buffer,
            self.source_rate,
            self.source_channels,
            self.target_rate,
            self.min_duration,
        )
    }

    /// Discard buffered audio and release the stream. Idempotent: the
    /// handle is consumed, and a later drop is a no-op.
    pub fn cancel(mut self) {
        self.shutdown();
        self.buffer = None;
        debug!("capture cancelled");
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.send(()).ok();
            if thread.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }

    fn take_buffer(&mut self) -> Result<ChunkBuffer> {
        let shared = self
            .buffer
            .take()
            .ok_or_else(|| anyhow!("capture already finalized"))?;
        let owned = Arc::try_unwrap(shared)
            .map_err(|_| anyhow!("capture buffer still shared after stream teardown"))?;
        Ok(owned.into_inner())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Turn the buffered frames into a mono artifact at the target rate.
fn finalize(
    buffer: ChunkBuffer,
    source_rate: u32,
    source_channels: u16,
    target_rate: u32,
    min_duration: Duration,
) -> Result<AudioArtifact> {
    let frames = buffer.samples() / source_channels.max(1) as usize;
    let got = Duration::from_secs_f64(frames as f64 / source_rate as f64);
    if got < min_duration {
        return Err(CaptureError::EmptyCapture {
            got,
            minimum: min_duration,
        });
    }

    let samples = buffer.concat();
    let mono = artifact::downmix(&samples, source_channels);
    let resampled = artifact::resample(&mono, source_rate, target_rate);
    let made = AudioArtifact::from_f32(&resampled, target_rate);

    info!(
        frames = frames,
        duration_secs = got.as_secs_f64(),
        sample_rate = target_rate,
        "Capture finalized"
    );
    Ok(made)
}
