//! Deterministic in-process backends.
//!
//! The synthetic source plays a generated pattern in real time on the tokio
//! clock, the decoder produces a tone, and the encoder writes a compact
//! digest of every frame into chunks on a presentation-time cadence. Each
//! backend exposes a shared log and knobs for injecting failures.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use markfree_common::clock::{RateController, RecordingClock};
use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::chunk::EncodedChunk;
use markfree_media_model::frame::{AudioBuffer, AudioSpec, VideoFrame};
use tokio::task::JoinHandle;

use crate::audio_relay::AudioDecoder;
use crate::event::{emit, EventSender, FrameRequestId, PipelineEvent};
use crate::muxer::{EncoderBackend, EncoderSession, DEFAULT_CHUNK_INTERVAL};
use crate::source::{MediaSource, SourceMetadata};

const CHUNK_MAGIC: &[u8] = b"MFSYN1";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Calls observed by a [`SyntheticSource`].
#[derive(Debug, Default, Clone)]
pub struct SourceLog {
    pub plays: u32,
    pub stops: u32,
    pub requests: u64,
    pub cancelled: u64,
    pub muted: bool,
}

#[derive(Debug, Clone)]
struct PlaybackScript {
    duration_secs: f64,
    fps: u32,
    frame_width: u32,
    frame_height: u32,
    present_frames: bool,
    error_at_secs: Option<f64>,
    time_update_interval: Duration,
}

impl PlaybackScript {
    fn frame_count(&self) -> u64 {
        if !self.present_frames || !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return 0;
        }
        (self.duration_secs * self.fps as f64).round() as u64
    }

    fn frame(&self, index: u64, pts: Duration) -> VideoFrame {
        let (w, h) = (self.frame_width, self.frame_height);
        let mut data = Vec::with_capacity(VideoFrame::expected_len(w, h));
        let shift = index as u32;
        for y in 0..h {
            for x in 0..w {
                let v = (x.wrapping_add(shift) ^ y) as u8;
                data.extend_from_slice(&[v, v.wrapping_mul(3), 255 - v, 255]);
            }
        }
        VideoFrame::new(w, h, pts, data)
    }
}

/// A generated video that plays on the tokio clock.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    payload: Bytes,
    fail_playback: bool,
    script: PlaybackScript,
    pending: Arc<Mutex<Option<FrameRequestId>>>,
    next_request: u64,
    task: Option<JoinHandle<()>>,
    log: Arc<Mutex<SourceLog>>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, duration_secs: f64, fps: u32) -> Self {
        Self {
            width,
            height,
            payload: Bytes::from_static(b"synthetic-media"),
            fail_playback: false,
            script: PlaybackScript {
                duration_secs,
                fps: fps.max(1),
                frame_width: width,
                frame_height: height,
                present_frames: true,
                error_at_secs: None,
                time_update_interval: Duration::from_millis(250),
            },
            pending: Arc::new(Mutex::new(None)),
            next_request: 0,
            task: None,
            log: Arc::new(Mutex::new(SourceLog::default())),
        }
    }

    /// Reject [`MediaSource::play`].
    pub fn failing_playback(mut self) -> Self {
        self.fail_playback = true;
        self
    }

    /// Report a playback error once playback reaches `secs`.
    pub fn error_at(mut self, secs: f64) -> Self {
        self.script.error_at_secs = Some(secs);
        self
    }

    /// Run the clock to the end without presenting a single frame.
    pub fn without_frames(mut self) -> Self {
        self.script.present_frames = false;
        self
    }

    /// Present frames of a size other than the advertised one.
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.script.frame_width = width;
        self.script.frame_height = height;
        self
    }

    pub fn with_time_update_interval(mut self, interval: Duration) -> Self {
        self.script.time_update_interval = interval;
        self
    }

    pub fn log(&self) -> Arc<Mutex<SourceLog>> {
        Arc::clone(&self.log)
    }

    fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MediaSource for SyntheticSource {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            duration_secs: self.script.duration_secs,
            width: self.width,
            height: self.height,
            frame_rate: Some(self.script.fps as f64),
        }
    }

    fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    fn set_muted(&mut self, muted: bool) {
        lock(&self.log).muted = muted;
    }

    async fn play(&mut self, events: EventSender) -> MarkfreeResult<()> {
        if self.fail_playback {
            return Err(MarkfreeError::playback("synthetic source refused to play"));
        }
        self.halt();
        *lock(&self.pending) = None;
        lock(&self.log).plays += 1;

        let script = self.script.clone();
        let pending = Arc::clone(&self.pending);
        self.task = Some(tokio::spawn(run_playback(script, pending, events)));
        Ok(())
    }

    fn request_frame(&mut self) -> FrameRequestId {
        self.next_request += 1;
        let request = FrameRequestId(self.next_request);
        *lock(&self.pending) = Some(request);
        lock(&self.log).requests += 1;
        request
    }

    fn cancel_frame(&mut self, request: FrameRequestId) {
        let mut pending = lock(&self.pending);
        if *pending == Some(request) {
            *pending = None;
            lock(&self.log).cancelled += 1;
        }
    }

    fn stop(&mut self) {
        self.halt();
        lock(&self.log).stops += 1;
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.halt();
    }
}

async fn run_playback(
    script: PlaybackScript,
    pending: Arc<Mutex<Option<FrameRequestId>>>,
    events: EventSender,
) {
    let fps = script.fps as f64;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
    let mut updates = RateController::with_interval(script.time_update_interval);

    for index in 0..script.frame_count() {
        ticker.tick().await;
        let position_secs = index as f64 / fps;
        let pts = RecordingClock::secs_to_duration(position_secs);

        if script.error_at_secs.is_some_and(|at| position_secs >= at) {
            emit(
                &events,
                PipelineEvent::SourceError {
                    message: format!("synthetic decode error at {position_secs:.2}s"),
                },
            );
            return;
        }

        let request = lock(&pending).take();
        if let Some(request) = request {
            let frame = script.frame(index, pts);
            emit(&events, PipelineEvent::FramePresented { request, frame });
        }
        if updates.should_tick(pts.as_nanos() as u64) {
            emit(&events, PipelineEvent::TimeUpdate { position_secs });
        }
    }

    ticker.tick().await;
    emit(
        &events,
        PipelineEvent::TimeUpdate {
            position_secs: script.duration_secs,
        },
    );
    emit(&events, PipelineEvent::SourceEnded);
}

// ---------------------------------------------------------------------------
// Audio decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum DecodeOutcome {
    Tone { seconds: f64 },
    Corrupt,
}

/// Decodes any payload to a fixed-length tone, or always fails.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticAudioDecoder {
    outcome: DecodeOutcome,
}

impl SyntheticAudioDecoder {
    /// A 440 Hz tone lasting `seconds`.
    pub fn tone(seconds: f64) -> Self {
        Self {
            outcome: DecodeOutcome::Tone { seconds },
        }
    }

    /// Fail every decode as if the audio stream were damaged.
    pub fn corrupt() -> Self {
        Self {
            outcome: DecodeOutcome::Corrupt,
        }
    }
}

impl AudioDecoder for SyntheticAudioDecoder {
    fn decode(&self, _payload: Bytes, spec: AudioSpec) -> MarkfreeResult<AudioBuffer> {
        match self.outcome {
            DecodeOutcome::Corrupt => Err(MarkfreeError::audio_decode(
                "unable to decode audio data in payload",
            )),
            DecodeOutcome::Tone { seconds } => {
                let frames = (seconds.max(0.0) * spec.sample_rate as f64) as usize;
                let channels = spec.channels as usize;
                let step = 2.0 * std::f32::consts::PI * 440.0 / spec.sample_rate.max(1) as f32;
                let mut samples = Vec::with_capacity(frames * channels);
                for i in 0..frames {
                    let value = 0.25 * (step * i as f32).sin();
                    samples.extend(std::iter::repeat(value).take(channels));
                }
                Ok(AudioBuffer::new(spec, samples))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Calls observed by a [`SyntheticEncoder`].
#[derive(Debug, Default, Clone)]
pub struct EncoderLog {
    pub starts: u32,
    pub stops: u32,
    pub video_frames: u64,
    pub audio_pushes: u32,
    pub last_session: Option<EncoderSession>,
}

#[derive(Debug)]
struct EncoderRun {
    events: EventSender,
    chunk_interval: Duration,
    pending: Vec<u8>,
    sequence: u64,
    last_flush: Duration,
    has_video: bool,
}

impl EncoderRun {
    fn flush(&mut self) {
        if !self.has_video || self.pending.is_empty() {
            return;
        }
        let data = Bytes::from(std::mem::take(&mut self.pending));
        emit(
            &self.events,
            PipelineEvent::Chunk(EncodedChunk::new(self.sequence, data)),
        );
        self.sequence += 1;
    }
}

/// Writes a frame digest stream instead of real video.
///
/// Chunks are cut every `chunk_interval` of presentation time. Nothing is
/// emitted until at least one video frame has been pushed.
pub struct SyntheticEncoder {
    supported: Option<Vec<String>>,
    fail_on_start: bool,
    error_after_start: bool,
    fail_on_push: bool,
    run: Option<EncoderRun>,
    log: Arc<Mutex<EncoderLog>>,
}

impl SyntheticEncoder {
    /// An encoder that supports every MIME type.
    pub fn new() -> Self {
        Self {
            supported: None,
            fail_on_start: false,
            error_after_start: false,
            fail_on_push: false,
            run: None,
            log: Arc::new(Mutex::new(EncoderLog::default())),
        }
    }

    /// An encoder that supports only `mime_types`.
    pub fn supporting(mime_types: &[&str]) -> Self {
        Self {
            supported: Some(mime_types.iter().map(|m| m.to_string()).collect()),
            ..Self::new()
        }
    }

    /// Reject [`EncoderBackend::start`].
    pub fn fail_on_start(mut self) -> Self {
        self.fail_on_start = true;
        self
    }

    /// Start, then immediately report an asynchronous error.
    pub fn error_after_start(mut self) -> Self {
        self.error_after_start = true;
        self
    }

    /// Reject every video frame.
    pub fn fail_on_push(mut self) -> Self {
        self.fail_on_push = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<EncoderLog>> {
        Arc::clone(&self.log)
    }
}

impl Default for SyntheticEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for SyntheticEncoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        match &self.supported {
            None => true,
            Some(list) => list.iter().any(|m| m == mime_type),
        }
    }

    fn start(&mut self, session: &EncoderSession, events: EventSender) -> MarkfreeResult<()> {
        if self.fail_on_start {
            return Err(MarkfreeError::encoder("synthetic encoder refused to start"));
        }
        {
            let mut log = lock(&self.log);
            log.starts += 1;
            log.last_session = Some(session.clone());
        }

        if self.error_after_start {
            emit(
                &events,
                PipelineEvent::EncoderError {
                    message: "synthetic encoder failed after start".into(),
                },
            );
        }

        let mut pending = CHUNK_MAGIC.to_vec();
        pending.extend_from_slice(session.format.mime_type().as_bytes());
        pending.push(b'\n');
        let chunk_interval = if session.chunk_interval.is_zero() {
            DEFAULT_CHUNK_INTERVAL
        } else {
            session.chunk_interval
        };
        self.run = Some(EncoderRun {
            events,
            chunk_interval,
            pending,
            sequence: 0,
            last_flush: Duration::ZERO,
            has_video: false,
        });
        Ok(())
    }

    fn push_video(&mut self, pixels: &[u8], pts: Duration) -> MarkfreeResult<()> {
        if self.fail_on_push {
            return Err(MarkfreeError::encoder("synthetic encoder rejected a frame"));
        }
        let Some(run) = self.run.as_mut() else {
            return Err(MarkfreeError::encoder("encoder is not running"));
        };
        run.pending.push(b'V');
        run.pending
            .extend_from_slice(&(pts.as_nanos() as u64).to_le_bytes());
        run.pending.extend_from_slice(&digest(pixels).to_le_bytes());
        run.has_video = true;
        lock(&self.log).video_frames += 1;

        if pts.saturating_sub(run.last_flush) >= run.chunk_interval {
            run.flush();
            run.last_flush = pts;
        }
        Ok(())
    }

    fn push_audio(&mut self, buffer: &AudioBuffer, offset: Duration) -> MarkfreeResult<()> {
        let Some(run) = self.run.as_mut() else {
            return Err(MarkfreeError::encoder("encoder is not running"));
        };
        run.pending.push(b'A');
        run.pending
            .extend_from_slice(&(offset.as_nanos() as u64).to_le_bytes());
        run.pending
            .extend_from_slice(&(buffer.frames() as u64).to_le_bytes());
        lock(&self.log).audio_pushes += 1;
        Ok(())
    }

    fn stop(&mut self) -> MarkfreeResult<()> {
        let Some(mut run) = self.run.take() else {
            return Ok(());
        };
        run.flush();
        lock(&self.log).stops += 1;
        emit(&run.events, PipelineEvent::EncoderStopped);
        Ok(())
    }
}

/// FNV-1a over the frame bytes.
fn digest(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}
