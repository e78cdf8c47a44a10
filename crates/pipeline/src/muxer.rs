//! Stream muxer: container negotiation and encoder lifecycle.

use std::time::Duration;

use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::format::{OutputFormat, DEFAULT_FORMAT_PREFERENCE};
use markfree_media_model::frame::{AudioBuffer, AudioSpec};
use markfree_render_engine::Surface;

use crate::event::EventSender;

/// Cadence at which encoders flush chunks.
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_secs(1);

/// The rendered surface stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTrack {
    pub width: u32,
    pub height: u32,
    /// Nominal capture rate of the surface.
    pub fps: u32,
}

/// The relayed audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrack {
    pub spec: AudioSpec,
}

/// Exactly one video track plus at most one audio track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedStream {
    pub video: VideoTrack,
    pub audio: Option<AudioTrack>,
}

impl CombinedStream {
    pub fn track_count(&self) -> usize {
        1 + usize::from(self.audio.is_some())
    }
}

/// Parameters handed to an encoder backend on start.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSession {
    pub format: OutputFormat,
    pub stream: CombinedStream,
    pub chunk_interval: Duration,
}

/// A container encoder.
///
/// A started backend reports through the event channel it was given:
/// [`crate::event::PipelineEvent::Chunk`] for each flushed chunk,
/// [`crate::event::PipelineEvent::EncoderError`] on failure, and
/// [`crate::event::PipelineEvent::EncoderStopped`] once after a stop, after
/// every remaining chunk has been sent.
pub trait EncoderBackend: Send {
    fn name(&self) -> &str;

    /// Whether the backend can produce the given MIME type.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn start(&mut self, session: &EncoderSession, events: EventSender) -> MarkfreeResult<()>;

    /// Encode one packed RGBA frame at `pts`.
    fn push_video(&mut self, pixels: &[u8], pts: Duration) -> MarkfreeResult<()>;

    /// Queue a decoded audio buffer starting at `offset` on the output
    /// timeline.
    fn push_audio(&mut self, buffer: &AudioBuffer, offset: Duration) -> MarkfreeResult<()>;

    /// Stop encoding. A backend that was started emits `EncoderStopped`.
    fn stop(&mut self) -> MarkfreeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Inactive,
    Recording,
    Stopped,
}

/// Combines the surface stream and the relayed audio into one encoder
/// session.
pub struct StreamMuxer {
    backend: Box<dyn EncoderBackend>,
    preference: Vec<OutputFormat>,
    chunk_interval: Duration,
    state: MuxerState,
    format: Option<OutputFormat>,
}

impl StreamMuxer {
    pub fn new(backend: Box<dyn EncoderBackend>) -> Self {
        Self {
            backend,
            preference: DEFAULT_FORMAT_PREFERENCE.to_vec(),
            chunk_interval: DEFAULT_CHUNK_INTERVAL,
            state: MuxerState::Inactive,
            format: None,
        }
    }

    pub fn with_preference(mut self, preference: Vec<OutputFormat>) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_chunk_interval(mut self, chunk_interval: Duration) -> Self {
        self.chunk_interval = chunk_interval;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == MuxerState::Recording
    }

    /// Format of the current or last session.
    pub fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    /// First preferred format the backend supports, else the baseline.
    pub fn negotiate(&self) -> OutputFormat {
        OutputFormat::negotiate(&self.preference, |mime| {
            self.backend.is_type_supported(mime)
        })
    }

    /// Negotiate a format and start the encoder on `stream`.
    ///
    /// A muxer is single-use per job: starting one that is already recording
    /// is rejected.
    pub fn start(
        &mut self,
        stream: CombinedStream,
        events: EventSender,
    ) -> MarkfreeResult<OutputFormat> {
        if self.state == MuxerState::Recording {
            return Err(MarkfreeError::encoder("encoder is already recording"));
        }

        let format = self.negotiate();
        let session = EncoderSession {
            format,
            stream,
            chunk_interval: self.chunk_interval,
        };

        tracing::info!(
            backend = self.backend.name(),
            %format,
            tracks = stream.track_count(),
            width = stream.video.width,
            height = stream.video.height,
            "Starting encoder"
        );

        self.format = Some(format);
        self.backend
            .start(&session, events)
            .map_err(into_encoder_error)?;
        self.state = MuxerState::Recording;
        Ok(format)
    }

    /// Encode the current surface contents. No-op unless recording.
    pub fn push_video(&mut self, surface: &Surface, pts: Duration) -> MarkfreeResult<()> {
        if !self.is_recording() {
            return Ok(());
        }
        self.backend
            .push_video(surface.as_bytes(), pts)
            .map_err(into_encoder_error)
    }

    /// Feed relayed audio into the session. No-op unless recording.
    pub fn push_audio(&mut self, buffer: &AudioBuffer, offset: Duration) -> MarkfreeResult<()> {
        if !self.is_recording() {
            return Ok(());
        }
        self.backend
            .push_audio(buffer, offset)
            .map_err(into_encoder_error)
    }

    /// Stop the encoder. Idempotent.
    ///
    /// Returns `true` when this call stopped a recording session, in which
    /// case the backend will emit `EncoderStopped`.
    pub fn stop(&mut self) -> MarkfreeResult<bool> {
        if self.state != MuxerState::Recording {
            return Ok(false);
        }
        self.state = MuxerState::Stopped;
        tracing::debug!(backend = self.backend.name(), "Stopping encoder");
        self.backend.stop().map_err(into_encoder_error)?;
        Ok(true)
    }

    /// Turn an encoder-reported failure into a job error, stopping the
    /// encoder if it is still running.
    pub fn fail(&mut self, message: impl Into<String>) -> MarkfreeError {
        self.abort(MarkfreeError::encoder(message))
    }

    /// Like [`StreamMuxer::fail`], for errors raised by a push.
    pub fn abort(&mut self, err: MarkfreeError) -> MarkfreeError {
        let err = into_encoder_error(err);
        tracing::error!(backend = self.backend.name(), error = %err, "Encoder failed");
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Encoder stop after failure also failed");
        }
        err
    }
}

fn into_encoder_error(err: MarkfreeError) -> MarkfreeError {
    match err {
        MarkfreeError::Encoder { .. } => err,
        other => MarkfreeError::encoder(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use markfree_common::error::FailureKind;

    use super::*;
    use crate::backend::synthetic::SyntheticEncoder;
    use crate::event::{event_channel, PipelineEvent};

    fn stream() -> CombinedStream {
        CombinedStream {
            video: VideoTrack {
                width: 4,
                height: 4,
                fps: 30,
            },
            audio: None,
        }
    }

    #[test]
    fn negotiation_prefers_first_supported() {
        let muxer = StreamMuxer::new(Box::new(SyntheticEncoder::supporting(&["video/mp4"])));
        assert_eq!(muxer.negotiate(), OutputFormat::Mp4);

        let muxer = StreamMuxer::new(Box::new(SyntheticEncoder::supporting(&[])));
        assert_eq!(muxer.negotiate(), OutputFormat::Webm);
    }

    #[test]
    fn negotiation_is_deterministic() {
        let muxer = StreamMuxer::new(Box::new(SyntheticEncoder::supporting(&[
            "video/mp4",
            OutputFormat::Mp4AvcAac.mime_type(),
        ])));
        let first = muxer.negotiate();
        for _ in 0..10 {
            assert_eq!(muxer.negotiate(), first);
        }
        assert_eq!(first, OutputFormat::Mp4AvcAac);
    }

    #[test]
    fn stop_is_idempotent() {
        let (tx, mut rx) = event_channel();
        let mut muxer = StreamMuxer::new(Box::new(SyntheticEncoder::new()));
        assert!(!muxer.stop().unwrap());

        muxer.start(stream(), tx).unwrap();
        assert!(muxer.is_recording());
        assert!(muxer.stop().unwrap());
        assert!(!muxer.stop().unwrap());
        assert_eq!(muxer.state(), MuxerState::Stopped);

        let mut stopped = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PipelineEvent::EncoderStopped) {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);
    }

    #[test]
    fn start_failure_is_encoder_error() {
        let (tx, _rx) = event_channel();
        let mut muxer = StreamMuxer::new(Box::new(SyntheticEncoder::new().fail_on_start()));
        let err = muxer.start(stream(), tx).unwrap_err();
        assert_eq!(err.kind(), FailureKind::EncoderFailure);
        assert_eq!(muxer.state(), MuxerState::Inactive);
    }

    #[test]
    fn fail_stops_a_running_encoder() {
        let (tx, _rx) = event_channel();
        let encoder = SyntheticEncoder::new();
        let log = encoder.log();
        let mut muxer = StreamMuxer::new(Box::new(encoder));
        muxer.start(stream(), tx).unwrap();

        let err = muxer.fail("boom");
        assert_eq!(err.kind(), FailureKind::EncoderFailure);
        assert!(!muxer.is_recording());
        assert_eq!(log.lock().unwrap().stops, 1);
    }
}
