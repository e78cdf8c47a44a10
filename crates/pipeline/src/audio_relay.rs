//! Audio relay: decode the source's audio once and feed it to the muxer.
//!
//! Decoding failure is not fatal. The relay degrades to "no audio" and the
//! job carries on with a video-only stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::chunk::Degradation;
use markfree_media_model::frame::{AudioBuffer, AudioSpec};

use crate::muxer::{AudioTrack, StreamMuxer};

/// Decodes a full encoded payload into memory.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, payload: Bytes, spec: AudioSpec) -> MarkfreeResult<AudioBuffer>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Open,
    Started,
    Closed,
}

/// Outcome of [`AudioRelay::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutput {
    /// Track to add to the combined stream, if any.
    pub track: Option<AudioTrack>,
    pub degradation: Option<Degradation>,
}

impl RelayOutput {
    pub fn has_audio(&self) -> bool {
        self.track.is_some()
    }
}

/// Per-job audio context.
pub struct AudioRelay {
    decoder: Arc<dyn AudioDecoder>,
    spec: AudioSpec,
    buffer: Option<AudioBuffer>,
    state: RelayState,
}

impl AudioRelay {
    pub fn new(decoder: Arc<dyn AudioDecoder>, spec: AudioSpec) -> Self {
        Self {
            decoder,
            spec,
            buffer: None,
            state: RelayState::Open,
        }
    }

    /// Decode `payload` off the async runtime.
    pub async fn prepare(&mut self, payload: Bytes) -> RelayOutput {
        let decoder = Arc::clone(&self.decoder);
        let spec = self.spec;
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(payload, spec))
            .await
            .unwrap_or_else(|e| Err(MarkfreeError::audio_decode(format!("decoder task: {e}"))));

        let decoded = decoded.and_then(|buffer| {
            if buffer.is_empty() {
                Err(MarkfreeError::audio_decode("source has no audio samples"))
            } else {
                Ok(buffer)
            }
        });

        match decoded {
            Ok(buffer) => {
                tracing::info!(
                    sample_rate = buffer.spec.sample_rate,
                    channels = buffer.spec.channels,
                    duration_secs = buffer.duration().as_secs_f64(),
                    "Audio decoded"
                );
                let track = AudioTrack { spec: buffer.spec };
                self.buffer = Some(buffer);
                RelayOutput {
                    track: Some(track),
                    degradation: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Audio decode failed; continuing without audio");
                RelayOutput {
                    track: None,
                    degradation: Some(Degradation::AudioDecode {
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    /// Start relaying into the muxer. Runs at most once per job.
    ///
    /// Returns whether audio was started by this call.
    pub fn start(&mut self, muxer: &mut StreamMuxer) -> MarkfreeResult<bool> {
        if self.state != RelayState::Open {
            tracing::trace!("Audio relay already started or closed");
            return Ok(false);
        }
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(false);
        };
        self.state = RelayState::Started;
        muxer.push_audio(buffer, Duration::ZERO)?;
        tracing::debug!(frames = buffer.frames(), "Audio relay started");
        Ok(true)
    }

    /// Release the audio context. Idempotent.
    pub fn close(&mut self) {
        if self.state == RelayState::Closed {
            return;
        }
        self.state = RelayState::Closed;
        self.buffer = None;
        tracing::debug!("Audio context closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state == RelayState::Closed
    }
}
