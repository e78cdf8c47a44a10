//! Playable media sources.

use async_trait::async_trait;
use bytes::Bytes;
use markfree_common::error::MarkfreeResult;

use crate::event::{EventSender, FrameRequestId};

/// Static properties of a loaded source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMetadata {
    /// Total duration in seconds. `NaN` when the container does not say.
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Native frame rate, when known.
    pub frame_rate: Option<f64>,
}

impl SourceMetadata {
    /// Whether the duration is a finite positive number.
    pub fn has_usable_duration(&self) -> bool {
        self.duration_secs.is_finite() && self.duration_secs > 0.0
    }
}

/// A loaded video that plays in real time and presents frames on request.
///
/// Frames are only delivered for an outstanding request: each
/// [`MediaSource::request_frame`] yields at most one
/// [`crate::event::PipelineEvent::FramePresented`] carrying the same id.
/// Frames presented while no request is outstanding are dropped.
#[async_trait]
pub trait MediaSource: Send {
    fn metadata(&self) -> SourceMetadata;

    /// The raw encoded bytes the source was loaded from.
    fn payload(&self) -> Bytes;

    /// Mute the source's own audio output.
    fn set_muted(&mut self, muted: bool);

    /// Rewind to the start and begin playback.
    ///
    /// Resolves once playback is running. Frames, time updates, end and
    /// error notifications are then sent on `events`.
    async fn play(&mut self, events: EventSender) -> MarkfreeResult<()>;

    /// Ask for the next presented frame.
    fn request_frame(&mut self) -> FrameRequestId;

    /// Withdraw a request so it never fires.
    fn cancel_frame(&mut self, request: FrameRequestId);

    /// Halt playback. Idempotent.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(duration_secs: f64) -> SourceMetadata {
        SourceMetadata {
            duration_secs,
            width: 1280,
            height: 720,
            frame_rate: Some(30.0),
        }
    }

    #[test]
    fn usable_duration() {
        assert!(meta(10.0).has_usable_duration());
        assert!(!meta(f64::NAN).has_usable_duration());
        assert!(!meta(f64::INFINITY).has_usable_duration());
        assert!(!meta(0.0).has_usable_duration());
        assert!(!meta(-1.0).has_usable_duration());
    }
}
