//! Events delivered to the controller loop.
//!
//! Media sources and encoder backends report from their own threads; the
//! controller consumes everything from a single channel so pipeline state
//! is only ever mutated on one task.

use markfree_media_model::chunk::EncodedChunk;
use markfree_media_model::frame::VideoFrame;
use tokio::sync::mpsc;

/// Handle for one outstanding next-frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequestId(pub u64);

/// Notifications from a running source or encoder.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A frame was presented in answer to `request`.
    FramePresented {
        request: FrameRequestId,
        frame: VideoFrame,
    },
    /// Playback position advanced.
    TimeUpdate { position_secs: f64 },
    /// Playback reached the end of the source.
    SourceEnded,
    /// Playback failed.
    SourceError { message: String },
    /// The encoder flushed a chunk of output.
    Chunk(EncodedChunk),
    /// The encoder failed.
    EncoderError { message: String },
    /// The encoder finished stopping; no more chunks will follow.
    EncoderStopped,
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Send an event, ignoring a closed channel.
///
/// The receiver only goes away once the job is torn down, at which point
/// late events have no one left to act on them.
pub(crate) fn emit(events: &EventSender, event: PipelineEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Event dropped; controller has gone away");
    }
}
