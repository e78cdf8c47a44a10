//! Per-presented-frame scheduling.
//!
//! The driver keeps at most one next-frame request outstanding. A request
//! is issued when the driver is armed and re-issued only after the previous
//! frame has been fully handled, so render callbacks never overlap and a
//! stopped driver never schedules again.

use crate::event::FrameRequestId;
use crate::source::MediaSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Armed,
    Stopped,
}

#[derive(Debug)]
pub struct FrameDriver {
    state: DriverState,
    pending: Option<FrameRequestId>,
    frames_drawn: u64,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            state: DriverState::Idle,
            pending: None,
            frames_drawn: 0,
        }
    }

    /// Start driving: request the first frame. No-op unless idle.
    pub fn arm(&mut self, source: &mut dyn MediaSource) {
        if self.state != DriverState::Idle {
            return;
        }
        self.state = DriverState::Armed;
        self.pending = Some(source.request_frame());
        tracing::debug!("Frame driver armed");
    }

    /// Claim a presented frame.
    ///
    /// Returns `true` when the frame answers the outstanding request and
    /// should be rendered. Stale or post-stop presentations return `false`.
    pub fn accept(&mut self, request: FrameRequestId) -> bool {
        if self.state != DriverState::Armed || self.pending != Some(request) {
            tracing::trace!(?request, "Ignoring unsolicited frame");
            return false;
        }
        self.pending = None;
        true
    }

    /// Record a handled frame and request the next one.
    pub fn reschedule(&mut self, source: &mut dyn MediaSource) {
        if self.state != DriverState::Armed || self.pending.is_some() {
            return;
        }
        self.frames_drawn += 1;
        self.pending = Some(source.request_frame());
    }

    /// Stop driving and cancel any outstanding request. Idempotent.
    pub fn stop(&mut self, source: &mut dyn MediaSource) {
        if let Some(request) = self.pending.take() {
            source.cancel_frame(request);
        }
        if self.state != DriverState::Stopped {
            tracing::debug!(frames_drawn = self.frames_drawn, "Frame driver stopped");
        }
        self.state = DriverState::Stopped;
    }

    pub fn is_stopped(&self) -> bool {
        self.state == DriverState::Stopped
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use markfree_common::error::MarkfreeResult;

    use super::*;
    use crate::event::EventSender;
    use crate::source::SourceMetadata;

    #[derive(Default)]
    struct CountingSource {
        next: u64,
        requested: Vec<FrameRequestId>,
        cancelled: Vec<FrameRequestId>,
    }

    #[async_trait]
    impl MediaSource for CountingSource {
        fn metadata(&self) -> SourceMetadata {
            SourceMetadata {
                duration_secs: 1.0,
                width: 2,
                height: 2,
                frame_rate: None,
            }
        }

        fn payload(&self) -> Bytes {
            Bytes::new()
        }

        fn set_muted(&mut self, _muted: bool) {}

        async fn play(&mut self, _events: EventSender) -> MarkfreeResult<()> {
            Ok(())
        }

        fn request_frame(&mut self) -> FrameRequestId {
            self.next += 1;
            let id = FrameRequestId(self.next);
            self.requested.push(id);
            id
        }

        fn cancel_frame(&mut self, request: FrameRequestId) {
            self.cancelled.push(request);
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn one_request_outstanding_at_a_time() {
        let mut source = CountingSource::default();
        let mut driver = FrameDriver::new();
        driver.arm(&mut source);
        driver.arm(&mut source);
        assert_eq!(source.requested.len(), 1);

        assert!(driver.accept(FrameRequestId(1)));
        assert!(!driver.accept(FrameRequestId(1)));
        driver.reschedule(&mut source);
        driver.reschedule(&mut source);
        assert_eq!(source.requested.len(), 2);
        assert_eq!(driver.frames_drawn(), 1);
    }

    #[test]
    fn stale_request_is_ignored() {
        let mut source = CountingSource::default();
        let mut driver = FrameDriver::new();
        driver.arm(&mut source);
        assert!(!driver.accept(FrameRequestId(7)));
        assert!(driver.has_pending());
    }

    #[test]
    fn stop_cancels_and_blocks_rescheduling() {
        let mut source = CountingSource::default();
        let mut driver = FrameDriver::new();
        driver.arm(&mut source);
        driver.stop(&mut source);
        assert_eq!(source.cancelled, vec![FrameRequestId(1)]);

        assert!(!driver.accept(FrameRequestId(1)));
        driver.reschedule(&mut source);
        driver.arm(&mut source);
        assert_eq!(source.requested.len(), 1);
        assert!(driver.is_stopped());

        driver.stop(&mut source);
        assert_eq!(source.cancelled.len(), 1);
    }

    #[test]
    fn stop_during_render_prevents_next_request() {
        let mut source = CountingSource::default();
        let mut driver = FrameDriver::new();
        driver.arm(&mut source);
        assert!(driver.accept(FrameRequestId(1)));
        driver.stop(&mut source);
        driver.reschedule(&mut source);
        assert_eq!(source.requested.len(), 1);
        assert!(source.cancelled.is_empty());
    }
}
