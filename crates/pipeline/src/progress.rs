//! Progress reporting.

/// Callback receiving job progress in `[0, 1]`.
pub type ProgressSink = Box<dyn Fn(f64) + Send>;

/// Turns playback positions into a monotonic progress fraction.
pub struct ProgressTracker {
    sink: Option<ProgressSink>,
    duration_secs: f64,
    last: f64,
}

impl ProgressTracker {
    pub fn new(sink: Option<ProgressSink>, duration_secs: f64) -> Self {
        Self {
            sink,
            duration_secs,
            last: 0.0,
        }
    }

    /// Report the playback position.
    ///
    /// The sink hears about every usable update; a position behind the
    /// furthest one seen repeats the previous value instead of moving back.
    pub fn observe(&mut self, position_secs: f64) -> f64 {
        let usable = self.duration_secs.is_finite() && self.duration_secs > 0.0;
        if !usable || !position_secs.is_finite() {
            return self.last;
        }
        let fraction = (position_secs / self.duration_secs).clamp(0.0, 1.0);
        self.last = self.last.max(fraction);
        self.notify();
        self.last
    }

    /// Report completion.
    pub fn complete(&mut self) {
        self.last = 1.0;
        self.notify();
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    fn notify(&self) {
        if let Some(sink) = &self.sink {
            sink(self.last);
        }
    }
}
