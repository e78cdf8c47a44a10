//! Processing job orchestration.
//!
//! A job walks `Idle -> Preparing -> Recording -> Finalizing` and ends in
//! `Completed` or `Failed`. Whatever the outcome, teardown (driver stop,
//! source stop, encoder stop, audio context close) runs exactly once.

use std::sync::Arc;
use std::time::Duration;

use markfree_common::clock::{DriftMeasurement, RecordingClock};
use markfree_common::config::ProcessingDefaults;
use markfree_common::error::{FailureKind, MarkfreeError, MarkfreeResult};
use markfree_media_model::chunk::{concat_chunks, Degradation, EncodedChunk, ProcessingOutput};
use markfree_media_model::format::{OutputFormat, DEFAULT_FORMAT_PREFERENCE};
use markfree_media_model::frame::{AudioSpec, VideoFrame};
use markfree_media_model::region::Region;
use markfree_render_engine::{BlurFilter, RegionBlurRenderer, Surface};

use crate::audio_relay::{AudioDecoder, AudioRelay};
use crate::event::{event_channel, EventReceiver, EventSender, PipelineEvent};
use crate::frame_driver::FrameDriver;
use crate::muxer::{CombinedStream, EncoderBackend, StreamMuxer, VideoTrack};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::source::MediaSource;

/// Start skew between playback and audio above which a warning is logged.
const START_SKEW_WARN_MS: f64 = 100.0;

/// Lifecycle of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Preparing,
    Recording,
    Finalizing,
    Completed,
    Failed,
}

/// Tunables for a processing job.
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub blur_radius: u32,
    pub blur_passes: u32,
    pub chunk_interval: Duration,
    /// Nominal frame rate of the rendered surface stream.
    pub capture_fps: u32,
    pub audio: AudioSpec,
    pub format_preference: Vec<OutputFormat>,
}

impl From<&ProcessingDefaults> for ProcessingOptions {
    fn from(defaults: &ProcessingDefaults) -> Self {
        Self {
            blur_radius: defaults.blur_radius,
            blur_passes: defaults.blur_passes,
            chunk_interval: Duration::from_millis(defaults.chunk_interval_ms),
            capture_fps: defaults.capture_fps,
            audio: AudioSpec {
                sample_rate: defaults.audio_sample_rate,
                channels: defaults.audio_channels,
            },
            format_preference: DEFAULT_FORMAT_PREFERENCE.to_vec(),
        }
    }
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self::from(&ProcessingDefaults::default())
    }
}

/// What happened during the last job, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// Every state the job entered, in order, starting with `Idle`.
    pub transitions: Vec<JobState>,
    pub format: Option<OutputFormat>,
    pub encoder_started: bool,
    pub has_audio: bool,
    pub audio_context_closed: bool,
    pub frames_drawn: u64,
    pub chunk_count: usize,
    pub failure: Option<FailureKind>,
    pub warnings: Vec<Degradation>,
}

impl JobReport {
    pub fn final_state(&self) -> JobState {
        self.transitions.last().copied().unwrap_or(JobState::Idle)
    }
}

/// Runs processing jobs one at a time.
///
/// `run` borrows the controller mutably, so a second job cannot start while
/// one is in flight.
pub struct ProcessingController {
    options: ProcessingOptions,
    decoder: Arc<dyn AudioDecoder>,
    muxer: StreamMuxer,
    renderer: RegionBlurRenderer,
    last_report: Option<JobReport>,
}

impl ProcessingController {
    pub fn new(
        options: ProcessingOptions,
        decoder: Arc<dyn AudioDecoder>,
        encoder: Box<dyn EncoderBackend>,
    ) -> Self {
        let muxer = StreamMuxer::new(encoder)
            .with_preference(options.format_preference.clone())
            .with_chunk_interval(options.chunk_interval);
        let renderer =
            RegionBlurRenderer::new(BlurFilter::new(options.blur_radius), options.blur_passes);
        Self {
            options,
            decoder,
            muxer,
            renderer,
            last_report: None,
        }
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    /// Format the next job would be encoded in.
    pub fn negotiated_format(&self) -> OutputFormat {
        self.muxer.negotiate()
    }

    pub fn last_report(&self) -> Option<&JobReport> {
        self.last_report.as_ref()
    }

    /// Process `source` from start to end, blurring `regions` on every
    /// presented frame.
    ///
    /// `progress` receives monotonic values in `[0, 1]` and ends at `1.0`
    /// on success.
    pub async fn run(
        &mut self,
        source: &mut dyn MediaSource,
        regions: &[Region],
        progress: Option<ProgressSink>,
    ) -> MarkfreeResult<ProcessingOutput> {
        let metadata = source.metadata();
        let (events, receiver) = event_channel();
        let mut job = ProcessingJob {
            source,
            muxer: &mut self.muxer,
            renderer: &self.renderer,
            relay: AudioRelay::new(Arc::clone(&self.decoder), self.options.audio),
            driver: FrameDriver::new(),
            surface: Surface::new(metadata.width, metadata.height),
            regions: regions.to_vec(),
            progress: ProgressTracker::new(progress, metadata.duration_secs),
            capture_fps: self.options.capture_fps,
            chunks: Vec::new(),
            transitions: vec![JobState::Idle],
            format: None,
            has_audio: false,
            warnings: Vec::new(),
            released: false,
        };

        let result = job.execute(events, receiver).await;
        job.release();

        match &result {
            Ok(output) => {
                job.transition(JobState::Completed);
                tracing::info!(
                    format = %output.format,
                    bytes = output.payload.len(),
                    chunks = output.chunk_count,
                    frames = output.frames_drawn,
                    has_audio = output.has_audio,
                    "Processing completed"
                );
            }
            Err(e) => {
                job.transition(JobState::Failed);
                tracing::error!(kind = %e.kind(), error = %e, "Processing failed");
            }
        }

        self.last_report = Some(job.report(result.as_ref().err().map(MarkfreeError::kind)));
        result
    }
}

/// Why recording ended.
enum Trigger {
    Ended,
    Failed(MarkfreeError),
}

/// State owned by one in-flight job.
struct ProcessingJob<'a> {
    source: &'a mut dyn MediaSource,
    muxer: &'a mut StreamMuxer,
    renderer: &'a RegionBlurRenderer,
    relay: AudioRelay,
    driver: FrameDriver,
    surface: Surface,
    regions: Vec<Region>,
    progress: ProgressTracker,
    capture_fps: u32,
    /// Appended only when the encoder emits a chunk.
    chunks: Vec<EncodedChunk>,
    transitions: Vec<JobState>,
    format: Option<OutputFormat>,
    has_audio: bool,
    warnings: Vec<Degradation>,
    released: bool,
}

impl ProcessingJob<'_> {
    async fn execute(
        &mut self,
        events: EventSender,
        mut receiver: EventReceiver,
    ) -> MarkfreeResult<ProcessingOutput> {
        self.transition(JobState::Preparing);

        let metadata = self.source.metadata();
        if !metadata.has_usable_duration() {
            return Err(MarkfreeError::invalid_input(format!(
                "video duration is {}, expected a finite positive number of seconds",
                metadata.duration_secs
            )));
        }
        if metadata.width == 0 || metadata.height == 0 {
            return Err(MarkfreeError::invalid_input(format!(
                "video dimensions are {}x{}",
                metadata.width, metadata.height
            )));
        }
        tracing::info!(
            duration_secs = metadata.duration_secs,
            width = metadata.width,
            height = metadata.height,
            regions = self.regions.len(),
            "Preparing job"
        );

        let relay_output = self.relay.prepare(self.source.payload()).await;
        self.has_audio = relay_output.has_audio();
        self.warnings.extend(relay_output.degradation);

        let stream = CombinedStream {
            video: VideoTrack {
                width: metadata.width,
                height: metadata.height,
                fps: self.capture_fps,
            },
            audio: relay_output.track,
        };
        let clock = RecordingClock::start();
        self.format = Some(self.muxer.start(stream, events.clone())?);

        self.source.set_muted(true);
        self.source
            .play(events)
            .await
            .map_err(|e| match e {
                MarkfreeError::Playback { .. } => e,
                other => MarkfreeError::playback(other.to_string()),
            })?;

        let playback_started_ns = clock.elapsed_ns();
        self.driver.arm(&mut *self.source);
        let audio_started = self.relay.start(&mut *self.muxer)?;
        if audio_started {
            log_start_skew(playback_started_ns, clock.elapsed_ns());
        }
        self.transition(JobState::Recording);

        let trigger = self.record(&mut receiver).await;
        self.transition(JobState::Finalizing);
        self.finalize(trigger, &mut receiver).await
    }

    async fn record(&mut self, receiver: &mut EventReceiver) -> Trigger {
        while let Some(event) = receiver.recv().await {
            match event {
                PipelineEvent::FramePresented { request, frame } => {
                    if !self.driver.accept(request) {
                        continue;
                    }
                    if let Err(e) = self.draw(&frame) {
                        return Trigger::Failed(e);
                    }
                    if let Err(e) = self.muxer.push_video(&self.surface, frame.pts) {
                        return Trigger::Failed(self.muxer.abort(e));
                    }
                    self.driver.reschedule(&mut *self.source);
                }
                PipelineEvent::TimeUpdate { position_secs } => {
                    self.progress.observe(position_secs);
                }
                PipelineEvent::Chunk(chunk) => self.chunks.push(chunk),
                PipelineEvent::SourceEnded => {
                    tracing::info!(frames = self.driver.frames_drawn(), "Source ended");
                    return Trigger::Ended;
                }
                PipelineEvent::SourceError { message } => {
                    return Trigger::Failed(MarkfreeError::playback(message));
                }
                PipelineEvent::EncoderError { message } => {
                    return Trigger::Failed(self.muxer.fail(message));
                }
                PipelineEvent::EncoderStopped => {
                    return Trigger::Failed(MarkfreeError::encoder(
                        "encoder stopped before the source ended",
                    ));
                }
            }
        }
        Trigger::Failed(MarkfreeError::playback(
            "source and encoder went away without finishing",
        ))
    }

    async fn finalize(
        &mut self,
        trigger: Trigger,
        receiver: &mut EventReceiver,
    ) -> MarkfreeResult<ProcessingOutput> {
        if let Trigger::Failed(e) = trigger {
            return Err(e);
        }

        self.driver.stop(&mut *self.source);
        let stopping = self.muxer.stop();
        self.relay.close();
        if stopping? {
            self.drain(receiver).await?;
        }

        if self.chunks.is_empty() {
            return Err(MarkfreeError::NoDataCaptured);
        }
        self.progress.complete();

        let format = self.format.unwrap_or(OutputFormat::BASELINE);
        Ok(ProcessingOutput {
            payload: concat_chunks(&self.chunks),
            format,
            chunk_count: self.chunks.len(),
            frames_drawn: self.driver.frames_drawn(),
            has_audio: self.has_audio,
            warnings: self.warnings.clone(),
        })
    }

    /// Collect trailing chunks until the encoder confirms it stopped.
    async fn drain(&mut self, receiver: &mut EventReceiver) -> MarkfreeResult<()> {
        while let Some(event) = receiver.recv().await {
            match event {
                PipelineEvent::Chunk(chunk) => self.chunks.push(chunk),
                PipelineEvent::EncoderStopped => return Ok(()),
                PipelineEvent::EncoderError { message } => {
                    return Err(MarkfreeError::encoder(message));
                }
                _ => {}
            }
        }
        tracing::warn!("Event channel closed before the encoder confirmed stop");
        Ok(())
    }

    fn draw(&mut self, frame: &VideoFrame) -> MarkfreeResult<()> {
        self.renderer
            .render(&mut self.surface, frame, &self.regions)
            .map_err(|e| match e {
                MarkfreeError::Draw { .. } => e,
                other => MarkfreeError::draw(other.to_string()),
            })
    }

    /// Stop and close everything the job holds. Runs once.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.driver.stop(&mut *self.source);
        self.source.stop();
        if let Err(e) = self.muxer.stop() {
            tracing::warn!(error = %e, "Encoder stop during teardown failed");
        }
        self.relay.close();
        tracing::debug!("Job resources released");
    }

    fn transition(&mut self, to: JobState) {
        let from = self.transitions.last().copied().unwrap_or(JobState::Idle);
        tracing::debug!(?from, ?to, "Job state change");
        self.transitions.push(to);
    }

    fn report(&self, failure: Option<FailureKind>) -> JobReport {
        JobReport {
            transitions: self.transitions.clone(),
            format: self.format,
            encoder_started: self.format.is_some(),
            has_audio: self.has_audio,
            audio_context_closed: self.relay.is_closed(),
            frames_drawn: self.driver.frames_drawn(),
            chunk_count: self.chunks.len(),
            failure,
            warnings: self.warnings.clone(),
        }
    }
}

impl Drop for ProcessingJob<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

fn log_start_skew(playback_started_ns: u64, audio_started_ns: u64) {
    let measurement = DriftMeasurement {
        reference_ns: playback_started_ns,
        measured_ns: audio_started_ns,
    };
    let drift_ms = measurement.drift_ms().abs();
    if measurement.exceeds_threshold_ms(START_SKEW_WARN_MS) {
        tracing::warn!(drift_ms, "Audio started late relative to playback");
    } else {
        tracing::debug!(drift_ms, "Audio start skew within threshold");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_defaults() {
        let options = ProcessingOptions::default();
        assert_eq!(options.blur_radius, 25);
        assert_eq!(options.blur_passes, 3);
        assert_eq!(options.chunk_interval, Duration::from_secs(1));
        assert_eq!(options.capture_fps, 30);
        assert_eq!(options.audio, AudioSpec::default());
        assert_eq!(options.format_preference, DEFAULT_FORMAT_PREFERENCE.to_vec());
    }

    #[test]
    fn empty_report_is_idle() {
        let report = JobReport {
            transitions: Vec::new(),
            format: None,
            encoder_started: false,
            has_audio: false,
            audio_context_closed: false,
            frames_drawn: 0,
            chunk_count: 0,
            failure: None,
            warnings: Vec::new(),
        };
        assert_eq!(report.final_state(), JobState::Idle);
    }
}
