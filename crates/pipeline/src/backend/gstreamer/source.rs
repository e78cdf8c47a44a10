//! File playback through `decodebin`, presenting RGBA frames on request.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use markfree_common::clock::RateController;
use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::frame::VideoFrame;

use super::{
    init_gstreamer, make_element, pad_media_type, to_duration, wait_for_state, wrap_playback,
};
use crate::event::{emit, EventSender, FrameRequestId, PipelineEvent};
use crate::source::{MediaSource, SourceMetadata};

/// State shared with the appsink streaming thread.
struct Presenter {
    pending: Mutex<Option<FrameRequestId>>,
    events: Mutex<Option<EventSender>>,
    updates: Mutex<RateController>,
}

impl Presenter {
    fn events(&self) -> Option<EventSender> {
        lock(&self.events).clone()
    }

    fn present(&self, sample: &gst::Sample) -> Result<gst::FlowSuccess, gst::FlowError> {
        let Some(events) = self.events() else {
            return Ok(gst::FlowSuccess::Ok);
        };
        let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
        let pts = buffer.pts().map(to_duration).unwrap_or_default();

        if lock(&self.updates).should_tick(pts.as_nanos() as u64) {
            emit(
                &events,
                PipelineEvent::TimeUpdate {
                    position_secs: pts.as_secs_f64(),
                },
            );
        }

        let Some(request) = lock(&self.pending).take() else {
            return Ok(gst::FlowSuccess::Ok);
        };

        let caps = sample.caps().ok_or(gst::FlowError::Error)?;
        let (width, height) = caps_dimensions(caps).ok_or(gst::FlowError::NotNegotiated)?;
        let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
        let frame = VideoFrame::new(width, height, pts, Bytes::copy_from_slice(map.as_slice()));
        emit(&events, PipelineEvent::FramePresented { request, frame });
        Ok(gst::FlowSuccess::Ok)
    }
}

/// A video file decoded and played in real time by GStreamer.
///
/// The pipeline is prerolled on [`GstMediaSource::open`] so metadata is
/// available before playback. Audio is decoded into a muted branch.
pub struct GstMediaSource {
    payload: Bytes,
    metadata: SourceMetadata,
    pipeline: gst::Pipeline,
    volume: Arc<Mutex<Option<gst::Element>>>,
    muted: Arc<AtomicBool>,
    presenter: Arc<Presenter>,
    next_request: AtomicU64,
    bus_stop: Arc<AtomicBool>,
    bus_thread: Option<JoinHandle<()>>,
}

impl GstMediaSource {
    pub fn open(path: impl AsRef<Path>, time_update_interval: Duration) -> MarkfreeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let payload = Bytes::from(std::fs::read(&path).map_err(|e| {
            MarkfreeError::invalid_input(format!("cannot read {}: {e}", path.display()))
        })?);
        init_gstreamer()?;

        let pipeline = gst::Pipeline::with_name("markfree-source");
        let filesrc = make_element("filesrc", "file", wrap_playback)?;
        filesrc.set_property("location", path.to_string_lossy().to_string());
        let decodebin = make_element("decodebin", "decode", wrap_playback)?;
        let convert = make_element("videoconvert", "video-convert", wrap_playback)?;
        let rgba = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .build();
        let appsink = gst_app::AppSink::builder()
            .name("frames")
            .caps(&rgba)
            .sync(true)
            .max_buffers(2)
            .build();

        pipeline
            .add_many([&filesrc, &decodebin, &convert, appsink.upcast_ref()])
            .map_err(|e| MarkfreeError::playback(format!("Failed to assemble pipeline: {e}")))?;
        filesrc
            .link(&decodebin)
            .map_err(|e| MarkfreeError::playback(format!("Failed to link source: {e}")))?;
        convert
            .link(&appsink)
            .map_err(|e| MarkfreeError::playback(format!("Failed to link video sink: {e}")))?;

        let volume: Arc<Mutex<Option<gst::Element>>> = Arc::new(Mutex::new(None));
        let muted = Arc::new(AtomicBool::new(false));
        connect_decoded_pads(&pipeline, &decodebin, &convert, &volume, &muted);

        let presenter = Arc::new(Presenter {
            pending: Mutex::new(None),
            events: Mutex::new(None),
            updates: Mutex::new(RateController::with_interval(time_update_interval)),
        });
        let callback_presenter = Arc::clone(&presenter);
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    callback_presenter.present(&sample)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| MarkfreeError::playback(format!("Failed to preroll: {e:?}")))?;
        if let Err(e) = wait_for_state(&pipeline, gst::State::Paused, wrap_playback) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(e);
        }

        let duration_secs = pipeline
            .query_duration::<gst::ClockTime>()
            .map(|d| to_duration(d).as_secs_f64())
            .unwrap_or(f64::NAN);
        let (width, height, frame_rate) = appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .and_then(|caps| {
                let (w, h) = caps_dimensions(&caps)?;
                Some((w, h, caps_frame_rate(&caps)))
            })
            .ok_or_else(|| {
                let _ = pipeline.set_state(gst::State::Null);
                MarkfreeError::invalid_input("source has no decodable video stream")
            })?;

        let metadata = SourceMetadata {
            duration_secs,
            width,
            height,
            frame_rate,
        };
        tracing::info!(
            path = %path.display(),
            duration_secs,
            width,
            height,
            ?frame_rate,
            "Source opened"
        );

        Ok(Self {
            payload,
            metadata,
            pipeline,
            volume,
            muted,
            presenter,
            next_request: AtomicU64::new(0),
            bus_stop: Arc::new(AtomicBool::new(false)),
            bus_thread: None,
        })
    }

    fn join_bus_thread(&mut self) {
        self.bus_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.bus_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Source bus thread panicked");
            }
        }
    }
}

#[async_trait]
impl MediaSource for GstMediaSource {
    fn metadata(&self) -> SourceMetadata {
        self.metadata
    }

    fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if let Some(volume) = lock(&self.volume).as_ref() {
            volume.set_property("mute", muted);
        }
    }

    async fn play(&mut self, events: EventSender) -> MarkfreeResult<()> {
        self.join_bus_thread();
        *lock(&self.presenter.pending) = None;
        *lock(&self.presenter.events) = Some(events.clone());

        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::ClockTime::ZERO,
            )
            .map_err(|e| MarkfreeError::playback(format!("Failed to rewind: {e}")))?;
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MarkfreeError::playback(format!("Failed to start playback: {e:?}")))?;

        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            wait_for_state(&pipeline, gst::State::Playing, wrap_playback)
        })
        .await
        .map_err(|e| MarkfreeError::playback(format!("playback wait task: {e}")))??;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| MarkfreeError::playback("pipeline has no bus"))?;
        self.bus_stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.bus_stop);
        self.bus_thread = Some(std::thread::spawn(move || {
            watch_bus(bus, stop, events)
        }));

        tracing::debug!("Playback started");
        Ok(())
    }

    fn request_frame(&mut self) -> FrameRequestId {
        let request = FrameRequestId(self.next_request.fetch_add(1, Ordering::SeqCst) + 1);
        *lock(&self.presenter.pending) = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequestId) {
        let mut pending = lock(&self.presenter.pending);
        if *pending == Some(request) {
            *pending = None;
        }
    }

    fn stop(&mut self) {
        *lock(&self.presenter.events) = None;
        self.join_bus_thread();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(error = ?e, "Failed to stop source pipeline");
        }
    }
}

impl Drop for GstMediaSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Relay end-of-stream and errors until told to stop.
fn watch_bus(bus: gst::Bus, stop: Arc<AtomicBool>, events: EventSender) {
    let poll = gst::ClockTime::from_mseconds(100);
    while !stop.load(Ordering::SeqCst) {
        let Some(msg) = bus.timed_pop(poll) else {
            continue;
        };
        match msg.view() {
            gst::MessageView::Eos(_) => {
                tracing::debug!("Source reached end of stream");
                emit(&events, PipelineEvent::SourceEnded);
                break;
            }
            gst::MessageView::Error(e) => {
                let message = match e.debug() {
                    Some(debug) => format!("{} ({debug})", e.error()),
                    None => e.error().to_string(),
                };
                emit(&events, PipelineEvent::SourceError { message });
                break;
            }
            _ => {}
        }
    }
}

/// Link video pads to the RGBA branch and give audio pads a muted sink.
fn connect_decoded_pads(
    pipeline: &gst::Pipeline,
    decodebin: &gst::Element,
    video_convert: &gst::Element,
    volume_slot: &Arc<Mutex<Option<gst::Element>>>,
    muted: &Arc<AtomicBool>,
) {
    let pipeline_weak = pipeline.downgrade();
    let convert_weak = video_convert.downgrade();
    let volume_slot = Arc::clone(volume_slot);
    let muted = Arc::clone(muted);

    decodebin.connect_pad_added(move |_, pad| {
        let Some(media_type) = pad_media_type(pad) else {
            return;
        };
        if media_type.starts_with("video/") {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                tracing::debug!("Ignoring additional video stream");
                return;
            }
            if let Err(e) = pad.link(&sink_pad) {
                tracing::warn!(error = ?e, "Failed to link decoded video");
            }
        } else if media_type.starts_with("audio/") {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            match attach_audio_branch(&pipeline, pad, muted.load(Ordering::SeqCst)) {
                Ok(volume) => *lock(&volume_slot) = Some(volume),
                Err(e) => tracing::warn!(error = %e, "Failed to attach audio branch"),
            }
        }
    });
}

fn attach_audio_branch(
    pipeline: &gst::Pipeline,
    pad: &gst::Pad,
    muted: bool,
) -> MarkfreeResult<gst::Element> {
    let queue = make_element("queue", "audio-queue", wrap_playback)?;
    let convert = make_element("audioconvert", "audio-convert", wrap_playback)?;
    let volume = make_element("volume", "audio-volume", wrap_playback)?;
    let sink = make_element("fakesink", "audio-sink", wrap_playback)?;
    volume.set_property("mute", muted);
    sink.set_property("sync", true);

    let elements = [&queue, &convert, &volume, &sink];
    pipeline
        .add_many(elements)
        .map_err(|e| MarkfreeError::playback(format!("Failed to add audio branch: {e}")))?;
    gst::Element::link_many(elements)
        .map_err(|e| MarkfreeError::playback(format!("Failed to link audio branch: {e}")))?;
    for element in elements {
        element
            .sync_state_with_parent()
            .map_err(|e| MarkfreeError::playback(format!("Audio branch state: {e}")))?;
    }
    let sink_pad = queue
        .static_pad("sink")
        .ok_or_else(|| MarkfreeError::playback("audio queue has no sink pad"))?;
    pad.link(&sink_pad)
        .map_err(|e| MarkfreeError::playback(format!("Failed to link decoded audio: {e:?}")))?;
    Ok(volume)
}

fn caps_dimensions(caps: &gst::CapsRef) -> Option<(u32, u32)> {
    let s = caps.structure(0)?;
    let width = s.get::<i32>("width").ok()?;
    let height = s.get::<i32>("height").ok()?;
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

fn caps_frame_rate(caps: &gst::CapsRef) -> Option<f64> {
    let rate = caps.structure(0)?.get::<gst::Fraction>("framerate").ok()?;
    (rate.denom() != 0 && rate.numer() > 0).then(|| rate.numer() as f64 / rate.denom() as f64)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

