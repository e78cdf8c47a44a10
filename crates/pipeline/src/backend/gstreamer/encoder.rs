//! Container encoding: RGBA frames and `f32` audio in, chunked MP4/WebM out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::chunk::EncodedChunk;
use markfree_media_model::format::{Container, OutputFormat};
use markfree_media_model::frame::{AudioBuffer, AudioSpec};

use super::{
    has_any_element, first_available, init_gstreamer, make_element, set_if_present,
    to_clock_time, wrap_encoder, STATE_TIMEOUT,
};
use crate::event::{emit, EventSender, PipelineEvent};
use crate::muxer::{EncoderBackend, EncoderSession};

const H264_ENCODERS: &[&str] = &["x264enc", "openh264enc"];
const AAC_ENCODERS: &[&str] = &["fdkaacenc", "avenc_aac", "voaacenc"];
const WEBM_AUDIO_ENCODERS: &[&str] = &["opusenc", "vorbisenc"];

/// Audio frames per pushed buffer.
const AUDIO_BLOCK_FRAMES: usize = 1024;

/// Collects muxer output and cuts it into chunks on a wall-clock cadence.
#[derive(Debug)]
struct ChunkAccumulator {
    interval: Duration,
    pending: Vec<u8>,
    sequence: u64,
    last_flush: Instant,
}

impl ChunkAccumulator {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            pending: Vec::new(),
            sequence: 0,
            last_flush: now,
        }
    }

    fn push(&mut self, data: &[u8], now: Instant) -> Option<EncodedChunk> {
        self.pending.extend_from_slice(data);
        if now.duration_since(self.last_flush) >= self.interval {
            self.last_flush = now;
            return self.flush();
        }
        None
    }

    fn flush(&mut self) -> Option<EncodedChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk = EncodedChunk::new(self.sequence, Bytes::from(std::mem::take(&mut self.pending)));
        self.sequence += 1;
        Some(chunk)
    }
}

/// How the encoder pipeline drained.
enum DrainSignal {
    Eos,
    Error,
}

struct ActiveEncoder {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: Option<gst_app::AppSrc>,
    output: Arc<Mutex<ChunkAccumulator>>,
    events: EventSender,
    frame_duration: gst::ClockTime,
    drained: mpsc::Receiver<DrainSignal>,
    bus_stop: Arc<AtomicBool>,
    bus_thread: Option<JoinHandle<()>>,
}

/// Encodes through `appsrc ! <encoder> ! <mux> ! appsink`.
#[derive(Default)]
pub struct GstEncoderBackend {
    active: Option<ActiveEncoder>,
}

impl GstEncoderBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EncoderBackend for GstEncoderBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        if init_gstreamer().is_err() {
            return false;
        }
        if mime_type == OutputFormat::Mp4AvcAac.mime_type() {
            has_any_element(H264_ENCODERS)
                && has_any_element(AAC_ENCODERS)
                && has_any_element(&["h264parse"])
                && has_any_element(&["mp4mux"])
        } else if mime_type == OutputFormat::Mp4.mime_type() {
            has_any_element(H264_ENCODERS)
                && has_any_element(&["h264parse"])
                && has_any_element(&["mp4mux"])
        } else if mime_type == OutputFormat::Webm.mime_type() {
            has_any_element(&["vp8enc"]) && has_any_element(&["webmmux"])
        } else {
            false
        }
    }

    fn start(&mut self, session: &EncoderSession, events: EventSender) -> MarkfreeResult<()> {
        if self.active.is_some() {
            return Err(MarkfreeError::encoder("encoder session already running"));
        }
        init_gstreamer()?;

        let pipeline = gst::Pipeline::with_name("markfree-encode");
        let mux = build_muxer(session)?;
        let sink = gst_app::AppSink::builder()
            .name("container")
            .sync(false)
            .build();
        pipeline
            .add_many([&mux, sink.upcast_ref()])
            .map_err(|e| MarkfreeError::encoder(format!("Failed to add muxer: {e}")))?;
        mux.link(&sink)
            .map_err(|e| MarkfreeError::encoder(format!("Failed to link muxer: {e}")))?;

        let video_src = build_video_branch(&pipeline, &mux, session)?;
        let audio_src = match session.stream.audio {
            Some(track) => build_audio_branch(&pipeline, &mux, session.format, track.spec)?,
            None => None,
        };

        let output = Arc::new(Mutex::new(ChunkAccumulator::new(
            session.chunk_interval,
            Instant::now(),
        )));
        let sink_output = Arc::clone(&output);
        let sink_events = events.clone();
        sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let chunk = sink_output
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(map.as_slice(), Instant::now());
                    if let Some(chunk) = chunk {
                        emit(&sink_events, PipelineEvent::Chunk(chunk));
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MarkfreeError::encoder(format!("Failed to start encoder: {e:?}")))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| MarkfreeError::encoder("encoder pipeline has no bus"))?;
        let (drain_tx, drained) = mpsc::channel();
        let bus_stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&bus_stop);
        let bus_events = events.clone();
        let bus_thread = std::thread::spawn(move || {
            watch_bus(bus, thread_stop, bus_events, drain_tx);
        });

        let fps = session.stream.video.fps.max(1) as u64;
        tracing::info!(
            format = %session.format,
            has_audio = audio_src.is_some(),
            "GStreamer encoder started"
        );
        self.active = Some(ActiveEncoder {
            pipeline,
            video_src,
            audio_src,
            output,
            events,
            frame_duration: gst::ClockTime::from_nseconds(1_000_000_000 / fps),
            drained,
            bus_stop,
            bus_thread: Some(bus_thread),
        });
        Ok(())
    }

    fn push_video(&mut self, pixels: &[u8], pts: Duration) -> MarkfreeResult<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| MarkfreeError::encoder("encoder is not running"))?;
        let mut buffer = gst::Buffer::from_mut_slice(pixels.to_vec());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(to_clock_time(pts));
            buffer.set_duration(active.frame_duration);
        }
        active
            .video_src
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| MarkfreeError::encoder(format!("video push failed: {e:?}")))
    }

    fn push_audio(&mut self, audio: &AudioBuffer, offset: Duration) -> MarkfreeResult<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| MarkfreeError::encoder("encoder is not running"))?;
        let Some(audio_src) = active.audio_src.as_ref() else {
            tracing::debug!("Encoder has no audio track; dropping relayed audio");
            return Ok(());
        };

        let channels = audio.spec.channels.max(1) as usize;
        let rate = audio.spec.sample_rate.max(1) as u64;
        for (index, block) in audio
            .samples
            .chunks(AUDIO_BLOCK_FRAMES * channels)
            .enumerate()
        {
            let first_frame = (index * AUDIO_BLOCK_FRAMES) as u64;
            let frames = (block.len() / channels) as u64;
            let bytes: Vec<u8> = block.iter().flat_map(|s| s.to_le_bytes()).collect();
            let mut buffer = gst::Buffer::from_mut_slice(bytes);
            if let Some(buffer) = buffer.get_mut() {
                buffer.set_pts(
                    to_clock_time(offset)
                        + gst::ClockTime::from_nseconds(first_frame * 1_000_000_000 / rate),
                );
                buffer.set_duration(gst::ClockTime::from_nseconds(frames * 1_000_000_000 / rate));
            }
            audio_src
                .push_buffer(buffer)
                .map_err(|e| MarkfreeError::encoder(format!("audio push failed: {e:?}")))?;
        }
        let _ = audio_src.end_of_stream();
        Ok(())
    }

    fn stop(&mut self) -> MarkfreeResult<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };

        let _ = active.video_src.end_of_stream();
        if let Some(audio_src) = &active.audio_src {
            let _ = audio_src.end_of_stream();
        }

        match active.drained.recv_timeout(STATE_TIMEOUT) {
            Ok(DrainSignal::Eos) => tracing::debug!("EOS received; encoder drained"),
            Ok(DrainSignal::Error) => tracing::warn!("Encoder errored while draining"),
            Err(_) => tracing::warn!("EOS drain timed out after 10s"),
        }

        active.bus_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = active.bus_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Encoder bus thread panicked");
            }
        }

        let state_result = active.pipeline.set_state(gst::State::Null);

        let tail = active
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush();
        if let Some(chunk) = tail {
            emit(&active.events, PipelineEvent::Chunk(chunk));
        }
        emit(&active.events, PipelineEvent::EncoderStopped);

        state_result
            .map(|_| ())
            .map_err(|e| MarkfreeError::encoder(format!("Failed to stop encoder: {e:?}")))
    }
}

impl Drop for GstEncoderBackend {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.bus_stop.store(true, Ordering::SeqCst);
            let _ = active.pipeline.set_state(gst::State::Null);
        }
    }
}

fn watch_bus(
    bus: gst::Bus,
    stop: Arc<AtomicBool>,
    events: EventSender,
    drained: mpsc::Sender<DrainSignal>,
) {
    let poll = gst::ClockTime::from_mseconds(100);
    while !stop.load(Ordering::SeqCst) {
        let Some(msg) = bus.timed_pop(poll) else {
            continue;
        };
        match msg.view() {
            gst::MessageView::Eos(_) => {
                let _ = drained.send(DrainSignal::Eos);
                break;
            }
            gst::MessageView::Error(e) => {
                emit(
                    &events,
                    PipelineEvent::EncoderError {
                        message: e.error().to_string(),
                    },
                );
                let _ = drained.send(DrainSignal::Error);
                break;
            }
            _ => {}
        }
    }
}

fn build_muxer(session: &EncoderSession) -> MarkfreeResult<gst::Element> {
    let mux = match session.format.container() {
        Container::Mp4 => {
            let mux = make_element("mp4mux", "mux", wrap_encoder)?;
            let fragment_ms = session.chunk_interval.as_millis().max(1).to_string();
            set_if_present(&mux, "fragment-duration", &fragment_ms);
            set_if_present(&mux, "streamable", "true");
            mux
        }
        Container::Webm => {
            let mux = make_element("webmmux", "mux", wrap_encoder)?;
            set_if_present(&mux, "streamable", "true");
            mux
        }
    };
    Ok(mux)
}

fn build_video_branch(
    pipeline: &gst::Pipeline,
    mux: &gst::Element,
    session: &EncoderSession,
) -> MarkfreeResult<gst_app::AppSrc> {
    let video = session.stream.video;
    let caps = gst::Caps::builder("video/x-raw")
        .field("format", "RGBA")
        .field("width", video.width as i32)
        .field("height", video.height as i32)
        .field("framerate", gst::Fraction::new(video.fps.max(1) as i32, 1))
        .build();
    let src = gst_app::AppSrc::builder()
        .name("video")
        .caps(&caps)
        .format(gst::Format::Time)
        .build();

    let convert = make_element("videoconvert", "video-convert", wrap_encoder)?;
    let queue = make_element("queue", "video-queue", wrap_encoder)?;
    let mut chain = vec![src.clone().upcast::<gst::Element>(), convert];

    match session.format.container() {
        Container::Mp4 => {
            let factory = first_available(H264_ENCODERS)
                .ok_or_else(|| MarkfreeError::encoder("no H.264 encoder installed"))?;
            let encoder = make_element(factory, "video-encoder", wrap_encoder)?;
            set_if_present(&encoder, "tune", "zerolatency");
            set_if_present(&encoder, "speed-preset", "veryfast");
            set_if_present(&encoder, "key-int-max", &(video.fps.max(1) * 2).to_string());
            chain.push(encoder);
            if session.format == OutputFormat::Mp4AvcAac {
                let profile = make_element("capsfilter", "video-profile", wrap_encoder)?;
                profile.set_property(
                    "caps",
                    gst::Caps::builder("video/x-h264")
                        .field("profile", "constrained-baseline")
                        .build(),
                );
                chain.push(profile);
            }
            chain.push(make_element("h264parse", "video-parse", wrap_encoder)?);
        }
        Container::Webm => {
            let encoder = make_element("vp8enc", "video-encoder", wrap_encoder)?;
            set_if_present(&encoder, "deadline", "1");
            set_if_present(&encoder, "keyframe-max-dist", &(video.fps.max(1) * 2).to_string());
            chain.push(encoder);
        }
    }
    chain.push(queue);

    pipeline
        .add_many(chain.iter())
        .map_err(|e| MarkfreeError::encoder(format!("Failed to add video branch: {e}")))?;
    gst::Element::link_many(chain.iter())
        .map_err(|e| MarkfreeError::encoder(format!("Failed to link video branch: {e}")))?;
    if let Some(last) = chain.last() {
        last.link(mux)
            .map_err(|e| MarkfreeError::encoder(format!("Failed to link video to muxer: {e}")))?;
    }
    Ok(src)
}

fn build_audio_branch(
    pipeline: &gst::Pipeline,
    mux: &gst::Element,
    format: OutputFormat,
    spec: AudioSpec,
) -> MarkfreeResult<Option<gst_app::AppSrc>> {
    let candidates = match format.container() {
        Container::Mp4 => AAC_ENCODERS,
        Container::Webm => WEBM_AUDIO_ENCODERS,
    };
    let Some(factory) = first_available(candidates) else {
        tracing::warn!(%format, "No audio encoder installed; output will be silent");
        return Ok(None);
    };

    let caps = gst::Caps::builder("audio/x-raw")
        .field("format", "F32LE")
        .field("layout", "interleaved")
        .field("rate", spec.sample_rate as i32)
        .field("channels", spec.channels as i32)
        .build();
    let src = gst_app::AppSrc::builder()
        .name("audio")
        .caps(&caps)
        .format(gst::Format::Time)
        .max_bytes(0)
        .build();

    let mut chain = vec![
        src.clone().upcast::<gst::Element>(),
        make_element("audioconvert", "audio-convert", wrap_encoder)?,
        make_element("audioresample", "audio-resample", wrap_encoder)?,
        make_element(factory, "audio-encoder", wrap_encoder)?,
    ];
    if format.container() == Container::Mp4 && has_any_element(&["aacparse"]) {
        chain.push(make_element("aacparse", "audio-parse", wrap_encoder)?);
    }
    chain.push(make_element("queue", "audio-queue", wrap_encoder)?);

    pipeline
        .add_many(chain.iter())
        .map_err(|e| MarkfreeError::encoder(format!("Failed to add audio branch: {e}")))?;
    gst::Element::link_many(chain.iter())
        .map_err(|e| MarkfreeError::encoder(format!("Failed to link audio branch: {e}")))?;
    if let Some(last) = chain.last() {
        last.link(mux)
            .map_err(|e| MarkfreeError::encoder(format!("Failed to link audio to muxer: {e}")))?;
    }
    Ok(Some(src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_waits_for_interval() {
        let start = Instant::now();
        let mut acc = ChunkAccumulator::new(Duration::from_secs(1), start);
        assert!(acc.push(b"head", start).is_none());
        assert!(acc
            .push(b"more", start + Duration::from_millis(500))
            .is_none());

        let chunk = acc.push(b"!", start + Duration::from_secs(1)).unwrap();
        assert_eq!(chunk.sequence, 0);
        assert_eq!(&chunk.data[..], b"headmore!");
    }

    #[test]
    fn accumulator_flushes_tail_once() {
        let start = Instant::now();
        let mut acc = ChunkAccumulator::new(Duration::from_secs(1), start);
        acc.push(b"tail", start);
        let chunk = acc.flush().unwrap();
        assert_eq!(chunk.sequence, 0);
        assert!(acc.flush().is_none());

        let next = acc.push(b"x", start + Duration::from_secs(2)).unwrap();
        assert_eq!(next.sequence, 1);
    }
}
