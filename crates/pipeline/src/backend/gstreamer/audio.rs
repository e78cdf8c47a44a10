//! In-memory audio decoding: encoded payload in, interleaved `f32` out.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::frame::{AudioBuffer, AudioSpec};

use super::{bus_error, init_gstreamer, make_element, pad_media_type, wrap_audio};
use crate::audio_relay::AudioDecoder;

/// Abort when no decoded audio arrives for this long.
const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of each block handed to the demuxer when it does not ask for one.
const READ_BLOCK: usize = 64 * 1024;

/// Decodes the first audio stream of a payload with `decodebin`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GstAudioDecoder;

impl GstAudioDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for GstAudioDecoder {
    fn decode(&self, payload: Bytes, spec: AudioSpec) -> MarkfreeResult<AudioBuffer> {
        init_gstreamer()?;
        if payload.is_empty() {
            return Err(MarkfreeError::audio_decode("payload is empty"));
        }

        let pipeline = gst::Pipeline::with_name("markfree-audio-decode");
        let appsrc = gst_app::AppSrc::builder()
            .name("payload")
            .stream_type(gst_app::AppStreamType::RandomAccess)
            .format(gst::Format::Bytes)
            .size(payload.len() as i64)
            .build();
        let decodebin = make_element("decodebin", "decode", wrap_audio)?;
        let convert = make_element("audioconvert", "convert", wrap_audio)?;
        let resample = make_element("audioresample", "resample", wrap_audio)?;
        let caps = gst::Caps::builder("audio/x-raw")
            .field("format", "F32LE")
            .field("layout", "interleaved")
            .field("rate", spec.sample_rate as i32)
            .field("channels", spec.channels as i32)
            .build();
        let appsink = gst_app::AppSink::builder()
            .name("samples")
            .caps(&caps)
            .sync(false)
            .build();

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &decodebin,
                &convert,
                &resample,
                appsink.upcast_ref(),
            ])
            .map_err(|e| MarkfreeError::audio_decode(format!("Failed to assemble decoder: {e}")))?;
        appsrc
            .link(&decodebin)
            .map_err(|e| MarkfreeError::audio_decode(format!("Failed to link payload: {e}")))?;
        gst::Element::link_many([&convert, &resample, appsink.upcast_ref()])
            .map_err(|e| MarkfreeError::audio_decode(format!("Failed to link converter: {e}")))?;

        serve_payload(&appsrc, payload);

        let convert_weak = convert.downgrade();
        decodebin.connect_pad_added(move |_, pad| {
            let is_audio = pad_media_type(pad).is_some_and(|t| t.starts_with("audio/"));
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if !is_audio || sink_pad.is_linked() {
                return;
            }
            if let Err(e) = pad.link(&sink_pad) {
                tracing::warn!(error = ?e, "Failed to link decoded audio");
            }
        });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MarkfreeError::audio_decode(format!("Failed to start decoder: {e:?}")))?;

        let result = collect_samples(&pipeline, &appsink, spec);
        if let Err(e) = pipeline.set_state(gst::State::Null) {
            tracing::warn!(error = ?e, "Failed to stop audio decoder");
        }
        let samples = result?;

        if samples.is_empty() {
            return Err(MarkfreeError::audio_decode("payload contains no audio"));
        }
        Ok(AudioBuffer::new(spec, samples))
    }
}

/// Feed `payload` to `appsrc` on demand, honouring seeks.
fn serve_payload(appsrc: &gst_app::AppSrc, payload: Bytes) {
    let position = Arc::new(Mutex::new(0usize));
    let read_position = Arc::clone(&position);
    appsrc.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |src, length| {
                let mut pos = read_position.lock().unwrap_or_else(PoisonError::into_inner);
                if *pos >= payload.len() {
                    let _ = src.end_of_stream();
                    return;
                }
                let want = match length as usize {
                    0 => READ_BLOCK,
                    n if n == u32::MAX as usize => READ_BLOCK,
                    n => n,
                };
                let end = (*pos + want).min(payload.len());
                let block = payload.slice(*pos..end);
                let mut buffer = gst::Buffer::from_slice(block);
                if let Some(buffer) = buffer.get_mut() {
                    buffer.set_offset(*pos as u64);
                }
                *pos = end;
                if let Err(e) = src.push_buffer(buffer) {
                    tracing::debug!(error = ?e, "Payload push refused");
                }
            })
            .seek_data(move |_, offset| {
                *position.lock().unwrap_or_else(PoisonError::into_inner) = offset as usize;
                true
            })
            .build(),
    );
}

/// Pull decoded samples until end of stream.
fn collect_samples(
    pipeline: &gst::Pipeline,
    appsink: &gst_app::AppSink,
    spec: AudioSpec,
) -> MarkfreeResult<Vec<f32>> {
    let mut samples = Vec::new();
    let mut last_progress = Instant::now();
    let poll = gst::ClockTime::from_mseconds(100);

    loop {
        if let Some(sample) = appsink.try_pull_sample(poll) {
            let buffer = sample
                .buffer()
                .ok_or_else(|| MarkfreeError::audio_decode("decoded sample without buffer"))?;
            let map = buffer
                .map_readable()
                .map_err(|e| MarkfreeError::audio_decode(format!("unreadable buffer: {e}")))?;
            samples.extend(
                map.as_slice()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
            last_progress = Instant::now();
            continue;
        }
        if appsink.is_eos() {
            break;
        }
        if let Some(message) = bus_error(pipeline) {
            return Err(MarkfreeError::audio_decode(message));
        }
        if last_progress.elapsed() > STALL_TIMEOUT {
            return Err(MarkfreeError::audio_decode("decoder stalled"));
        }
    }

    tracing::debug!(
        samples = samples.len(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        "Audio payload decoded"
    );
    Ok(samples)
}
