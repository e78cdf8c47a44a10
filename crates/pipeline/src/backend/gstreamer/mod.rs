//! GStreamer-backed source, audio decoder, and encoder.

mod audio;
mod encoder;
mod source;

use std::sync::OnceLock;
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;
use markfree_common::error::{MarkfreeError, MarkfreeResult};

pub use audio::GstAudioDecoder;
pub use encoder::GstEncoderBackend;
pub use source::GstMediaSource;

/// Bound on blocking waits for state changes and EOS drains.
const STATE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn init_gstreamer() -> MarkfreeResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(MarkfreeError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether GStreamer initializes on this machine.
pub fn is_available() -> bool {
    init_gstreamer().is_ok()
}

/// Whether any of the named element factories is installed.
pub fn has_any_element(names: &[&str]) -> bool {
    names
        .iter()
        .any(|name| gst::ElementFactory::find(name).is_some())
}

/// First installed factory among `names`.
pub(crate) fn first_available(names: &[&'static str]) -> Option<&'static str> {
    names
        .iter()
        .copied()
        .find(|name| gst::ElementFactory::find(name).is_some())
}

pub(crate) fn make_element(
    factory: &str,
    name: &str,
    wrap: fn(String) -> MarkfreeError,
) -> MarkfreeResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| wrap(format!("Failed to create {factory}: {e}")))
}

/// Set a property from its string form when the element has it.
pub(crate) fn set_if_present(element: &gst::Element, property: &str, value: &str) {
    if element.find_property(property).is_some() {
        element.set_property_from_str(property, value);
    }
}

pub(crate) fn to_clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

pub(crate) fn to_duration(time: gst::ClockTime) -> Duration {
    Duration::from_nanos(time.nseconds())
}

/// Block until `pipeline` settles in `target`.
pub(crate) fn wait_for_state(
    pipeline: &gst::Pipeline,
    target: gst::State,
    wrap: fn(String) -> MarkfreeError,
) -> MarkfreeResult<()> {
    match pipeline.state(to_clock_time(STATE_TIMEOUT)) {
        (Ok(_), state, _) if state == target => Ok(()),
        (Ok(_), state, _) => Err(wrap(format!(
            "pipeline stuck in {state:?} instead of {target:?}"
        ))),
        (Err(e), _, _) => Err(wrap(format!(
            "pipeline failed to reach {target:?}: {e:?}{}",
            bus_error(pipeline)
                .map(|m| format!(" ({m})"))
                .unwrap_or_default()
        ))),
    }
}

/// Pop the first pending error message off the bus, if any.
pub(crate) fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(e) => Some(e.error().to_string()),
        _ => None,
    }
}

/// Media type name of a pad's current caps, e.g. `video/x-raw`.
pub(crate) fn pad_media_type(pad: &gst::Pad) -> Option<String> {
    let caps = pad.current_caps().or_else(|| Some(pad.query_caps(None)))?;
    caps.structure(0).map(|s| s.name().to_string())
}

fn wrap_encoder(message: String) -> MarkfreeError {
    MarkfreeError::encoder(message)
}

fn wrap_playback(message: String) -> MarkfreeError {
    MarkfreeError::playback(message)
}

fn wrap_audio(message: String) -> MarkfreeError {
    MarkfreeError::audio_decode(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_conversions_round_trip() {
        let d = Duration::from_millis(1234);
        assert_eq!(to_duration(to_clock_time(d)), d);
    }
}
