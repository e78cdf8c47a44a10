//! Concrete media source, audio decoder, and encoder implementations.
//!
//! - [`gstreamer`]: file playback, audio decoding, and container encoding
//!   through GStreamer.
//! - [`synthetic`]: deterministic in-process stand-ins used by tests and the
//!   `check --synthetic` self-test.

pub mod gstreamer;
pub mod synthetic;
