//! MarkFree Pipeline
//!
//! Re-encodes a playing video source with fixed regions blurred on every
//! frame, relaying the source's decoded audio into the same output.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  ProcessingController                     │
//! │                                                          │
//! │  MediaSource ──frame/time/end/error──┐                   │
//! │                                      ▼                   │
//! │  StreamMuxer ──chunk/error/stop──► PipelineEvent channel │
//! │       ▲                              │                   │
//! │       │                              ▼                   │
//! │       │      FrameDriver ──► RegionBlurRenderer          │
//! │       │             (per presented frame)                │
//! │       ├──── surface pixels ◄─────────┘                   │
//! │       └──── AudioRelay (decoded once, started once)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one cooperative task: the controller is the only
//! consumer of [`event::PipelineEvent`]s, so the surface and the chunk list
//! are never touched concurrently.

pub mod audio_relay;
pub mod backend;
pub mod controller;
pub mod event;
pub mod frame_driver;
pub mod muxer;
pub mod progress;
pub mod source;

pub use audio_relay::{AudioDecoder, AudioRelay};
pub use controller::*;
pub use event::*;
pub use frame_driver::FrameDriver;
pub use muxer::*;
pub use progress::*;
pub use source::*;
