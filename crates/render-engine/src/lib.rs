//! MarkFree Render Engine
//!
//! Per-frame drawing for the re-encoding pipeline. Each presented source
//! frame is painted onto an owned raster [`Surface`], then every region is
//! blurred in place before the surface is handed to the encoder.
//!
//! ```text
//! source frame ──► Surface::draw_frame
//!                        │
//!                        ├── region 0 ── blur × passes
//!                        ├── region 1 ── blur × passes
//!                        └── region N ── blur × passes
//!                        ▼
//!                  surface pixels ──► encoder video input
//! ```

pub mod blur;
pub mod renderer;
pub mod surface;

pub use blur::BlurFilter;
pub use renderer::RegionBlurRenderer;
pub use surface::Surface;
