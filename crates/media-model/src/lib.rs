//! MarkFree Media Model
//!
//! Defines the data contracts passed between pipeline stages:
//! - **Regions:** Pixel rectangles blurred on every frame
//! - **Frames & audio:** Decoded video frames and relayed audio buffers
//! - **Formats:** Output container/codec choices and their negotiation
//! - **Output:** Encoded chunks and the assembled job result
//!
//! Region coordinates are integer pixels in source-frame space.

pub mod chunk;
pub mod format;
pub mod frame;
pub mod region;

pub use chunk::*;
pub use format::*;
pub use frame::*;
pub use region::*;
