//! Owned RGBA raster surface.
//!
//! The surface is the drawing target of one job. It is mutated only while
//! a frame is being rendered and read by the encoder right after.

use markfree_common::error::{MarkfreeError, MarkfreeResult};
use markfree_media_model::frame::{VideoFrame, RGBA_BYTES_PER_PIXEL};
use markfree_media_model::region::ClippedRect;

/// A packed RGBA pixel buffer with fixed dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// Create a transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; VideoFrame::expected_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA value at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let px = &self.pixels[offset..offset + RGBA_BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Paint a full frame onto the surface unmodified.
    pub fn draw_frame(&mut self, frame: &VideoFrame) -> MarkfreeResult<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(MarkfreeError::draw(format!(
                "frame is {}x{} but the surface is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if !frame.is_well_formed() {
            return Err(MarkfreeError::draw(format!(
                "frame carries {} bytes, expected {}",
                frame.data.len(),
                VideoFrame::expected_len(frame.width, frame.height)
            )));
        }
        self.pixels.copy_from_slice(&frame.data);
        Ok(())
    }

    /// Copy the pixels of `rect` into a packed buffer.
    pub fn read_rect(&self, rect: ClippedRect) -> Vec<u8> {
        let row_len = rect.width as usize * RGBA_BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(row_len * rect.height as usize);
        for row in rect.y..rect.y + rect.height {
            let start = self.offset(rect.x, row);
            out.extend_from_slice(&self.pixels[start..start + row_len]);
        }
        out
    }

    /// Write a packed buffer produced by [`Surface::read_rect`] back at `rect`.
    pub fn write_rect(&mut self, rect: ClippedRect, data: &[u8]) {
        let row_len = rect.width as usize * RGBA_BYTES_PER_PIXEL;
        for (i, row) in (rect.y..rect.y + rect.height).enumerate() {
            let start = self.offset(rect.x, row);
            self.pixels[start..start + row_len]
                .copy_from_slice(&data[i * row_len..(i + 1) * row_len]);
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * RGBA_BYTES_PER_PIXEL
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use markfree_common::error::FailureKind;

    use super::*;

    fn gradient_frame(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::with_capacity(VideoFrame::expected_len(width, height));
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, (x + y) as u8, 255]);
            }
        }
        VideoFrame::new(width, height, Duration::ZERO, data)
    }

    #[test]
    fn draw_frame_copies_pixels() {
        let mut surface = Surface::new(8, 4);
        surface.draw_frame(&gradient_frame(8, 4)).unwrap();
        assert_eq!(surface.pixel(3, 2), Some([3, 2, 5, 255]));
        assert_eq!(surface.pixel(8, 0), None);
    }

    #[test]
    fn mismatched_frame_is_a_draw_failure() {
        let mut surface = Surface::new(8, 4);
        let err = surface.draw_frame(&gradient_frame(4, 4)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::DrawFailure);
    }

    #[test]
    fn rect_round_trip_is_lossless() {
        let mut surface = Surface::new(8, 4);
        surface.draw_frame(&gradient_frame(8, 4)).unwrap();
        let before = surface.clone();
        let rect = ClippedRect {
            x: 2,
            y: 1,
            width: 3,
            height: 2,
        };
        let data = surface.read_rect(rect);
        assert_eq!(data.len(), 3 * 2 * 4);
        surface.write_rect(rect, &data);
        assert_eq!(surface, before);
    }
}
