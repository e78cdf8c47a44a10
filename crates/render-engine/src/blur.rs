//! Separable box blur over a packed RGBA rectangle.
//!
//! Samples past the rectangle edge replicate the edge pixel, so a blur
//! never reads or writes outside the rectangle it was given.

use markfree_media_model::frame::RGBA_BYTES_PER_PIXEL;

/// Box blur with a square kernel of side `2 * radius + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlurFilter {
    radius: u32,
}

impl BlurFilter {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Blur a packed `width` x `height` RGBA buffer in place.
    pub fn apply(&self, pixels: &mut [u8], width: u32, height: u32) {
        let width = width as usize;
        let height = height as usize;
        if self.radius == 0 || width == 0 || height == 0 {
            return;
        }
        debug_assert_eq!(pixels.len(), width * height * RGBA_BYTES_PER_PIXEL);

        let radius = self.radius as usize;
        let mut line = vec![[0u8; 4]; width.max(height)];
        let mut blurred = vec![[0u8; 4]; width.max(height)];

        for row in 0..height {
            for (x, px) in line.iter_mut().take(width).enumerate() {
                *px = read_px(pixels, row * width + x);
            }
            blur_line(&line[..width], &mut blurred[..width], radius);
            for (x, px) in blurred.iter().take(width).enumerate() {
                write_px(pixels, row * width + x, *px);
            }
        }

        for col in 0..width {
            for (y, px) in line.iter_mut().take(height).enumerate() {
                *px = read_px(pixels, y * width + col);
            }
            blur_line(&line[..height], &mut blurred[..height], radius);
            for (y, px) in blurred.iter().take(height).enumerate() {
                write_px(pixels, y * width + col, *px);
            }
        }
    }
}

impl Default for BlurFilter {
    fn default() -> Self {
        Self::new(25)
    }
}

/// Sliding-window mean over `src` with edge replication.
fn blur_line(src: &[[u8; 4]], dst: &mut [[u8; 4]], radius: usize) {
    let n = src.len();
    let last = n - 1;
    let r = radius as u64;
    let window = 2 * r + 1;
    let mut sum = [0u64; 4];

    // Window centred on index 0 covers -radius..=radius: the left edge
    // repeats `radius` times, the right edge fills whatever runs past `last`.
    let inside = radius.min(last);
    let overhang = r - inside as u64;
    for c in 0..4 {
        sum[c] = r * u64::from(src[0][c]) + overhang * u64::from(src[last][c]);
    }
    for px in &src[..=inside] {
        accumulate(&mut sum, px, true);
    }

    for x in 0..n {
        for c in 0..4 {
            dst[x][c] = ((sum[c] + window / 2) / window) as u8;
        }
        let leaving = x.saturating_sub(radius);
        let entering = x.saturating_add(radius).saturating_add(1).min(last);
        accumulate(&mut sum, &src[leaving], false);
        accumulate(&mut sum, &src[entering], true);
    }
}

fn accumulate(sum: &mut [u64; 4], px: &[u8; 4], add: bool) {
    for c in 0..4 {
        if add {
            sum[c] += u64::from(px[c]);
        } else {
            sum[c] -= u64::from(px[c]);
        }
    }
}

fn read_px(pixels: &[u8], index: usize) -> [u8; 4] {
    let o = index * RGBA_BYTES_PER_PIXEL;
    [pixels[o], pixels[o + 1], pixels[o + 2], pixels[o + 3]]
}

fn write_px(pixels: &mut [u8], index: usize, px: [u8; 4]) {
    let o = index * RGBA_BYTES_PER_PIXEL;
    pixels[o..o + RGBA_BYTES_PER_PIXEL].copy_from_slice(&px);
}
