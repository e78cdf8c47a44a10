//! Region-localized blur renderer.

use markfree_common::error::MarkfreeResult;
use markfree_media_model::frame::VideoFrame;
use markfree_media_model::region::Region;

use crate::blur::BlurFilter;
use crate::surface::Surface;

/// Default number of times the blur is compounded on each region.
pub const DEFAULT_BLUR_PASSES: u32 = 3;

/// Draws a frame and blurs a list of regions on it.
///
/// Each pass reads the region back from the surface, so passes compound
/// and overlapping regions accumulate blur in list order.
#[derive(Debug, Clone)]
pub struct RegionBlurRenderer {
    filter: BlurFilter,
    blur_passes: u32,
}

impl RegionBlurRenderer {
    pub fn new(filter: BlurFilter, blur_passes: u32) -> Self {
        Self {
            filter,
            blur_passes,
        }
    }

    /// Radius 25 px, three passes.
    pub fn with_defaults() -> Self {
        Self::new(BlurFilter::default(), DEFAULT_BLUR_PASSES)
    }

    /// Paint `frame` onto `surface`, then blur each region in order.
    ///
    /// Any error leaves the surface in an unspecified state; callers treat
    /// it as fatal for the job.
    pub fn render(
        &self,
        surface: &mut Surface,
        frame: &VideoFrame,
        regions: &[Region],
    ) -> MarkfreeResult<()> {
        surface.draw_frame(frame)?;
        for region in regions {
            self.blur_region(surface, region);
        }
        Ok(())
    }

    /// Blur one region of the surface `blur_passes` times.
    ///
    /// Parts of the region outside the surface are ignored.
    pub fn blur_region(&self, surface: &mut Surface, region: &Region) {
        let Some(rect) = region.clip(surface.width(), surface.height()) else {
            tracing::trace!(?region, "Region outside surface; skipped");
            return;
        };

        for _ in 0..self.blur_passes {
            let mut sub_image = surface.read_rect(rect);
            self.filter.apply(&mut sub_image, rect.width, rect.height);
            surface.write_rect(rect, &sub_image);
        }
    }
}

impl Default for RegionBlurRenderer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use markfree_common::error::FailureKind;
    use proptest::prelude::*;

    use super::*;

    fn checkerboard(width: u32, height: u32, cell: u32) -> VideoFrame {
        let mut data = Vec::with_capacity(VideoFrame::expected_len(width, height));
        for y in 0..height {
            for x in 0..width {
                let v = if ((x / cell) + (y / cell)) % 2 == 0 { 230 } else { 20 };
                data.extend_from_slice(&[v, 255 - v, v / 2, 255]);
            }
        }
        VideoFrame::new(width, height, Duration::ZERO, data)
    }

    fn abs_diff(a: &Surface, b: &Surface) -> u64 {
        a.as_bytes()
            .iter()
            .zip(b.as_bytes())
            .map(|(x, y)| (*x as i64 - *y as i64).unsigned_abs())
            .sum()
    }

    fn outside_is_untouched(surface: &Surface, frame: &VideoFrame, regions: &[Region]) -> bool {
        for y in 0..surface.height() {
            for x in 0..surface.width() {
                if regions.iter().any(|r| r.contains(x as i64, y as i64)) {
                    continue;
                }
                let o = ((y * surface.width() + x) * 4) as usize;
                if surface.pixel(x, y).unwrap()[..] != frame.data[o..o + 4] {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn render_blurs_inside_and_preserves_outside() {
        let frame = checkerboard(64, 48, 4);
        let regions = [Region::new(8, 8, 20, 12), Region::new(40, 30, 16, 10)];
        let renderer = RegionBlurRenderer::new(BlurFilter::new(3), 3);
        let mut surface = Surface::new(64, 48);
        renderer.render(&mut surface, &frame, &regions).unwrap();

        assert!(outside_is_untouched(&surface, &frame, &regions));

        let mut plain = Surface::new(64, 48);
        plain.draw_frame(&frame).unwrap();
        assert!(abs_diff(&surface, &plain) > 0);
    }

    #[test]
    fn zero_regions_paints_frame_verbatim() {
        let frame = checkerboard(16, 16, 2);
        let mut surface = Surface::new(16, 16);
        RegionBlurRenderer::with_defaults()
            .render(&mut surface, &frame, &[])
            .unwrap();
        assert_eq!(surface.as_bytes(), &frame.data[..]);
    }

    #[test]
    fn region_beyond_bounds_is_clipped() {
        let frame = checkerboard(32, 32, 4);
        let regions = [Region::new(-10, 20, 30, 40), Region::new(100, 100, 5, 5)];
        let mut surface = Surface::new(32, 32);
        RegionBlurRenderer::new(BlurFilter::new(2), 1)
            .render(&mut surface, &frame, &regions)
            .unwrap();
        assert!(outside_is_untouched(&surface, &frame, &regions));
    }

    #[test]
    fn wrong_frame_size_is_draw_failure() {
        let mut surface = Surface::new(32, 32);
        let err = RegionBlurRenderer::with_defaults()
            .render(&mut surface, &checkerboard(16, 16, 2), &[])
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::DrawFailure);
    }

    #[test]
    fn repeated_blur_has_diminishing_effect() {
        let frame = checkerboard(48, 48, 3);
        let region = Region::new(4, 4, 40, 40);
        let single = RegionBlurRenderer::new(BlurFilter::new(2), 1);

        let mut passes = Vec::new();
        let mut surface = Surface::new(48, 48);
        surface.draw_frame(&frame).unwrap();
        passes.push(surface.clone());
        for _ in 0..4 {
            single.blur_region(&mut surface, &region);
            passes.push(surface.clone());
        }

        let first_to_second = abs_diff(&passes[1], &passes[2]);
        let third_to_fourth = abs_diff(&passes[3], &passes[4]);
        assert!(third_to_fourth < first_to_second);
    }

    #[test]
    fn overlapping_regions_accumulate() {
        let frame = checkerboard(40, 40, 2);
        let region = Region::new(10, 10, 20, 20);
        let renderer = RegionBlurRenderer::new(BlurFilter::new(1), 1);

        let mut once = Surface::new(40, 40);
        renderer.render(&mut once, &frame, &[region]).unwrap();
        let mut twice = Surface::new(40, 40);
        renderer.render(&mut twice, &frame, &[region, region]).unwrap();

        let mut two_passes = Surface::new(40, 40);
        RegionBlurRenderer::new(BlurFilter::new(1), 2)
            .render(&mut two_passes, &frame, &[region])
            .unwrap();

        assert_ne!(once, twice);
        assert_eq!(twice, two_passes);
    }

    proptest! {
        #[test]
        fn pixels_outside_regions_never_change(
            rx in -8i32..40,
            ry in -8i32..30,
            rw in 0u32..30,
            rh in 0u32..30,
            radius in 0u32..6,
            passes in 0u32..4,
        ) {
            let frame = checkerboard(32, 24, 3);
            let regions = [Region::new(rx, ry, rw, rh)];
            let mut surface = Surface::new(32, 24);
            RegionBlurRenderer::new(BlurFilter::new(radius), passes)
                .render(&mut surface, &frame, &regions)
                .unwrap();
            prop_assert!(outside_is_untouched(&surface, &frame, &regions));
        }
    }
}
