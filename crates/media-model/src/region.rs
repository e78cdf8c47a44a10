//! Blur regions and the built-in region presets.
//!
//! Regions are immutable pixel rectangles in source-frame coordinates.
//! Nothing here checks that a region lies inside the frame; the renderer
//! clips each rectangle against the surface it draws on.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An axis-aligned pixel rectangle to be blurred on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// Left edge in pixels. May be negative.
    pub x: i32,
    /// Top edge in pixels. May be negative.
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// The part of a [`Region`] that falls inside a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClippedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the pixel `(px, py)` lies inside this region.
    pub fn contains(&self, px: i64, py: i64) -> bool {
        px >= self.x as i64 && px < self.right() && py >= self.y as i64 && py < self.bottom()
    }

    /// Intersect with a `surface_width` x `surface_height` surface.
    ///
    /// Returns `None` when nothing of the region is visible.
    pub fn clip(&self, surface_width: u32, surface_height: u32) -> Option<ClippedRect> {
        let left = (self.x as i64).max(0);
        let top = (self.y as i64).max(0);
        let right = self.right().min(surface_width as i64);
        let bottom = self.bottom().min(surface_height as i64);

        if right <= left || bottom <= top {
            return None;
        }

        Some(ClippedRect {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// Error parsing a region from its `x,y,width,height` text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid region '{input}': expected x,y,width,height")]
pub struct ParseRegionError {
    input: String,
}

impl FromStr for Region {
    type Err = ParseRegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRegionError {
            input: s.to_string(),
        };
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(err());
        };
        Ok(Region {
            x: x.parse().map_err(|_| err())?,
            y: y.parse().map_err(|_| err())?,
            width: w.parse().map_err(|_| err())?,
            height: h.parse().map_err(|_| err())?,
        })
    }
}

/// Source orientation, used by callers to pick a region preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// Square frames count as landscape.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width >= height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

/// Region sets for each orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPresets {
    /// Regions for landscape sources (reference resolution 1280x720).
    #[serde(default = "default_landscape_regions")]
    pub landscape: Vec<Region>,

    /// Regions for portrait sources (reference resolution 720x1280).
    #[serde(default = "default_portrait_regions")]
    pub portrait: Vec<Region>,
}

impl Default for RegionPresets {
    fn default() -> Self {
        Self {
            landscape: default_landscape_regions(),
            portrait: default_portrait_regions(),
        }
    }
}

impl RegionPresets {
    pub fn for_orientation(&self, orientation: Orientation) -> &[Region] {
        match orientation {
            Orientation::Landscape => &self.landscape,
            Orientation::Portrait => &self.portrait,
        }
    }

    pub fn for_dimensions(&self, width: u32, height: u32) -> &[Region] {
        self.for_orientation(Orientation::from_dimensions(width, height))
    }
}

fn default_landscape_regions() -> Vec<Region> {
    vec![
        Region::new(45, 50, 230, 100),
        Region::new(1025, 300, 230, 100),
        Region::new(45, 580, 230, 100),
    ]
}

fn default_portrait_regions() -> Vec<Region> {
    vec![
        Region::new(23, 61, 175, 80),
        Region::new(552, 592, 175, 80),
        Region::new(23, 1031, 175, 80),
    ]
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn clip_inside_surface_is_identity() {
        let region = Region::new(45, 50, 230, 100);
        assert_eq!(
            region.clip(1280, 720),
            Some(ClippedRect {
                x: 45,
                y: 50,
                width: 230,
                height: 100
            })
        );
    }

    #[test]
    fn clip_trims_negative_origin_and_overflow() {
        let region = Region::new(-10, 700, 50, 100);
        assert_eq!(
            region.clip(1280, 720),
            Some(ClippedRect {
                x: 0,
                y: 700,
                width: 40,
                height: 20
            })
        );
    }

    #[test]
    fn clip_outside_surface_is_none() {
        assert_eq!(Region::new(2000, 0, 10, 10).clip(1280, 720), None);
        assert_eq!(Region::new(10, 10, 0, 10).clip(1280, 720), None);
    }

    #[test]
    fn parse_region_text() {
        assert_eq!(
            "45, 50,230,100".parse::<Region>().unwrap(),
            Region::new(45, 50, 230, 100)
        );
        assert!("1,2,3".parse::<Region>().is_err());
        assert!("a,b,c,d".parse::<Region>().is_err());
    }

    #[test]
    fn presets_follow_orientation() {
        let presets = RegionPresets::default();
        assert_eq!(presets.for_dimensions(1280, 720)[1], Region::new(1025, 300, 230, 100));
        assert_eq!(presets.for_dimensions(720, 1280)[2], Region::new(23, 1031, 175, 80));
        assert_eq!(Orientation::from_dimensions(800, 800), Orientation::Landscape);
    }

    #[test]
    fn region_json_shape() {
        let region: Region =
            serde_json::from_str(r#"{"x":23,"y":61,"width":175,"height":80}"#).unwrap();
        assert_eq!(region, Region::new(23, 61, 175, 80));
    }

    proptest! {
        #[test]
        fn clipped_rect_stays_within_surface(
            x in -2000i32..2000,
            y in -2000i32..2000,
            w in 0u32..3000,
            h in 0u32..3000,
            sw in 1u32..2000,
            sh in 1u32..2000,
        ) {
            if let Some(rect) = Region::new(x, y, w, h).clip(sw, sh) {
                prop_assert!(rect.width > 0 && rect.height > 0);
                prop_assert!(rect.x + rect.width <= sw);
                prop_assert!(rect.y + rect.height <= sh);
                prop_assert!(Region::new(x, y, w, h).contains(rect.x as i64, rect.y as i64));
            }
        }
    }
}
