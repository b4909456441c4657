//! Picture-in-picture overlay state.
//!
//! Geometry is expressed in composite-surface pixels. Position is signed so
//! the overlay may hang partially off the surface; the compositor clips
//! rather than clamps.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Camera overlay rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayGeometry {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

/// A 1x1 overlay at the origin.
impl Default for OverlayGeometry {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        }
    }
}

impl OverlayGeometry {
    /// Create a geometry. Width and height must be strictly positive.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Result<Self, ModelError> {
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidGeometry {
                message: format!("overlay size must be positive, got {width}x{height}"),
            });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether the surface pixel `(px, py)` falls inside the overlay.
    pub fn contains(&self, px: i64, py: i64) -> bool {
        px >= self.x as i64 && px < self.right() && py >= self.y as i64 && py < self.bottom()
    }

    /// Whether the overlay lies entirely inside a `width x height` surface.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0 && self.y >= 0 && self.right() <= width as i64 && self.bottom() <= height as i64
    }

    /// Parse `"x,y,width,height"`.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidGeometry {
            message: format!("expected x,y,width,height but got '{value}'"),
        };
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(invalid());
        };
        Self::new(
            x.parse().map_err(|_| invalid())?,
            y.parse().map_err(|_| invalid())?,
            w.parse().map_err(|_| invalid())?,
            h.parse().map_err(|_| invalid())?,
        )
    }
}

/// Everything the compositor reads about the overlay once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub geometry: OverlayGeometry,
    /// Flip the camera sub-image horizontally. Never affects the display.
    pub mirror: bool,
}

impl OverlayState {
    pub fn new(geometry: OverlayGeometry, mirror: bool) -> Self {
        Self { geometry, mirror }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn rejects_zero_size() {
        assert!(OverlayGeometry::new(0, 0, 0, 10).is_err());
        assert!(OverlayGeometry::new(0, 0, 10, 0).is_err());
    }

    #[test]
    fn allows_negative_position() {
        let geometry = OverlayGeometry::new(-20, -5, 100, 50).unwrap();
        assert!(!geometry.fits_within(1280, 720));
        assert!(geometry.contains(0, 0));
        assert!(!geometry.contains(80, 0));
    }

    #[test]
    fn parses_comma_separated() {
        let geometry = OverlayGeometry::parse("960, 500, 300,200").unwrap();
        assert_eq!(geometry, OverlayGeometry::new(960, 500, 300, 200).unwrap());
        assert!(OverlayGeometry::parse("1,2,3").is_err());
        assert!(OverlayGeometry::parse("a,2,3,4").is_err());
    }

    #[test]
    fn fits_within_is_edge_inclusive() {
        let geometry = OverlayGeometry::new(1180, 620, 100, 100).unwrap();
        assert!(geometry.fits_within(1280, 720));
        assert!(!geometry.fits_within(1279, 720));
    }

    proptest! {
        #[test]
        fn parse_accepts_any_positive_rectangle(
            x in -4000i32..4000,
            y in -4000i32..4000,
            width in 1u32..4000,
            height in 1u32..4000,
        ) {
            let parsed = OverlayGeometry::parse(&format!("{x},{y},{width},{height}")).unwrap();
            prop_assert_eq!(parsed, OverlayGeometry::new(x, y, width, height).unwrap());
            prop_assert!(parsed.contains(x as i64, y as i64));
            prop_assert!(!parsed.contains(parsed.right(), y as i64));
        }
    }
}
