//! Layout arithmetic for placing frames on the surface.

use pipcast_media_model::OverlayGeometry;

/// A destination rectangle in surface pixels. Position may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<OverlayGeometry> for Rect {
    fn from(geometry: OverlayGeometry) -> Self {
        Self::new(
            geometry.x() as i64,
            geometry.y() as i64,
            geometry.width(),
            geometry.height(),
        )
    }
}

/// Fit a `src_w x src_h` frame inside a `dst_w x dst_h` surface with a uniform
/// scale, centered on the axis that does not fill.
///
/// Returns `None` when any dimension is zero.
pub fn fit_contain(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Option<Rect> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return None;
    }

    let (sw, sh, dw, dh) = (src_w as u64, src_h as u64, dst_w as u64, dst_h as u64);

    // Cross-multiplied aspect comparison keeps this exact in integers.
    let (width, height) = if sw * dh >= sh * dw {
        // Source is relatively wider: full width, bars top and bottom.
        let h = ((sh * dw + sw / 2) / sw).clamp(1, dh);
        (dw, h)
    } else {
        // Source is relatively taller: full height, bars left and right.
        let w = ((sw * dh + sh / 2) / sh).clamp(1, dw);
        (w, dh)
    };

    Some(Rect::new(
        ((dw - width) / 2) as i64,
        ((dh - height) / 2) as i64,
        width as u32,
        height as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_aspect_fills_surface() {
        assert_eq!(
            fit_contain(1920, 1080, 1280, 720),
            Some(Rect::new(0, 0, 1280, 720))
        );
    }

    #[test]
    fn four_by_three_is_pillarboxed() {
        assert_eq!(
            fit_contain(1024, 768, 1280, 720),
            Some(Rect::new(160, 0, 960, 720))
        );
    }

    #[test]
    fn ultrawide_is_letterboxed() {
        assert_eq!(
            fit_contain(3440, 1440, 1280, 720),
            Some(Rect::new(0, 92, 1280, 536))
        );
    }

    #[test]
    fn zero_dimension_is_skipped() {
        assert_eq!(fit_contain(1920, 0, 1280, 720), None);
        assert_eq!(fit_contain(0, 1080, 1280, 720), None);
        assert_eq!(fit_contain(1920, 1080, 0, 720), None);
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let rect = fit_contain(100_000, 1, 640, 480).unwrap();
        assert_eq!(rect.width, 640);
        assert_eq!(rect.height, 1);
    }
}
