//! The compositor's exclusively owned pixel buffer.

use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::{VideoFrame, BYTES_PER_PIXEL};

use crate::layout::Rect;

/// Opaque black.
pub const BLACK: [u8; 4] = [0, 0, 0, 255];

/// RGBA8 surface with a size fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl CompositeSurface {
    /// Allocate a black surface.
    pub fn new(width: u32, height: u32) -> PipcastResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipcastError::precondition(format!(
                "composite surface must be non-empty, got {width}x{height}"
            )));
        }
        let mut surface = Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
        };
        surface.clear(BLACK);
        Ok(surface)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA value at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let px = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Fill every pixel with `rgba`.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Draw `frame` scaled (nearest neighbour) to exactly `dest`, clipped to
    /// the surface. With `mirror` the frame is flipped about its vertical axis.
    ///
    /// Empty frames and empty destinations draw nothing.
    pub fn blit_scaled(&mut self, frame: &VideoFrame, dest: Rect, mirror: bool) {
        if frame.is_empty() || dest.is_empty() {
            return;
        }

        let x0 = dest.x.max(0);
        let y0 = dest.y.max(0);
        let x1 = dest.right().min(self.width as i64);
        let y1 = dest.bottom().min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let src_w = frame.width() as u64;
        let src_h = frame.height() as u64;
        let dst_w = dest.width as u64;
        let dst_h = dest.height as u64;

        // Column lookup is identical for every row, so resolve it once.
        let columns: Vec<usize> = (x0..x1)
            .map(|sx| {
                let dx = (sx - dest.x) as u64;
                let local = if mirror { dst_w - 1 - dx } else { dx };
                ((local * src_w / dst_w) as usize) * BYTES_PER_PIXEL
            })
            .collect();

        let src = frame.pixels();
        let src_stride = frame.width() as usize * BYTES_PER_PIXEL;

        for sy in y0..y1 {
            let dy = (sy - dest.y) as u64;
            let src_row = (dy * src_h / dst_h) as usize * src_stride;
            let dst_row = self.offset(x0 as u32, sy as u32);
            for (i, src_col) in columns.iter().enumerate() {
                let s = src_row + src_col;
                let d = dst_row + i * BYTES_PER_PIXEL;
                self.pixels[d..d + BYTES_PER_PIXEL].copy_from_slice(&src[s..s + BYTES_PER_PIXEL]);
            }
        }
    }

    /// Copy the current pixels into a frame with the given sequence number.
    pub fn snapshot(&self, sequence: u64) -> VideoFrame {
        // Buffer length always matches the dimensions.
        match VideoFrame::new(self.width, self.height, sequence, self.pixels.clone()) {
            Ok(frame) => frame,
            Err(_) => VideoFrame::solid(self.width, self.height, sequence, BLACK),
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone(width: u32, height: u32, left: [u8; 4], right: [u8; 4]) -> VideoFrame {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(if x < width / 2 { &left } else { &right });
            }
        }
        VideoFrame::new(width, height, 1, pixels).unwrap()
    }

    #[test]
    fn new_surface_is_black() {
        let surface = CompositeSurface::new(4, 3).unwrap();
        assert_eq!(surface.pixel(3, 2), Some(BLACK));
        assert!(CompositeSurface::new(0, 3).is_err());
    }

    #[test]
    fn blit_clips_offscreen_destination() {
        let mut surface = CompositeSurface::new(10, 10).unwrap();
        let frame = VideoFrame::solid(4, 4, 1, [255, 0, 0, 255]);
        surface.blit_scaled(&frame, Rect::new(-2, 8, 4, 4), false);

        assert_eq!(surface.pixel(0, 8), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(1, 9), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(2, 9), Some(BLACK));
        assert_eq!(surface.pixel(0, 7), Some(BLACK));
    }

    #[test]
    fn fully_offscreen_draws_nothing() {
        let mut surface = CompositeSurface::new(10, 10).unwrap();
        let frame = VideoFrame::solid(4, 4, 1, [255, 0, 0, 255]);
        surface.blit_scaled(&frame, Rect::new(20, 20, 4, 4), false);
        assert!(surface
            .pixels()
            .chunks_exact(4)
            .all(|px| px == BLACK.as_slice()));
    }

    #[test]
    fn mirror_flips_about_center() {
        let red = [255, 0, 0, 255];
        let blue = [0, 0, 255, 255];
        let frame = two_tone(8, 2, red, blue);
        let mut surface = CompositeSurface::new(8, 2).unwrap();

        surface.blit_scaled(&frame, Rect::new(0, 0, 8, 2), false);
        assert_eq!(surface.pixel(0, 0), Some(red));
        assert_eq!(surface.pixel(7, 0), Some(blue));

        surface.blit_scaled(&frame, Rect::new(0, 0, 8, 2), true);
        assert_eq!(surface.pixel(0, 0), Some(blue));
        assert_eq!(surface.pixel(7, 0), Some(red));
    }

    #[test]
    fn snapshot_copies_pixels() {
        let mut surface = CompositeSurface::new(2, 2).unwrap();
        surface.clear([1, 2, 3, 4]);
        let frame = surface.snapshot(5);
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.sequence(), 5);
    }
}
