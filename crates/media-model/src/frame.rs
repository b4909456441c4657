//! Raw video frames exchanged between sources and the compositor.

use std::sync::Arc;

use crate::ModelError;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A single RGBA8 frame, rows tightly packed (stride = `width * 4`).
///
/// Pixel storage is shared, so cloning a frame out of a source handle is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    /// Increments every time the producing source emits a new frame.
    sequence: u64,
    pixels: Arc<[u8]>,
}

impl VideoFrame {
    /// Wrap RGBA bytes. The buffer must hold exactly `width * height * 4` bytes.
    pub fn new(
        width: u32,
        height: u32,
        sequence: u64,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self, ModelError> {
        let pixels = pixels.into();
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(ModelError::InvalidFrame {
                message: format!(
                    "{width}x{height} frame needs {expected} bytes, got {}",
                    pixels.len()
                ),
            });
        }
        Ok(Self {
            width,
            height,
            sequence,
            pixels,
        })
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, sequence: u64, rgba: [u8; 4]) -> Self {
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL)
            .collect();
        Self {
            width,
            height,
            sequence,
            pixels: pixels.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The pixel storage itself, for consumers that keep it past the frame.
    pub fn shared_pixels(&self) -> Arc<[u8]> {
        Arc::clone(&self.pixels)
    }

    /// Whether either dimension is zero (nothing drawable).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGBA value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = VideoFrame::new(2, 2, 0, vec![0u8; 15]).unwrap_err();
        assert!(err.to_string().contains("needs 16 bytes"));
    }

    #[test]
    fn solid_frame_reads_back() {
        let frame = VideoFrame::solid(3, 2, 7, [10, 20, 30, 255]);
        assert_eq!(frame.pixel(2, 1), Some([10, 20, 30, 255]));
        assert_eq!(frame.pixel(3, 0), None);
        assert_eq!(frame.sequence(), 7);
    }

    #[test]
    fn zero_height_frame_is_empty() {
        let frame = VideoFrame::new(640, 0, 0, Vec::new()).unwrap();
        assert!(frame.is_empty());
    }
}
