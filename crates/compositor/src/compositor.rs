//! Frame compositor: combines the display feed and the camera overlay.
//!
//! Composition is deterministic: the same display frame, camera frame and
//! overlay state always produce the same surface.

use pipcast_common::error::PipcastResult;
use pipcast_media_model::{FrameSource, OverlayState, VideoFrame};

use crate::layout::{fit_contain, Rect};
use crate::surface::{CompositeSurface, BLACK};

/// What a composite was built from. Used to detect ticks with nothing new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CompositionKey {
    display_sequence: Option<u64>,
    camera_sequence: Option<u64>,
    overlay: OverlayState,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The surface was redrawn from fresh inputs.
    Composed,
    /// Nothing changed since the last composite; the surface still holds it.
    Repeated,
}

/// Owns the composite surface for one recording session.
#[derive(Debug)]
pub struct Compositor {
    surface: CompositeSurface,
    last_key: Option<CompositionKey>,
    frames_composed: u64,
}

impl Compositor {
    /// Create a compositor with a black `width x height` surface.
    pub fn new(width: u32, height: u32) -> PipcastResult<Self> {
        tracing::debug!(width, height, "Allocating composite surface");
        Ok(Self {
            surface: CompositeSurface::new(width, height)?,
            last_key: None,
            frames_composed: 0,
        })
    }

    /// The current composite.
    pub fn surface(&self) -> &CompositeSurface {
        &self.surface
    }

    /// Number of times the surface has been redrawn.
    pub fn frames_composed(&self) -> u64 {
        self.frames_composed
    }

    /// Where a display frame of the given size lands on the surface.
    pub fn display_rect(&self, frame_width: u32, frame_height: u32) -> Option<Rect> {
        fit_contain(
            frame_width,
            frame_height,
            self.surface.width(),
            self.surface.height(),
        )
    }

    /// Redraw the surface unconditionally.
    ///
    /// `None` or zero-sized frames leave their region black for this tick.
    pub fn compose(
        &mut self,
        display: Option<&VideoFrame>,
        camera: Option<&VideoFrame>,
        overlay: &OverlayState,
    ) -> &CompositeSurface {
        self.surface.clear(BLACK);

        if let Some(frame) = display {
            match self.display_rect(frame.width(), frame.height()) {
                Some(rect) => self.surface.blit_scaled(frame, rect, false),
                None => tracing::trace!("Skipping zero-sized display frame"),
            }
        }

        if let Some(frame) = camera {
            if frame.is_empty() {
                tracing::trace!("Skipping zero-sized camera frame");
            } else {
                self.surface
                    .blit_scaled(frame, Rect::from(overlay.geometry), overlay.mirror);
            }
        }

        self.last_key = Some(CompositionKey {
            display_sequence: display.map(VideoFrame::sequence),
            camera_sequence: camera.map(VideoFrame::sequence),
            overlay: *overlay,
        });
        self.frames_composed += 1;
        &self.surface
    }

    /// Redraw only when a source produced a new frame or the overlay changed.
    pub fn compose_if_changed(
        &mut self,
        display: Option<&VideoFrame>,
        camera: Option<&VideoFrame>,
        overlay: &OverlayState,
    ) -> TickOutcome {
        let key = CompositionKey {
            display_sequence: display.map(VideoFrame::sequence),
            camera_sequence: camera.map(VideoFrame::sequence),
            overlay: *overlay,
        };
        if self.last_key == Some(key) {
            return TickOutcome::Repeated;
        }
        self.compose(display, camera, overlay);
        TickOutcome::Composed
    }

    /// One scheduled tick: read each source's latest frame (only when ready)
    /// and composite if anything changed.
    pub fn tick(
        &mut self,
        display: &dyn FrameSource,
        camera: &dyn FrameSource,
        overlay: &OverlayState,
    ) -> TickOutcome {
        let display_frame = ready_frame(display);
        let camera_frame = ready_frame(camera);
        self.compose_if_changed(display_frame.as_ref(), camera_frame.as_ref(), overlay)
    }
}

fn ready_frame(source: &dyn FrameSource) -> Option<VideoFrame> {
    if source.is_ready() {
        source.latest_frame()
    } else {
        None
    }
}
