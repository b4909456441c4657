//! Contract for live frame sources (display and camera).
//!
//! Acquisition lives outside the pipeline. Whatever produces frames only
//! needs to expose readiness and its most recent frame.

use crate::frame::VideoFrame;

/// Which feed a source handle represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Display,
    Camera,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Display => "display",
            SourceKind::Camera => "camera",
        }
    }
}

/// A live video feed consumed (never owned) by the compositor.
pub trait FrameSource: Send + Sync {
    /// Which feed this is.
    fn kind(&self) -> SourceKind;

    /// Whether the source has produced at least one frame and is still live.
    fn is_ready(&self) -> bool;

    /// The most recent frame, if any.
    fn latest_frame(&self) -> Option<VideoFrame>;

    /// The last device/capture error, surfaced as an advisory.
    fn last_error(&self) -> Option<String> {
        None
    }
}
