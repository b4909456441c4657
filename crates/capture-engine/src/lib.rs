//! PipCast Capture Engine
//!
//! Runs real-time picture-in-picture recording sessions: live display and
//! camera sources are composited at a fixed rate, encoded to a streamable
//! WebM, and finalized into an artifact when the session stops.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  RecordingController                      │
//! │  ┌──────────┐ ┌──────────┐                               │
//! │  │ Display  │ │ Camera   │   overlay (watch)             │
//! │  │ Source   │ │ Source   │        │                      │
//! │  └─────┬────┘ └─────┬────┘        │                      │
//! │        ▼            ▼             ▼                      │
//! │  ┌───────────────────────────────────────┐               │
//! │  │ RenderLoop (Compositor @ 30 fps)      │               │
//! │  └───────────────────┬───────────────────┘               │
//! │                      ▼                                   │
//! │  ┌───────────────────────────────────────┐  chunks (mpsc)│
//! │  │ StreamEncoder (VP8 + Opus → WebM)     │──────────────►│
//! │  └───────────────────────────────────────┘               │
//! └──────────────────────────────────────────────────────────┘
//!            │ stop
//!            ▼
//!   Artifact (webm) ──► Transcoder (optional mp4) ──► OutputDelivery
//! ```

pub mod delivery;
pub mod encoder;
pub mod gst_support;
pub mod render_loop;
pub mod session;
pub mod sources;

pub use delivery::*;
pub use encoder::*;
pub use gst_support::{element_available, CAPTURE_ELEMENTS, REQUIRED_ELEMENTS};
pub use render_loop::RenderStats;
pub use session::*;
pub use sources::*;
