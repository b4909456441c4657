//! PipCast Compositor
//!
//! Merges the live display feed and the camera feed into one surface per
//! tick. The display is fitted (letterbox/pillarbox) and centered; the camera
//! is drawn at the caller's overlay geometry, optionally mirrored.
//!
//! # Per-tick composition
//!
//! ```text
//! clear (black)
//!     │
//!     ├── display frame ── fit_contain ── scaled blit
//!     │
//!     └── camera frame ── overlay geometry ── scaled blit (mirror?)
//!                                                   │
//!                                                   ▼
//!                                          CompositeSurface (RGBA)
//! ```

pub mod compositor;
pub mod layout;
pub mod surface;

pub use compositor::*;
pub use layout::*;
pub use surface::*;
