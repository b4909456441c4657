//! PipCast Media Model
//!
//! Defines the data contracts shared by the recording pipeline:
//! - **Frames:** Tightly packed RGBA frames with a freshness sequence
//! - **Sources:** The readiness/frame contract live feeds expose
//! - **Overlay:** Picture-in-picture geometry and mirroring state
//! - **Artifacts:** Finished recordings, container formats, and filenames
//!
//! Overlay coordinates are surface pixels, not normalized values: the
//! composite surface size is fixed for the whole session.

pub mod artifact;
pub mod frame;
pub mod overlay;
pub mod source;

pub use artifact::*;
pub use frame::*;
pub use overlay::*;
pub use source::*;

/// Errors produced when constructing model values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid overlay geometry: {message}")]
    InvalidGeometry { message: String },

    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },

    #[error("Unknown delivery format '{value}' (expected native or alternate)")]
    UnknownDeliveryFormat { value: String },
}
