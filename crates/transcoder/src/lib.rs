//! PipCast Transcoder
//!
//! Converts a finished WebM recording into MP4 when the user asked for the
//! alternate delivery format.
//!
//! ## Architecture
//!
//! ```text
//! Artifact (webm) ──► Transcoder ──► TranscodeEngine (ffmpeg) ──► Artifact (mp4)
//!                        │
//!                        ├── engine lifecycle (watch)
//!                        └── progress 0..=100 (watch + callback)
//! ```
//!
//! One engine is shared per process. It is initialized lazily and accepts a
//! single job at a time.

pub mod engine;
pub mod ffmpeg;
pub mod transcoder;

pub use engine::{EngineState, TranscodeEngine};
pub use ffmpeg::FfmpegEngine;
pub use transcoder::{ProgressCallback, TranscodeJob, TranscodeOutcome, Transcoder};
