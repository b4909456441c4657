//! PipCast Common Utilities
//!
//! Shared infrastructure for all PipCast crates:
//! - Error types and result aliases
//! - Session clock and frame timing
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
