//! Clock and timing utilities for recording sessions.
//!
//! A session is anchored to a monotonic epoch taken when it becomes active,
//! plus the wall-clock time at that moment. The monotonic side drives elapsed
//! seconds; the wall-clock side names the resulting artifact.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A recording clock that provides monotonic elapsed time relative to
/// a fixed epoch (the moment recording became active).
///
/// Uses `tokio::time::Instant` so paused-time tests advance it deterministically.
#[derive(Debug, Clone)]
pub struct SessionClock {
    /// The instant the session became active.
    epoch: Instant,

    /// Wall-clock time at epoch.
    epoch_wall: DateTime<Utc>,
}

impl SessionClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
        }
    }

    /// Time elapsed since the epoch.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Whole seconds elapsed since the epoch.
    pub fn elapsed_whole_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> DateTime<Utc> {
        self.epoch_wall
    }
}

/// Interval between frames at the given rate. A zero rate is treated as 1 fps.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / fps.max(1) as u64)
}
