//! Wall-clock timestamps that never go backwards.
//!
//! Timestamps are a wall-clock anchor plus the monotonic time elapsed since
//! the anchor was taken, so consecutive chunk windows stay ordered even when
//! the system clock is adjusted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_anchor: SystemTime,
    mono_anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            wall_anchor: SystemTime::now(),
            mono_anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> SystemTime {
        self.wall_anchor + self.mono_anchor.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds since the Unix epoch as a float.
pub fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}
