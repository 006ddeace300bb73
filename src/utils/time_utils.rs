use std::time::{Duration, Instant};

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Nanosecond bag timestamp as `seconds.nanoseconds`.
pub fn format_ns(timestamp: u64) -> String {
    format!("{}.{:09}", timestamp / 1_000_000_000, timestamp % 1_000_000_000)
}

/// Header stamps are signed seconds; stamps before the epoch clamp to zero.
pub fn stamp_to_ns(sec: i32, nanosec: u32) -> u64 {
    if sec < 0 {
        return 0;
    }
    sec as u64 * 1_000_000_000 + nanosec as u64
}
