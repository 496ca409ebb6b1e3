//! Sliding-window call budget for a single remote host

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Fixed per-host budget: at most `max_calls` within any `window`
#[derive(Debug, Clone, Copy)]
pub struct HostLimit {
    pub max_calls: u32,
    pub window: Duration,
}

/// Recorded call timestamps for one host, bounded by the allowed call count.
///
/// Sliding-window admission avoids the burst-at-boundary doubling that fixed
/// buckets allow: timestamps older than the window are evicted before every
/// admission check.
#[derive(Debug)]
pub struct RateWindow {
    max_calls: u32,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(limit: HostLimit) -> Self {
        RateWindow {
            max_calls: limit.max_calls,
            window: limit.window,
            timestamps: VecDeque::with_capacity(limit.max_calls as usize),
        }
    }

    /// Admit a call at `now`, recording it, or refuse with the duration after
    /// which a retry can succeed.
    pub fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if (self.timestamps.len() as u32) < self.max_calls {
            self.timestamps.push_back(now);
            return Ok(());
        }

        // A zero-call budget refuses with the full window
        match self.timestamps.front() {
            Some(&oldest) => Err(self.window - now.duration_since(oldest)),
            None => Err(self.window),
        }
    }
}
