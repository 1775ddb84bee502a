//! A sliding time window of success/failure outcomes, shared by the
//! heartbeat manager's adaptive interval and the reconnection controller's
//! adaptive backoff so both agree on the same success-rate-to-multiplier
//! family.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tracks timestamped outcomes over a trailing window (default 5 minutes)
/// and derives a success rate from it.
#[derive(Debug, Clone)]
pub struct SuccessRateWindow {
    window: Duration,
    events: VecDeque<(Instant, bool)>,
}

impl SuccessRateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    pub fn record(&mut self, success: bool, now: Instant) {
        self.events.push_back((now, success));
        self.evict_stale(now);
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(&(ts, _)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Success rate in `[0.0, 1.0]` over the events still inside the
    /// window. An empty window (no data yet) is treated as fully healthy,
    /// so callers start at the fastest interval/shortest backoff.
    pub fn success_rate(&mut self, now: Instant) -> f64 {
        self.evict_stale(now);
        if self.events.is_empty() {
            return 1.0;
        }
        let successes = self.events.iter().filter(|(_, ok)| *ok).count();
        successes as f64 / self.events.len() as f64
    }

    pub fn reset(&mut self) {
        self.events.clear();
    }

    /// The multiplier family behind adaptive intervals: a lower success
    /// rate never yields a smaller multiplier for the same attempt count.
    pub fn multiplier_base(success_rate: f64) -> f64 {
        if success_rate > 0.8 {
            1.5
        } else if success_rate > 0.5 {
            2.0
        } else {
            2.5
        }
    }
}
