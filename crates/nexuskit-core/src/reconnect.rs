//! Reconnection control: pluggable backoff strategies deciding whether
//! and when to retry after a non-client-initiated disconnect.

use std::time::{Duration, Instant};

use rand::Rng as _;

use crate::error::NexusError;
use crate::window::SuccessRateWindow;

/// Strategy contract. `next_delay` returning `None` terminates the
/// reconnect loop; `should_reconnect` gates it first.
pub trait ReconnectStrategy: Send + Sync {
    fn next_delay(&mut self, attempt: u32, last_error: &NexusError) -> Option<Duration>;
    fn should_reconnect(&self, err: &NexusError) -> bool;
    fn reset(&mut self);
}

fn default_should_reconnect(err: &NexusError) -> bool {
    err.is_reconnectable()
}

/// Constant interval, capped by `max_attempts`.
pub struct FixedStrategy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedStrategy {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl ReconnectStrategy for FixedStrategy {
    fn next_delay(&mut self, attempt: u32, _last_error: &NexusError) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.interval),
        }
    }

    fn should_reconnect(&self, err: &NexusError) -> bool {
        default_should_reconnect(err)
    }

    fn reset(&mut self) {}
}

/// `delay(n) = min(initial * multiplier^n, max_delay)`, optionally
/// perturbed by ±25% uniform jitter, capped by `max_attempts`.
pub struct ExponentialBackoffStrategy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    pub max_attempts: Option<u32>,
}

impl ExponentialBackoffStrategy {
    pub fn new(initial: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max_delay,
            jitter: true,
            max_attempts: None,
        }
    }

    /// The un-jittered delay for `attempt`, exposed so tests can check the
    /// jittered value stays within ±25% of it.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

impl ReconnectStrategy for ExponentialBackoffStrategy {
    fn next_delay(&mut self, attempt: u32, _last_error: &NexusError) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let base = self.base_delay(attempt);
        if !self.jitter {
            return Some(base);
        }
        let base_secs = base.as_secs_f64();
        let noise = rand::rng().random_range(-0.25..=0.25);
        let jittered = (base_secs * (1.0 + noise)).max(0.0);
        Some(Duration::from_secs_f64(jittered))
    }

    fn should_reconnect(&self, err: &NexusError) -> bool {
        default_should_reconnect(err)
    }

    fn reset(&mut self) {}
}

/// Picks a multiplier family from a trailing 5-minute success/failure
/// window, reusing [`SuccessRateWindow`] so the monotonicity invariant
/// matches the heartbeat manager's adaptive interval.
pub struct AdaptiveStrategy {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
    window: SuccessRateWindow,
}

impl AdaptiveStrategy {
    pub fn new(initial: Duration, max_delay: Duration) -> Self {
        Self {
            initial,
            max_delay,
            max_attempts: None,
            window: SuccessRateWindow::new(Duration::from_secs(300)),
        }
    }

    pub fn record_outcome(&mut self, success: bool) {
        self.window.record(success, Instant::now());
    }
}

impl ReconnectStrategy for AdaptiveStrategy {
    fn next_delay(&mut self, attempt: u32, _last_error: &NexusError) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let rate = self.window.success_rate(Instant::now());
        let multiplier = SuccessRateWindow::multiplier_base(rate);
        let scaled = self.initial.as_secs_f64() * multiplier.powi(attempt as i32);
        Some(Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64())))
    }

    fn should_reconnect(&self, err: &NexusError) -> bool {
        default_should_reconnect(err)
    }

    fn reset(&mut self) {
        self.window.reset();
    }
}

type DelayFn = Box<dyn FnMut(u32, &NexusError) -> Option<Duration> + Send + Sync>;
type ShouldFn = Box<dyn Fn(&NexusError) -> bool + Send + Sync>;

/// User-supplied closure pair.
pub struct CustomStrategy {
    next_delay: DelayFn,
    should_reconnect: ShouldFn,
}

impl CustomStrategy {
    pub fn new(next_delay: DelayFn, should_reconnect: ShouldFn) -> Self {
        Self {
            next_delay,
            should_reconnect,
        }
    }
}

impl ReconnectStrategy for CustomStrategy {
    fn next_delay(&mut self, attempt: u32, last_error: &NexusError) -> Option<Duration> {
        (self.next_delay)(attempt, last_error)
    }

    fn should_reconnect(&self, err: &NexusError) -> bool {
        (self.should_reconnect)(err)
    }

    fn reset(&mut self) {}
}
