//! Per-direction token-bucket rate limiting: one bucket per direction per
//! connection, metered in requests or bytes.
//!
//! Unlike a connection-admission limiter that rejects outright, this one
//! suspends the flow until tokens refill. Cancellation needs no extra
//! machinery: it's an ordinary `.await` the caller's task can drop.

use std::num::NonZeroU32;
use std::time::Duration;

use bytes::Bytes;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use tracing::trace;

use crate::error::MiddlewareError;
use crate::pipeline::{FlowContext, Middleware, MiddlewareOutcome};

type Bucket = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware<<DefaultClock as Clock>::Instant>>;

#[derive(Debug, Clone, Copy)]
pub enum RateUnit {
    Requests,
    Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub unit: RateUnit,
    pub per_second: u32,
    pub burst: Option<u32>,
}

impl RateLimitConfig {
    fn quota(&self) -> Quota {
        let rate = NonZeroU32::new(self.per_second.max(1)).unwrap();
        let burst = self
            .burst
            .and_then(NonZeroU32::new)
            .unwrap_or(rate);
        Quota::per_second(rate).allow_burst(burst)
    }
}

pub struct RateLimiterMiddleware {
    name: String,
    priority: u16,
    outgoing: Bucket,
    outgoing_unit: RateUnit,
    incoming: Bucket,
    incoming_unit: RateUnit,
}

impl RateLimiterMiddleware {
    pub fn new(
        name: impl Into<String>,
        priority: u16,
        outgoing: RateLimitConfig,
        incoming: RateLimitConfig,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            outgoing: GovernorLimiter::direct(outgoing.quota()),
            outgoing_unit: outgoing.unit,
            incoming: GovernorLimiter::direct(incoming.quota()),
            incoming_unit: incoming.unit,
        }
    }

    async fn wait_for_tokens(bucket: &Bucket, unit: RateUnit, bytes_len: usize) {
        let n = match unit {
            RateUnit::Requests => 1u32,
            RateUnit::Bytes => bytes_len.clamp(1, u32::MAX as usize) as u32,
        };
        let Some(n) = NonZeroU32::new(n) else {
            return;
        };

        loop {
            match bucket.check_n(n) {
                Ok(Ok(())) => return,
                Ok(Err(not_until)) => {
                    let wait = not_until.wait_time_from(DefaultClock::default().now());
                    if wait > Duration::ZERO {
                        trace!(?wait, "rate limiter suspending flow");
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(_insufficient_capacity) => {
                    // Requested more than the bucket can ever hold; let it
                    // through rather than hang forever.
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimiterMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    async fn handle_outgoing(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        Self::wait_for_tokens(&self.outgoing, self.outgoing_unit, bytes.len()).await;
        Ok(MiddlewareOutcome::Continue(bytes))
    }

    async fn handle_incoming(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        Self::wait_for_tokens(&self.incoming, self.incoming_unit, bytes.len()).await;
        Ok(MiddlewareOutcome::Continue(bytes))
    }
}
