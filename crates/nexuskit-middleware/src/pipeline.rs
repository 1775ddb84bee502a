//! The bidirectional middleware pipeline: an ordered chain applied
//! ascending-priority on outgoing and in reverse on incoming, snapshotted
//! at the start of every flow so concurrent `add`/`remove` never blocks or
//! corrupts an in-flight send/receive.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::MiddlewareError;

/// Which way a frame is travelling through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Metadata about the flow a middleware is processing, separate from the
/// bytes themselves so middlewares can make decisions without re-parsing
/// the frame header.
#[derive(Debug, Clone, Copy)]
pub struct FlowContext {
    pub connection_id: u64,
    pub direction: Direction,
}

impl FlowContext {
    pub fn new(connection_id: u64, direction: Direction) -> Self {
        Self {
            connection_id,
            direction,
        }
    }
}

/// What a middleware step did to the flow.
#[derive(Debug)]
pub enum MiddlewareOutcome {
    /// Pass `bytes` on to the next middleware (or the transport/caller).
    Continue(Bytes),
    /// Stop the chain immediately and use `bytes` as the final result — the
    /// cache's hit path short-circuits this way.
    ShortCircuit(Bytes),
}

/// A single step in the pipeline. Default implementations pass bytes
/// through unchanged, so a middleware that only cares about one direction
/// only needs to override that side.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> u16;

    async fn handle_outgoing(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        Ok(MiddlewareOutcome::Continue(bytes))
    }

    async fn handle_incoming(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        Ok(MiddlewareOutcome::Continue(bytes))
    }
}

/// The ordered chain of middlewares for one connection.
#[derive(Default)]
pub struct MiddlewarePipeline {
    entries: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. Ties in priority keep insertion order.
    pub fn add(&self, middleware: Arc<dyn Middleware>) {
        self.entries.write().push(middleware);
    }

    /// Remove the first middleware with a matching name. Returns `true` if
    /// one was found.
    pub fn remove(&self, name: &str) -> bool {
        let mut guard = self.entries.write();
        let before = guard.len();
        guard.retain(|m| m.name() != name);
        guard.len() != before
    }

    pub fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Stable-sort by ascending priority; a `Vec` clone snapshotted behind
    /// an `Arc` so concurrent `add`/`remove` calls never block or affect an
    /// in-flight flow.
    fn snapshot(&self) -> Arc<[Arc<dyn Middleware>]> {
        let mut entries: Vec<Arc<dyn Middleware>> = self.entries.read().clone();
        entries.sort_by_key(|m| m.priority());
        Arc::from(entries)
    }

    /// Run the outgoing direction: ascending priority order. A
    /// `ShortCircuit` from any step stops the chain and is surfaced to the
    /// caller, so a cache hit can stand in for the whole network round-trip.
    pub async fn run_outgoing(
        &self,
        mut bytes: Bytes,
        ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        for middleware in self.snapshot().iter() {
            match middleware.handle_outgoing(bytes, ctx).await? {
                MiddlewareOutcome::Continue(next) => bytes = next,
                MiddlewareOutcome::ShortCircuit(result) => {
                    return Ok(MiddlewareOutcome::ShortCircuit(result))
                }
            }
        }
        Ok(MiddlewareOutcome::Continue(bytes))
    }

    /// Run the incoming direction: exactly the reverse of the outgoing
    /// order.
    pub async fn run_incoming(
        &self,
        mut bytes: Bytes,
        ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        for middleware in self.snapshot().iter().rev() {
            match middleware.handle_incoming(bytes, ctx).await? {
                MiddlewareOutcome::Continue(next) => bytes = next,
                MiddlewareOutcome::ShortCircuit(result) => {
                    return Ok(MiddlewareOutcome::ShortCircuit(result))
                }
            }
        }
        Ok(MiddlewareOutcome::Continue(bytes))
    }
}
