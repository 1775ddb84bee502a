//! Non-transforming structured logging middleware.

use bytes::Bytes;
use tracing::info;

use crate::error::MiddlewareError;
use crate::pipeline::{Direction, FlowContext, Middleware, MiddlewareOutcome};

/// How many leading bytes to render as a hex preview in log events.
const DEFAULT_PREVIEW_LEN: usize = 16;

pub struct LoggingMiddleware {
    name: String,
    priority: u16,
    preview_len: usize,
}

impl LoggingMiddleware {
    pub fn new(name: impl Into<String>, priority: u16) -> Self {
        Self {
            name: name.into(),
            priority,
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }

    pub fn with_preview_len(mut self, len: usize) -> Self {
        self.preview_len = len;
        self
    }

    fn log(&self, ctx: &FlowContext, bytes: &Bytes) {
        let preview_bytes = &bytes[..bytes.len().min(self.preview_len)];
        let direction = match ctx.direction {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        };
        info!(
            connection_id = ctx.connection_id,
            direction,
            size = bytes.len(),
            preview = %hex::encode(preview_bytes),
            "flow event"
        );
    }
}

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    async fn handle_outgoing(
        &self,
        bytes: Bytes,
        ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        self.log(ctx, &bytes);
        Ok(MiddlewareOutcome::Continue(bytes))
    }

    async fn handle_incoming(
        &self,
        bytes: Bytes,
        ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        self.log(ctx, &bytes);
        Ok(MiddlewareOutcome::Continue(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_passes_bytes_through_unchanged() {
        let mw = LoggingMiddleware::new("logger", 0);
        let ctx = FlowContext::new(1, Direction::Outgoing);
        let original = Bytes::from_static(b"unchanged");
        let MiddlewareOutcome::Continue(out) =
            mw.handle_outgoing(original.clone(), &ctx).await.unwrap()
        else {
            panic!("expected Continue");
        };
        assert_eq!(out, original);
    }
}
