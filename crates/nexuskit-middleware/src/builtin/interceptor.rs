//! Request/response-level sub-pipelines: an `InterceptorChain` runs
//! a list of [`Interceptor`]s against each flow's bytes and aborts with
//! `InterceptorRejected` on the first failure.

use bytes::Bytes;

use crate::error::MiddlewareError;
use crate::pipeline::{FlowContext, Middleware, MiddlewareOutcome};

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;
    fn intercept(&self, bytes: &Bytes) -> Result<(), MiddlewareError>;
}

/// Rejects flows whose byte size falls outside `[min, max]`.
pub struct ValidationInterceptor {
    name: String,
    min: usize,
    max: usize,
}

impl ValidationInterceptor {
    pub fn new(name: impl Into<String>, min: usize, max: usize) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }
}

impl Interceptor for ValidationInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn intercept(&self, bytes: &Bytes) -> Result<(), MiddlewareError> {
        if bytes.len() < self.min || bytes.len() > self.max {
            return Err(MiddlewareError::InterceptorRejected(format!(
                "{}: size {} outside [{}, {}]",
                self.name,
                bytes.len(),
                self.min,
                self.max
            )));
        }
        Ok(())
    }
}

pub struct InterceptorChain {
    name: String,
    priority: u16,
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(name: impl Into<String>, priority: u16) -> Self {
        Self {
            name: name.into(),
            priority,
            interceptors: Vec::new(),
        }
    }

    pub fn with(mut self, interceptor: Box<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

#[async_trait::async_trait]
impl Middleware for InterceptorChain {
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
        for interceptor in &self.interceptors {
            interceptor.intercept(&bytes)?;
        }
        Ok(MiddlewareOutcome::Continue(bytes))
    }

    async fn handle_incoming(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        for interceptor in &self.interceptors {
            interceptor.intercept(&bytes)?;
        }
        Ok(MiddlewareOutcome::Continue(bytes))
    }
}
