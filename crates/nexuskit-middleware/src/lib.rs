//! The bidirectional middleware pipeline for NexusKit, plus the built-in
//! middlewares (cache, compression, rate limiting, logging, interceptors).

pub mod builtin;
pub mod error;
pub mod pipeline;

pub use error::MiddlewareError;
pub use pipeline::{Direction, FlowContext, Middleware, MiddlewareOutcome, MiddlewarePipeline};
