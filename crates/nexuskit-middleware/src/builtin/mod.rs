pub mod cache;
pub mod compression;
pub mod interceptor;
pub mod logger;
pub mod rate_limiter;

pub use cache::{CacheMiddleware, CacheStats, EvictionPolicy, TierConfig};
pub use compression::{CompressionAlgorithm, CompressionMiddleware, CompressionProfile};
pub use interceptor::{Interceptor, InterceptorChain, ValidationInterceptor};
pub use logger::LoggingMiddleware;
pub use rate_limiter::{RateLimitConfig, RateLimiterMiddleware, RateUnit};
