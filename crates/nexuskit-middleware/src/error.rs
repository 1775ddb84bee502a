use thiserror::Error;

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("middleware '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("flow rejected: {0}")]
    InterceptorRejected(String),

    #[error("rate limited")]
    RateLimited,
}

impl MiddlewareError {
    pub fn failed(name: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed {
            name: name.into(),
            source: Box::new(source),
        }
    }
}
