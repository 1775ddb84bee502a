use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProtoError {
    #[error("invalid frame: bad tag")]
    BadTag,
    #[error("invalid frame: unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("buffer too short")]
    TooShort,
    #[error("compression failed: {0}")]
    CompressionFailed(String),
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("request timeout")]
    RequestTimeout,
    #[error("not connected")]
    NotConnected,
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        ProtoError::SerializationFailed(err.to_string())
    }
}
