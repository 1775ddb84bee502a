use nexuskit_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketIoError {
    #[error("invalid packet format: {0}")]
    InvalidPacketFormat(String),

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect error: {0}")]
    ConnectError(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("ack timed out")]
    AckTimeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for SocketIoError {
    fn from(err: serde_json::Error) -> Self {
        SocketIoError::Serialization(err.to_string())
    }
}
