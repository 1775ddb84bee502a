use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("transport closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("certificate pin mismatch")]
    PinMismatch,

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("SOCKS5 proxy negotiation failed, REP=0x{0:02x}")]
    ProxyNegotiationFailed(u8),

    #[error("SOCKS5 authentication failed")]
    ProxyAuthFailed,

    #[error("SOCKS5 reply malformed: {0}")]
    ProxyProtocol(&'static str),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
