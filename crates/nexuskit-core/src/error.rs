//! Error kinds surfaced by the connection state machine, aggregating the
//! transport, protocol and middleware layers into one public type.

use thiserror::Error;

use nexuskit_middleware::MiddlewareError;
use nexuskit_proto::ProtoError;
use nexuskit_transport::TransportError;

use crate::state::{ConnectionState, DisconnectReason};

#[derive(Debug, Error)]
pub enum NexusError {
    #[error("invalid endpoint")]
    InvalidEndpoint,

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("read/write timed out")]
    ReadWriteTimeout,

    #[error("request timed out")]
    RequestTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("disconnected: {0:?}")]
    Disconnected(DisconnectReason),

    #[error("transport error: {0}")]
    TransportError(TransportError),

    #[error("SOCKS5 negotiation failed, code 0x{0:02x}")]
    ProxyNegotiationFailed(u8),

    #[error("proxy authentication failed")]
    ProxyAuthenticationFailed,

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("certificate pinning failed")]
    CertificatePinningFailed,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("decompression failed")]
    DecompressionFailed,

    #[error("compression failed")]
    CompressionFailed,

    #[error("no protocol adapter configured")]
    NoProtocolAdapter,

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("middleware '{0}' failed: {1}")]
    MiddlewareError(String, String),

    #[error("flow rejected: {0}")]
    InterceptorRejected(String),

    #[error("rate limited")]
    RateLimited,

    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unsupported operation '{op}': {reason}")]
    UnsupportedOperation { op: String, reason: String },

    #[error("invalid packet format")]
    InvalidPacketFormat,

    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect error: {0}")]
    ConnectError(String),
}

impl From<TransportError> for NexusError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PinMismatch => NexusError::CertificatePinningFailed,
            TransportError::TlsHandshake(reason) => NexusError::TlsHandshake(reason),
            TransportError::ConnectTimeout => NexusError::ConnectTimeout,
            TransportError::ProxyNegotiationFailed(code) => {
                NexusError::ProxyNegotiationFailed(code)
            }
            TransportError::ProxyAuthFailed => NexusError::ProxyAuthenticationFailed,
            other => NexusError::TransportError(other),
        }
    }
}

impl From<ProtoError> for NexusError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::RequestTimeout => NexusError::RequestTimeout,
            ProtoError::NotConnected => NexusError::NotConnected,
            ProtoError::DecompressionFailed(_) => NexusError::DecompressionFailed,
            ProtoError::CompressionFailed(_) => NexusError::CompressionFailed,
            ProtoError::SerializationFailed(e) => NexusError::SerializationFailed(e.to_string()),
            other => NexusError::InvalidFrame(other.to_string()),
        }
    }
}

impl From<MiddlewareError> for NexusError {
    fn from(err: MiddlewareError) -> Self {
        match err {
            MiddlewareError::Failed { name, source } => {
                NexusError::MiddlewareError(name, source.to_string())
            }
            MiddlewareError::InterceptorRejected(reason) => {
                NexusError::InterceptorRejected(reason)
            }
            MiddlewareError::RateLimited => NexusError::RateLimited,
        }
    }
}

impl NexusError {
    /// Authentication failures must never trigger a reconnect attempt.
    pub fn is_reconnectable(&self) -> bool {
        !matches!(
            self,
            NexusError::AuthenticationFailed | NexusError::InvalidCredentials
        )
    }
}
