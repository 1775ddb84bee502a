//! The `Transport` abstraction: a single byte-stream contract that
//! `TcpTransport`, `WebSocketTransport`, `Socks5Transport` and `TlsTransport`
//! all implement, letting the connection state machine stay ignorant of
//! which concrete stack it is driving.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Identifies the peer a transport is connected to, for logging/diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: String,
    pub port: u16,
}

/// A connectable, send/recv, closable byte-stream.
///
/// `recv()` never returns `Ok(vec![])` to mean "closed" — EOF is surfaced as
/// [`TransportError::Closed`], so callers never need to special-case an
/// empty frame.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError>;
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
    fn peer_info(&self) -> Option<PeerInfo>;
}
