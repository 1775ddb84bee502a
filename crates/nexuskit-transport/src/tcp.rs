//! Client-side TCP transport: a dialed `TcpStream` behind the byte-stream
//! contract.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{PeerInfo, Transport};

const READ_CHUNK: usize = 64 * 1024;

/// A plain TCP connection to `host:port`.
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    peer: Option<PeerInfo>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            peer: None,
        }
    }

    /// Wrap an already-connected stream (used by `Socks5Transport` after
    /// tunnelling through the proxy).
    pub fn from_connected(stream: TcpStream, peer: PeerInfo) -> Self {
        Self {
            host: peer.address.clone(),
            port: peer.port,
            stream: Some(stream),
            peer: Some(peer),
        }
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let addr = (self.host.as_str(), self.port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(TransportError::ConnectFailed)?;
        let _ = stream.set_nodelay(true);
        debug!(host = %self.host, port = self.port, "tcp transport connected");
        self.peer = Some(PeerInfo {
            address: self.host.clone(),
            port: self.port,
        });
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = vec![0u8; READ_CHUNK];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn peer_info(&self) -> Option<PeerInfo> {
        self.peer.clone()
    }
}
