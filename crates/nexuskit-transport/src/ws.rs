//! WebSocket transport, adapting `Message::Binary` frames to the
//! byte-stream `Transport` contract. Generalizes the read-only
//! `Stream<Message> -> AsyncRead` adaptation pattern to full send/recv.
//!
//! Protocols that care about the text/binary distinction (Engine.IO does:
//! packets travel as text, attachments as binary) use the inherent
//! [`WebSocketTransport::recv_message`] / [`WebSocketTransport::send_text`]
//! API instead of the byte-stream trait.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;
use url::Url;

use crate::error::TransportError;
use crate::transport::{PeerInfo, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WebSocketTransport {
    url: Url,
    stream: Option<WsStream>,
    peer: Option<PeerInfo>,
}

/// A single WebSocket message with its frame type preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            stream: None,
            peer: None,
        }
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream
            .send(Message::Binary(bytes.to_vec().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    /// Receive the next text or binary message, transparently answering
    /// protocol-level pings. Close (from either side) surfaces as
    /// [`TransportError::Closed`].
    pub async fn recv_message(&mut self) -> Result<WsPayload, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(WsPayload::Text(text.to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(WsPayload::Binary(data.to_vec())),
                Some(Ok(Message::Ping(payload))) => {
                    stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(self.url.to_string()))?
            .to_string();
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl(self.url.to_string()))?;

        let (stream, _response) = tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout)?
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        self.peer = Some(PeerInfo {
            address: host,
            port,
        });
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream
            .send(Message::Binary(bytes.to_vec().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                Some(Ok(Message::Text(text))) => {
                    warn!("received unexpected text frame on binary websocket transport");
                    return Ok(text.as_bytes().to_vec());
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        Ok(())
    }

    fn peer_info(&self) -> Option<PeerInfo> {
        self.peer.clone()
    }
}
