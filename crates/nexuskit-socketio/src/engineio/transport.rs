//! The Engine.IO v4 client transport: WebSocket dial, OPEN handshake,
//! ping/pong liveness, and MESSAGE delivery.
//!
//! A background task owns the WebSocket for its full lifetime, the same
//! reader-owns-the-stream shape the binary connection core uses; callers
//! talk to it through an [`EngineIoSender`] and an event receiver.

use std::time::Duration;

use nexuskit_transport::{Transport, TransportError, WebSocketTransport, WsPayload};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineIoConfig;
use crate::engineio::packet::{parse_handshake, EngineIoPacket, Handshake};
use crate::error::SocketIoError;

/// What the driver task surfaces to the layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineIoEvent {
    /// A MESSAGE packet's payload.
    Message(String),
    /// A raw binary frame (a Socket.IO attachment).
    Binary(Vec<u8>),
    /// The session ended: server CLOSE, ping timeout, or transport loss.
    Closed,
}

enum Outgoing {
    Text(String),
    Binary(Vec<u8>),
}

/// Cloneable handle for writing into the session.
#[derive(Clone)]
pub struct EngineIoSender {
    tx: mpsc::Sender<Outgoing>,
}

impl EngineIoSender {
    /// Send an application payload as a MESSAGE packet.
    pub async fn send_message(&self, data: String) -> Result<(), SocketIoError> {
        self.tx
            .send(Outgoing::Text(EngineIoPacket::Message(data).encode()))
            .await
            .map_err(|_| SocketIoError::NotConnected)
    }

    /// Send a raw binary frame (no packet framing; attachments travel bare).
    pub async fn send_binary(&self, bytes: Vec<u8>) -> Result<(), SocketIoError> {
        self.tx
            .send(Outgoing::Binary(bytes))
            .await
            .map_err(|_| SocketIoError::NotConnected)
    }
}

/// One Engine.IO session over a WebSocket.
pub struct EngineIoTransport {
    handshake: Handshake,
    sender: EngineIoSender,
    events: mpsc::Receiver<EngineIoEvent>,
    cancel: CancellationToken,
}

impl EngineIoTransport {
    /// Dial the server and complete the OPEN handshake. The first incoming
    /// text frame must be an OPEN packet carrying the session parameters.
    pub async fn connect(config: &EngineIoConfig) -> Result<EngineIoTransport, SocketIoError> {
        let url = build_url(config)?;
        let mut ws = WebSocketTransport::new(url);
        ws.connect(config.connect_timeout).await?;

        let handshake = match tokio::time::timeout(config.connect_timeout, ws.recv_message()).await
        {
            Ok(Ok(WsPayload::Text(text))) => match EngineIoPacket::decode(&text)? {
                EngineIoPacket::Open(body) => parse_handshake(&body)?,
                other => {
                    return Err(SocketIoError::InvalidHandshake(format!(
                        "expected OPEN, got {other:?}"
                    )))
                }
            },
            Ok(Ok(WsPayload::Binary(_))) => {
                return Err(SocketIoError::InvalidHandshake(
                    "binary frame before OPEN".into(),
                ))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(SocketIoError::ConnectTimeout),
        };
        info!(sid = %handshake.sid, "engine.io session open");

        let (out_tx, out_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(drive(ws, out_rx, event_tx, handshake.clone(), cancel.clone()));

        Ok(EngineIoTransport {
            handshake,
            sender: EngineIoSender { tx: out_tx },
            events: event_rx,
            cancel,
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn sender(&self) -> EngineIoSender {
        self.sender.clone()
    }

    /// Next event from the session, or `None` after close.
    pub async fn next_event(&mut self) -> Option<EngineIoEvent> {
        self.events.recv().await
    }

    /// Graceful teardown: stops the driver, which closes the WebSocket.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EngineIoTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Map the scheme and attach the Engine.IO query:
/// `http → ws`, `https → wss`, always `EIO=4&transport=websocket`.
fn build_url(config: &EngineIoConfig) -> Result<Url, SocketIoError> {
    let mut url =
        Url::parse(&config.url).map_err(|e| SocketIoError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SocketIoError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    let _ = url.set_scheme(scheme);
    if url.path() == "/" || url.path().is_empty() {
        url.set_path(&config.path);
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "4");
        query.append_pair("transport", "websocket");
        for (key, value) in &config.query {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Owns the WebSocket: multiplexes outgoing writes, the ping timer, and
/// incoming packet dispatch. Any liveness failure emits `Closed` and exits.
async fn drive(
    mut ws: WebSocketTransport,
    mut out_rx: mpsc::Receiver<Outgoing>,
    event_tx: mpsc::Sender<EngineIoEvent>,
    handshake: Handshake,
    cancel: CancellationToken,
) {
    let ping_interval = Duration::from_millis(handshake.ping_interval);
    let ping_timeout = Duration::from_millis(handshake.ping_timeout);

    let mut next_ping = Instant::now() + ping_interval;
    let mut awaiting_pong = false;
    let mut liveness_deadline = Instant::now() + Duration::from_secs(86400);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            out = out_rx.recv() => {
                let result = match out {
                    Some(Outgoing::Text(text)) => ws.send_text(&text).await,
                    Some(Outgoing::Binary(bytes)) => ws.send_binary(&bytes).await,
                    None => break,
                };
                if let Err(e) = result {
                    warn!(error = %e, "engine.io write failed");
                    let _ = event_tx.send(EngineIoEvent::Closed).await;
                    break;
                }
            }

            _ = tokio::time::sleep_until(next_ping) => {
                if ws.send_text(&EngineIoPacket::Ping(None).encode()).await.is_err() {
                    let _ = event_tx.send(EngineIoEvent::Closed).await;
                    break;
                }
                if !awaiting_pong {
                    awaiting_pong = true;
                    liveness_deadline = Instant::now() + ping_timeout;
                }
                next_ping = Instant::now() + ping_interval;
            }

            _ = tokio::time::sleep_until(liveness_deadline), if awaiting_pong => {
                warn!(timeout = ?ping_timeout, "engine.io ping timed out");
                let _ = event_tx.send(EngineIoEvent::Closed).await;
                break;
            }

            incoming = ws.recv_message() => {
                match incoming {
                    Ok(payload) => {
                        // Any traffic proves the peer alive.
                        awaiting_pong = false;
                        if !handle_incoming(&mut ws, payload, &event_tx).await {
                            break;
                        }
                    }
                    Err(TransportError::Closed) => {
                        info!("engine.io websocket closed by peer");
                        let _ = event_tx.send(EngineIoEvent::Closed).await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "engine.io read failed");
                        let _ = event_tx.send(EngineIoEvent::Closed).await;
                        break;
                    }
                }
            }
        }
    }
    let _ = ws.close().await;
}

/// Returns `false` when the session should end.
async fn handle_incoming(
    ws: &mut WebSocketTransport,
    payload: WsPayload,
    event_tx: &mpsc::Sender<EngineIoEvent>,
) -> bool {
    match payload {
        WsPayload::Binary(bytes) => {
            let _ = event_tx.send(EngineIoEvent::Binary(bytes)).await;
            true
        }
        WsPayload::Text(text) => match EngineIoPacket::decode(&text) {
            Ok(EngineIoPacket::Message(data)) => {
                let _ = event_tx.send(EngineIoEvent::Message(data)).await;
                true
            }
            Ok(EngineIoPacket::Ping(data)) => {
                // Server-initiated ping gets an immediate echo pong.
                ws.send_text(&EngineIoPacket::Pong(data).encode())
                    .await
                    .is_ok()
            }
            Ok(EngineIoPacket::Pong(_)) => true,
            Ok(EngineIoPacket::Close) => {
                debug!("engine.io CLOSE received");
                let _ = event_tx.send(EngineIoEvent::Closed).await;
                false
            }
            Ok(EngineIoPacket::Upgrade) | Ok(EngineIoPacket::Noop) => true,
            Ok(EngineIoPacket::Open(_)) => {
                // A second OPEN mid-session is a protocol violation; drop it.
                warn!("unexpected OPEN packet mid-session");
                true
            }
            Err(e) => {
                warn!(error = %e, "undecodable engine.io packet");
                true
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> EngineIoConfig {
        EngineIoConfig {
            url: url.to_string(),
            ..EngineIoConfig::default()
        }
    }

    #[test]
    fn url_maps_http_schemes_and_appends_the_protocol_query() {
        let url = build_url(&config("http://localhost:3000")).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/socket.io/");
        let query = url.query().unwrap();
        assert!(query.contains("EIO=4"));
        assert!(query.contains("transport=websocket"));

        let url = build_url(&config("https://example.com")).unwrap();
        assert_eq!(url.scheme(), "wss");
    }

    #[test]
    fn url_preserves_an_explicit_path_and_extra_query() {
        let mut cfg = config("ws://localhost:3000/custom/");
        cfg.query.push(("token".into(), "abc".into()));
        let url = build_url(&cfg).unwrap();
        assert_eq!(url.path(), "/custom/");
        assert!(url.query().unwrap().contains("token=abc"));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(build_url(&config("ftp://example.com")).is_err());
    }
}
