//! The protocol adapter: encodes typed messages into frames, demuxes
//! incoming frames into [`ProtocolEvent`]s, and matches responses against a
//! pending-request table.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use crate::codec::{JsonCodec, PayloadCodec};
use crate::constants::{FLAG_COMPRESSED, FLAG_HEARTBEAT, HEARTBEAT_FUNCTION_ID};
use crate::error::ProtoError;
use crate::frame::Frame;
use crate::header::Header;
use crate::limits::DEFAULT_COMPRESSION_THRESHOLD;

/// A decoded, demultiplexed incoming event. One per incoming frame.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Response {
        request_id: u32,
        code: u32,
        body: Bytes,
    },
    Notification {
        function_id: u32,
        body: Bytes,
    },
    Control(ControlEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    HeartbeatReq,
    HeartbeatAck,
}

/// A successful response's payload, as delivered to a pending awaiter.
#[derive(Debug, Clone)]
pub struct ResponsePayload {
    pub code: u32,
    pub body: Bytes,
}

struct PendingEntry {
    tx: oneshot::Sender<Result<ResponsePayload, ProtoError>>,
    deadline: Instant,
}

/// Waiters registered against allocated `request_id`s. An entry is removed
/// on matching response, on timeout, or on connection loss.
#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<u32, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`, with a fixed deadline from now.
    pub fn register(
        &self,
        request_id: u32,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<ResponsePayload, ProtoError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id,
            PendingEntry {
                tx,
                deadline: Instant::now() + timeout,
            },
        );
        rx
    }

    /// Resolve a pending request with a response. Returns `false` (and logs
    /// a warning) if no entry is registered for `request_id` — the response
    /// is simply dropped.
    pub fn resolve(&self, request_id: u32, code: u32, body: Bytes) -> bool {
        match self.entries.remove(&request_id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(Ok(ResponsePayload { code, body }));
                true
            }
            None => {
                warn!(request_id, "response for unknown or expired request_id");
                false
            }
        }
    }

    /// Fail every pending entry (used on disconnect: every pending call
    /// fails with `NotConnected`, never silently forgotten).
    pub fn fail_all(&self, err: ProtoError) {
        let ids: Vec<u32> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.tx.send(Err(err.clone()));
            }
        }
    }

    /// Remove and fail every entry whose deadline has passed.
    pub fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| *e.key())
            .collect();
        for id in expired {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.tx.send(Err(ProtoError::RequestTimeout));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encodes typed messages into frames and demultiplexes incoming frames,
/// matching responses against the pending-request table.
pub struct ProtocolAdapter<C: PayloadCodec = JsonCodec> {
    codec: C,
    ver: u16,
    next_request_id: AtomicU32,
    pending: Arc<PendingTable>,
    compression_enabled: bool,
    compression_threshold: usize,
}

impl Default for ProtocolAdapter<JsonCodec> {
    fn default() -> Self {
        Self::new(JsonCodec)
    }
}

impl<C: PayloadCodec> ProtocolAdapter<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            ver: crate::constants::VERSION,
            next_request_id: AtomicU32::new(1),
            pending: Arc::new(PendingTable::new()),
            compression_enabled: true,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    pub fn with_compression(mut self, enabled: bool, threshold: usize) -> Self {
        self.compression_enabled = enabled;
        self.compression_threshold = threshold;
        self
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Allocate the next request id. Monotonic, wraps to 1 on overflow,
    /// never 0.
    fn next_id(&self) -> u32 {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.next_request_id.store(2, Ordering::Relaxed);
            1
        } else {
            id
        }
    }

    /// Encode `message` for `function_id` into full framed wire bytes,
    /// returning the allocated `request_id` alongside.
    pub fn encode<T: Serialize>(
        &self,
        message: &T,
        function_id: u32,
    ) -> Result<(u32, Vec<u8>), ProtoError> {
        let request_id = self.next_id();
        let mut body = self.codec.encode(message)?;

        let mut header = Header::new(function_id, request_id);
        header.ver = self.ver;

        if self.compression_enabled && body.len() >= self.compression_threshold {
            body = crate::compression::compress(&body)?;
            header.type_flags |= FLAG_COMPRESSED;
        }

        let frame = Frame::new(header, Bytes::from(body));
        Ok((request_id, frame.encode()))
    }

    /// Decode a single already-framed body into `T`, applying decompression
    /// if the frame's `FLAG_COMPRESSED` bit is set.
    pub fn decode_as<T: DeserializeOwned>(&self, frame: &Frame) -> Result<T, ProtoError> {
        let body = self.decompress_if_needed(frame)?;
        self.codec.decode(&body)
    }

    fn decompress_if_needed(&self, frame: &Frame) -> Result<Bytes, ProtoError> {
        if frame.header.is_compressed() {
            Ok(Bytes::from(crate::compression::decompress(&frame.body)?))
        } else {
            Ok(frame.body.clone())
        }
    }

    /// Build a header-only heartbeat frame.
    pub fn create_heartbeat(&self) -> Vec<u8> {
        let mut header = Header::new(HEARTBEAT_FUNCTION_ID, self.next_id());
        header.ver = self.ver;
        header.type_flags |= FLAG_HEARTBEAT;
        Frame::new(header, Bytes::new()).encode()
    }

    /// Build a header-only heartbeat ack, replying to a request with the
    /// same request_id.
    pub fn create_heartbeat_ack(&self, request_id: u32) -> Vec<u8> {
        let mut header = Header::new(HEARTBEAT_FUNCTION_ID, request_id);
        header.ver = self.ver;
        header.type_flags |= FLAG_HEARTBEAT;
        header.response_flag = 1;
        header.code = 200;
        Frame::new(header, Bytes::new()).encode()
    }

    /// Demux a single incoming frame into a [`ProtocolEvent`], per the
    /// frame's flags. Does not resolve the pending table itself; the
    /// caller (the connection state machine) does that so it can also fan
    /// the event to message handlers.
    pub fn handle_incoming(&self, frame: Frame) -> Result<ProtocolEvent, ProtoError> {
        let body = self.decompress_if_needed(&frame)?;
        let header = frame.header;

        if header.is_heartbeat() {
            return Ok(ProtocolEvent::Control(if header.is_response() {
                ControlEvent::HeartbeatAck
            } else {
                ControlEvent::HeartbeatReq
            }));
        }

        if header.is_response() {
            return Ok(ProtocolEvent::Response {
                request_id: header.request_id,
                code: header.code,
                body,
            });
        }

        Ok(ProtocolEvent::Notification {
            function_id: header.function_id,
            body,
        })
    }

    /// Spawn a cooperative background task sweeping expired pending
    /// requests with `RequestTimeout`, cancelled via `token`.
    pub fn spawn_sweeper(
        &self,
        period: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => pending.sweep(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn request_ids_are_monotonic_and_never_zero() {
        let adapter = ProtocolAdapter::default();
        let (id1, _) = adapter.encode(&Ping { n: 1 }, 7).unwrap();
        let (id2, _) = adapter.encode(&Ping { n: 2 }, 7).unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_ne!(id1, 0);
        assert_ne!(id2, 0);
    }

    #[test]
    fn create_heartbeat_uses_reserved_function_id() {
        let adapter = ProtocolAdapter::default();
        let bytes = adapter.create_heartbeat();
        // length prefix + header only, no body.
        assert_eq!(bytes.len(), 4 + Header::LEN);
    }

    #[test]
    fn demux_routes_response_notification_and_heartbeat() {
        let adapter = ProtocolAdapter::default();

        let mut resp_header = Header::new(3, 9);
        resp_header.response_flag = 1;
        resp_header.code = 200;
        let resp = Frame::new(resp_header, Bytes::from_static(b"body"));
        match adapter.handle_incoming(resp).unwrap() {
            ProtocolEvent::Response {
                request_id, code, ..
            } => {
                assert_eq!(request_id, 9);
                assert_eq!(code, 200);
            }
            other => panic!("expected Response, got {other:?}"),
        }

        let notif = Frame::new(Header::new(5, 10), Bytes::from_static(b"n"));
        assert!(matches!(
            adapter.handle_incoming(notif).unwrap(),
            ProtocolEvent::Notification { function_id: 5, .. }
        ));

        let mut hb_header = Header::new(HEARTBEAT_FUNCTION_ID, 11);
        hb_header.type_flags |= FLAG_HEARTBEAT;
        let hb = Frame::new(hb_header, Bytes::new());
        assert!(matches!(
            adapter.handle_incoming(hb).unwrap(),
            ProtocolEvent::Control(ControlEvent::HeartbeatReq)
        ));
    }

    #[tokio::test]
    async fn pending_table_resolves_exact_request_id_only() {
        let adapter = ProtocolAdapter::default();
        let rx_a = adapter.pending().register(1, Duration::from_secs(5));
        let rx_b = adapter.pending().register(2, Duration::from_secs(5));

        assert!(adapter
            .pending()
            .resolve(1, 200, Bytes::from_static(b"ok")));

        let result_a = rx_a.await.unwrap().unwrap();
        assert_eq!(result_a.code, 200);

        // request 2's awaiter must be unaffected by request 1's response.
        assert_eq!(adapter.pending().len(), 1);
        drop(rx_b);
    }

    #[tokio::test]
    async fn disconnect_fails_all_pending_with_not_connected() {
        let adapter = ProtocolAdapter::default();
        let rx = adapter.pending().register(1, Duration::from_secs(5));
        adapter.pending().fail_all(ProtoError::NotConnected);
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ProtoError::NotConnected));
        assert!(adapter.pending().is_empty());
    }

    #[tokio::test]
    async fn sweep_times_out_expired_entries() {
        let adapter = ProtocolAdapter::default();
        let rx = adapter.pending().register(1, Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        adapter.pending().sweep();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ProtoError::RequestTimeout));
    }
}
