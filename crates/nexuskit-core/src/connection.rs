//! The connection state machine: owns the transport stack, drives
//! connect/disconnect/reconnect, and fans events out to registered
//! handlers. A reader task owns the live transport and the framer; a
//! writer task serialises outgoing traffic; the heartbeat loop and the
//! pending-request sweeper run alongside, all cancelled together on
//! disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nexuskit_middleware::{Direction, FlowContext, MiddlewareOutcome, MiddlewarePipeline};
use nexuskit_proto::{
    ControlEvent, Frame, FrameReader, Header, JsonCodec, ProtocolAdapter, ProtocolEvent,
};
use nexuskit_transport::{
    Socks5Transport, TcpTransport, TlsConfig, TlsTransport, Transport, WebSocketTransport,
};
use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionConfiguration, Endpoint};
use crate::error::NexusError;
use crate::heartbeat::{HeartbeatManager, HeartbeatStats};
use crate::reconnect::ReconnectStrategy;
use crate::state::{ConnectionEvent, ConnectionState, DisconnectReason};

type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Commands accepted by the connection's writer task.
enum ConnectionCommand {
    /// A full wire frame (length prefix included) that still needs the
    /// outgoing middleware pipeline run on its header+body.
    SendRaw(Bytes),
    /// A full wire frame that has already been through the outgoing
    /// pipeline — written as-is.
    SendPreprocessed(Bytes),
    Disconnect(DisconnectReason, oneshot::Sender<()>),
}

struct RunningTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    heartbeat: Arc<HeartbeatManager>,
    cancel: CancellationToken,
}

/// Owns the transport stack, framer, pending-request table, heartbeat
/// manager and reconnection controller for one logical connection.
pub struct Connection {
    config: ConnectionConfiguration,
    pipeline: Arc<MiddlewarePipeline>,
    adapter: Arc<ProtocolAdapter>,
    reconnect: SyncMutex<Box<dyn ReconnectStrategy>>,
    state: SyncMutex<ConnectionState>,
    handlers: SyncMutex<Vec<EventHandler>>,
    command_tx: SyncMutex<Option<mpsc::Sender<ConnectionCommand>>>,
    io_tx: SyncMutex<Option<mpsc::Sender<Bytes>>>,
    tasks: SyncMutex<Option<RunningTasks>>,
    disconnecting: AtomicBool,
    connection_id: u64,
}

impl Connection {
    pub fn new(config: ConnectionConfiguration, reconnect: Box<dyn ReconnectStrategy>) -> Arc<Self> {
        let pipeline = Arc::new(MiddlewarePipeline::new());
        for mw in &config.middlewares {
            pipeline.add(Arc::clone(mw));
        }
        let connection_id = fnv1a(config.id.as_bytes());

        Arc::new(Self {
            adapter: Arc::new(ProtocolAdapter::new(JsonCodec).with_compression(true, 1024)),
            config,
            pipeline,
            reconnect: SyncMutex::new(reconnect),
            state: SyncMutex::new(ConnectionState::Disconnected),
            handlers: SyncMutex::new(Vec::new()),
            command_tx: SyncMutex::new(None),
            io_tx: SyncMutex::new(None),
            tasks: SyncMutex::new(None),
            disconnecting: AtomicBool::new(false),
            connection_id,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn middleware_pipeline(&self) -> &Arc<MiddlewarePipeline> {
        &self.pipeline
    }

    /// Keep-alive statistics for the current session, if connected. Stats
    /// reset on every successful connect.
    pub fn heartbeat_stats(&self) -> Option<HeartbeatStats> {
        self.tasks
            .lock()
            .as_ref()
            .map(|tasks| tasks.heartbeat.stats())
    }

    /// Register an event handler, invoked synchronously in registration
    /// order before the triggering operation returns.
    pub fn on(&self, handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static) {
        self.handlers.lock().push(Arc::new(handler));
    }

    fn emit(&self, event: ConnectionEvent) {
        // Snapshot so a handler can register further handlers without
        // deadlocking on the registry lock.
        let handlers: Vec<EventHandler> = self.handlers.lock().clone();
        for handler in &handlers {
            handler(&event);
        }
    }

    fn transition(&self, next: ConnectionState) -> Result<(), NexusError> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(NexusError::InvalidStateTransition {
                from: *state,
                to: next,
            });
        }
        let old = *state;
        *state = next;
        drop(state);
        self.emit(ConnectionEvent::StateChange(old, next));
        Ok(())
    }

    /// Drive the transport stack to completion: TCP, then the optional
    /// SOCKS5 tunnel, then optional TLS. On success the connection is
    /// `Connected` with its reader, writer, heartbeat and sweeper tasks
    /// running. This is the entry point for the first, user-initiated
    /// connect; on failure it falls back to `Disconnected`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), NexusError> {
        self.transition(ConnectionState::Connecting)?;
        self.emit(ConnectionEvent::Connecting);
        match self.dial().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Dials the transport stack and wires up the background tasks.
    /// Assumes the caller has already transitioned into `Connecting` and
    /// leaves the state machine in `Connecting` on failure, so the
    /// reconnect loop can decide for itself whether to retry or give up.
    async fn dial(self: &Arc<Self>) -> Result<(), NexusError> {
        let mut transport = build_transport(&self.config)?;
        match tokio::time::timeout(
            self.config.connect_timeout,
            transport.connect(self.config.connect_timeout),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(NexusError::ConnectTimeout),
        }

        self.transition(ConnectionState::Connected)?;
        self.emit(ConnectionEvent::Connected);
        self.disconnecting.store(false, Ordering::SeqCst);
        info!(id = %self.config.id, "connection established");

        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(256);
        let (ack_tx, ack_rx) = mpsc::channel::<ControlEvent>(16);
        let (io_tx, io_rx) = mpsc::channel::<Bytes>(256);
        *self.io_tx.lock() = Some(io_tx);
        let cancel = CancellationToken::new();

        let heartbeat = Arc::new(HeartbeatManager::new(
            self.config.heartbeat.clone(),
            Arc::clone(&self.adapter),
        ));
        let (hb_out_tx, hb_out_rx) = mpsc::channel::<Bytes>(64);
        let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<DisconnectReason>(2);
        let heartbeat_task =
            Arc::clone(&heartbeat).spawn(hb_out_tx, ack_rx, disconnect_tx.clone(), cancel.clone());

        let sweeper = self.adapter.spawn_sweeper(SWEEP_PERIOD, cancel.clone());

        let writer_task = tokio::spawn(writer_loop(
            Arc::clone(self),
            cmd_rx,
            hb_out_rx,
            cancel.clone(),
        ));

        let reader_task = tokio::spawn(reader_loop(
            Arc::clone(self),
            transport,
            io_rx,
            ack_tx,
            disconnect_tx,
            cancel.clone(),
        ));

        // Internal failures (heartbeat timeout, transport loss) funnel here
        // and tear the connection down with reconnection eligible.
        let self_for_watch = Arc::clone(self);
        let cancel_for_watch = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_for_watch.cancelled() => {}
                reason = disconnect_rx.recv() => {
                    if let Some(reason) = reason {
                        self_for_watch.teardown(reason, true).await;
                    }
                }
            }
        });

        *self.command_tx.lock() = Some(cmd_tx);
        *self.tasks.lock() = Some(RunningTasks {
            reader: reader_task,
            writer: writer_task,
            heartbeat_task,
            sweeper,
            heartbeat,
            cancel,
        });

        Ok(())
    }

    /// Run the outgoing pipeline on a pre-framed wire buffer and write it.
    pub async fn send(&self, bytes: Bytes, timeout: Option<Duration>) -> Result<(), NexusError> {
        if self.state() != ConnectionState::Connected {
            return Err(NexusError::NotConnected);
        }
        let timeout = timeout.unwrap_or(self.config.read_write_timeout);
        let tx = self
            .command_tx
            .lock()
            .clone()
            .ok_or(NexusError::NotConnected)?;
        tokio::time::timeout(timeout, tx.send(ConnectionCommand::SendRaw(bytes)))
            .await
            .map_err(|_| NexusError::ReadWriteTimeout)?
            .map_err(|_| NexusError::NotConnected)
    }

    /// Encode, register a pending awaiter, send, and await the matching
    /// response or timeout. A cache hit short-circuits the outgoing
    /// pipeline and is returned immediately without touching the network
    /// or allocating a pending-table entry.
    pub async fn send_request<T, R>(
        &self,
        message: &T,
        function_id: u32,
        timeout: Option<Duration>,
    ) -> Result<R, NexusError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        if self.state() != ConnectionState::Connected {
            return Err(NexusError::NotConnected);
        }
        let timeout = timeout.unwrap_or(self.config.read_write_timeout);

        let (request_id, full_frame) = self.adapter.encode(message, function_id)?;
        let header_and_body = Bytes::copy_from_slice(&full_frame[4..]);

        let ctx = FlowContext::new(self.connection_id, Direction::Outgoing);
        let outcome = self.pipeline.run_outgoing(header_and_body, &ctx).await?;

        let outgoing_bytes = match outcome {
            MiddlewareOutcome::Continue(bytes) => bytes,
            MiddlewareOutcome::ShortCircuit(cached) => {
                let frame = bytes_to_frame(&cached)?;
                return self.adapter.decode_as(&frame).map_err(Into::into);
            }
        };

        let mut wire = Vec::with_capacity(4 + outgoing_bytes.len());
        wire.extend_from_slice(&(outgoing_bytes.len() as u32).to_be_bytes());
        wire.extend_from_slice(&outgoing_bytes);

        let rx = self.adapter.pending().register(request_id, timeout);

        let tx = self
            .command_tx
            .lock()
            .clone()
            .ok_or(NexusError::NotConnected)?;
        tx.send(ConnectionCommand::SendPreprocessed(Bytes::from(wire)))
            .await
            .map_err(|_| NexusError::NotConnected)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(payload))) => self
                .adapter
                .decode_as(&Frame::new(
                    Header::new(function_id, request_id),
                    payload.body,
                ))
                .map_err(Into::into),
            Ok(Ok(Err(proto_err))) => Err(proto_err.into()),
            Ok(Err(_cancelled)) => Err(NexusError::NotConnected),
            Err(_elapsed) => Err(NexusError::RequestTimeout),
        }
    }

    /// The binary adapter demultiplexes responses straight to their
    /// awaiters, so a pull-style receive has nothing to pull from.
    /// Subscribe with [`Connection::on`] for notifications instead.
    pub async fn receive<R: DeserializeOwned>(
        &self,
        _timeout: Option<Duration>,
    ) -> Result<R, NexusError> {
        Err(NexusError::UnsupportedOperation {
            op: "receive".into(),
            reason: "responses are demultiplexed to their awaiters; register a handler with `on` for notifications".into(),
        })
    }

    /// Tear down the stack, fail pending requests with `NotConnected`, stop
    /// the heartbeat loop, and suspend reconnection. Idempotent.
    pub async fn disconnect(self: &Arc<Self>, reason: DisconnectReason) -> Result<(), NexusError> {
        if self
            .disconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let current = self.state();
        if current == ConnectionState::Disconnected {
            self.disconnecting.store(false, Ordering::SeqCst);
            return Ok(());
        }

        // A disconnect requested mid-reconnect has no running tasks to stop;
        // the spawned retry loop notices `Disconnected` on its next wakeup
        // and exits.
        if matches!(
            current,
            ConnectionState::Reconnecting(_) | ConnectionState::Connecting
        ) {
            let _ = self.transition(ConnectionState::Disconnected);
            self.emit(ConnectionEvent::Disconnected((&reason).into()));
            self.disconnecting.store(false, Ordering::SeqCst);
            return Ok(());
        }

        self.transition(ConnectionState::Disconnecting)?;

        let tx = self.command_tx.lock().clone();
        if let Some(tx) = tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx
                .send(ConnectionCommand::Disconnect(reason.clone(), done_tx))
                .await
                .is_ok()
            {
                let _ = done_rx.await;
            }
        }

        self.teardown(reason, false).await;
        self.disconnecting.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Fail the connection with `err`, as an internal layer would: tears
    /// the stack down and lets the reconnection strategy decide whether to
    /// retry. Authentication failures never retry.
    pub async fn fail(self: &Arc<Self>, err: NexusError) {
        let allow_reconnect = self.reconnect.lock().should_reconnect(&err);
        self.emit(ConnectionEvent::Error((&err).into()));
        let reason = DisconnectReason::Error(err.to_string());
        self.teardown(reason, allow_reconnect).await;
    }

    async fn teardown(self: &Arc<Self>, reason: DisconnectReason, allow_reconnect: bool) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.cancel.cancel();
            let _ = tasks.writer.await;
            let _ = tasks.reader.await;
            let _ = tasks.heartbeat_task.await;
            let _ = tasks.sweeper.await;
        }
        *self.command_tx.lock() = None;
        *self.io_tx.lock() = None;
        self.adapter
            .pending()
            .fail_all(nexuskit_proto::ProtoError::NotConnected);

        let should_reconnect = allow_reconnect
            && !matches!(reason, DisconnectReason::ClientInitiated)
            && self
                .reconnect
                .lock()
                .should_reconnect(&NexusError::Disconnected(reason.clone()));

        // `Reconnecting` is only reachable directly from `Connected`, so a
        // disconnect that will retry skips the `Disconnected` state
        // entirely; one that won't retry settles there through
        // `Disconnecting`.
        if should_reconnect
            && self.state() == ConnectionState::Connected
            && self.transition(ConnectionState::Reconnecting(1)).is_ok()
        {
            self.emit(ConnectionEvent::Disconnected((&reason).into()));
            self.spawn_reconnect(1);
            return;
        }

        if self.state() == ConnectionState::Connected {
            let _ = self.transition(ConnectionState::Disconnecting);
        }
        if self.transition(ConnectionState::Disconnected).is_ok() {
            self.emit(ConnectionEvent::Disconnected((&reason).into()));
        }
    }

    /// Bumps the retry counter within an already-established `Reconnecting`
    /// effort. Not itself a table transition (the table only validates
    /// entry into `Reconnecting` from `Connected`), so it updates the state
    /// directly rather than through `transition()`.
    fn set_reconnect_attempt(&self, attempt: u32) {
        let mut state = self.state.lock();
        let old = *state;
        let next = ConnectionState::Reconnecting(attempt);
        *state = next;
        drop(state);
        self.emit(ConnectionEvent::StateChange(old, next));
    }

    fn spawn_reconnect(self: &Arc<Self>, start_attempt: u32) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut attempt = start_attempt;
            loop {
                if this.state() == ConnectionState::Disconnected {
                    break;
                }
                let delay = {
                    let mut strategy = this.reconnect.lock();
                    strategy.next_delay(attempt, &NexusError::NotConnected)
                };
                let Some(delay) = delay else {
                    let _ = this.transition(ConnectionState::Disconnected);
                    break;
                };
                if attempt != start_attempt {
                    this.set_reconnect_attempt(attempt);
                }
                debug!(attempt, ?delay, "reconnect backoff");
                tokio::time::sleep(delay).await;
                if !matches!(this.state(), ConnectionState::Reconnecting(_)) {
                    break; // disconnected out from under us while sleeping
                }
                if this.transition(ConnectionState::Connecting).is_err() {
                    break;
                }
                this.emit(ConnectionEvent::Connecting);
                match this.dial().await {
                    Ok(()) => {
                        this.reconnect.lock().reset();
                        break;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "reconnect attempt failed");
                        attempt += 1;
                    }
                }
            }
        });
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Re-parses a header+body slice (as produced by the middleware pipeline)
/// back into a [`Frame`].
fn bytes_to_frame(bytes: &Bytes) -> Result<Frame, NexusError> {
    let header = Header::decode(bytes).map_err(NexusError::from)?;
    let body = bytes.slice(Header::LEN..);
    Ok(Frame::new(header, body))
}

fn build_transport(config: &ConnectionConfiguration) -> Result<Box<dyn Transport>, NexusError> {
    match &config.endpoint {
        Endpoint::Tcp { host, port } => {
            let mut transport: Box<dyn Transport> = if let Some(proxy) = &config.proxy {
                let tcp = TcpTransport::new(proxy.host.clone(), proxy.port);
                Box::new(Socks5Transport::new(
                    Box::new(tcp),
                    host.clone(),
                    *port,
                    proxy.auth.clone(),
                ))
            } else {
                Box::new(TcpTransport::new(host.clone(), *port))
            };

            if let Some(tls) = &config.tls {
                let mut tls_config =
                    TlsConfig::new(tls.server_name.clone().unwrap_or_else(|| host.clone()));
                tls_config.alpn_protocols = tls.alpn_protocols.clone();
                tls_config.version = tls.version;
                tls_config.cipher_policy = tls.cipher_policy;
                tls_config.pins = tls.pins.clone();
                tls_config.allow_self_signed = tls.allow_self_signed;
                transport = Box::new(TlsTransport::new(transport, tls_config));
            }
            Ok(transport)
        }
        Endpoint::Ws { url: ws_url } => {
            let parsed = url::Url::parse(ws_url).map_err(|_| NexusError::InvalidEndpoint)?;
            Ok(Box::new(WebSocketTransport::new(parsed)))
        }
    }
}

/// Writer task: forwards commands to the reader task, which is the sole
/// owner of the live `Transport` (see `reader_loop`), running the outgoing
/// middleware pipeline first. The transport trait has no split-halves
/// concept, so writes are relayed to the reader task over `conn.io_tx`
/// rather than performed directly here.
async fn writer_loop(
    conn: Arc<Connection>,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    mut heartbeat_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let mut hb_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::SendRaw(bytes)) => {
                        if let Err(e) = conn.write_through_pipeline(bytes).await {
                            warn!(error = %e, "failed to write outgoing frame");
                        }
                    }
                    Some(ConnectionCommand::SendPreprocessed(wire)) => {
                        if let Err(e) = conn.write_raw_wire(wire).await {
                            warn!(error = %e, "failed to write pre-processed frame");
                        }
                    }
                    Some(ConnectionCommand::Disconnect(reason, done)) => {
                        debug!(?reason, "disconnect command received");
                        let _ = done.send(());
                        break;
                    }
                    None => break,
                }
            }

            frame = heartbeat_rx.recv(), if hb_open => {
                match frame {
                    Some(bytes) => {
                        if let Err(e) = conn.write_through_pipeline(bytes).await {
                            warn!(error = %e, "failed to write heartbeat frame");
                        }
                    }
                    None => hb_open = false,
                }
            }
        }
    }
}

impl Connection {
    /// Applies the outgoing pipeline to a full wire frame (length prefix +
    /// header + body) and forwards the result to the transport queue.
    async fn write_through_pipeline(&self, wire: Bytes) -> Result<(), NexusError> {
        if wire.len() < 4 {
            return self.write_raw_wire(wire).await;
        }
        let header_and_body = wire.slice(4..);
        let ctx = FlowContext::new(self.connection_id, Direction::Outgoing);
        let outcome = self.pipeline.run_outgoing(header_and_body, &ctx).await?;
        let bytes = match outcome {
            MiddlewareOutcome::Continue(b) => b,
            MiddlewareOutcome::ShortCircuit(b) => b,
        };
        let mut out = Vec::with_capacity(4 + bytes.len());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&bytes);
        self.write_raw_wire(Bytes::from(out)).await
    }

    async fn write_raw_wire(&self, wire: Bytes) -> Result<(), NexusError> {
        let tx = self.io_tx.lock().clone().ok_or(NexusError::NotConnected)?;
        tx.send(wire).await.map_err(|_| NexusError::NotConnected)
    }
}

/// Reader task: owns the transport for its full lifetime. Reads bytes,
/// feeds the framer, runs the incoming pipeline, demuxes via the adapter,
/// resolves pending requests, answers server-mode heartbeats, and fans
/// notifications to registered handlers. Transport loss is reported on
/// `disconnect_tx` so the watcher can tear the connection down and start
/// reconnection.
async fn reader_loop(
    conn: Arc<Connection>,
    mut transport: Box<dyn Transport>,
    mut io_rx: mpsc::Receiver<Bytes>,
    ack_tx: mpsc::Sender<ControlEvent>,
    disconnect_tx: mpsc::Sender<DisconnectReason>,
    cancel: CancellationToken,
) {
    let mut framer = FrameReader::new(nexuskit_proto::limits::FrameLimits::default());
    let mut io_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            outgoing = io_rx.recv(), if io_open => {
                match outgoing {
                    Some(bytes) => {
                        if let Err(e) = transport.send(&bytes).await {
                            error!(error = %e, "transport send failed");
                            let _ = disconnect_tx
                                .try_send(DisconnectReason::Error(e.to_string()));
                            break;
                        }
                    }
                    None => io_open = false,
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Ok(chunk) => {
                        framer.buf_mut().extend_from_slice(&chunk);
                        let frames = match framer.drain_frames() {
                            Ok(frames) => frames,
                            Err(e) => {
                                warn!(error = %e, "framing desynchronized, disconnecting");
                                conn.emit(ConnectionEvent::Error((&NexusError::from(e.clone())).into()));
                                let _ = disconnect_tx
                                    .try_send(DisconnectReason::Error(e.to_string()));
                                break;
                            }
                        };
                        for frame in frames {
                            if let Err(e) = conn.handle_incoming_frame(frame, &ack_tx).await {
                                conn.emit(ConnectionEvent::Error((&e).into()));
                            }
                        }
                    }
                    Err(e) => {
                        info!(error = %e, "transport closed");
                        let reason = match e {
                            nexuskit_transport::TransportError::Closed => {
                                DisconnectReason::NetworkLost
                            }
                            other => DisconnectReason::Error(other.to_string()),
                        };
                        let _ = disconnect_tx.try_send(reason);
                        break;
                    }
                }
            }
        }
    }
    let _ = transport.close().await;
}

impl Connection {
    async fn handle_incoming_frame(
        &self,
        frame: Frame,
        ack_tx: &mpsc::Sender<ControlEvent>,
    ) -> Result<(), NexusError> {
        if frame.header.is_heartbeat() && !frame.header.is_response() {
            use crate::config::HeartbeatMode;
            if matches!(
                self.config.heartbeat.mode,
                HeartbeatMode::Server | HeartbeatMode::Both
            ) {
                let ack = self.adapter.create_heartbeat_ack(frame.header.request_id);
                self.write_raw_wire(Bytes::from(ack)).await?;
            }
            return Ok(());
        }

        let header_and_body = {
            let mut buf = Vec::with_capacity(Header::LEN + frame.body.len());
            let mut hbuf = [0u8; 20];
            frame.header.encode_into(&mut hbuf);
            buf.extend_from_slice(&hbuf);
            buf.extend_from_slice(&frame.body);
            Bytes::from(buf)
        };

        let ctx = FlowContext::new(self.connection_id, Direction::Incoming);
        let outcome = self.pipeline.run_incoming(header_and_body, &ctx).await?;
        let processed = match outcome {
            MiddlewareOutcome::Continue(b) => b,
            MiddlewareOutcome::ShortCircuit(b) => b,
        };
        let processed_frame = bytes_to_frame(&processed)?;

        let event = self.adapter.handle_incoming(processed_frame)?;
        match &event {
            ProtocolEvent::Response {
                request_id,
                code,
                body,
            } => {
                self.adapter.pending().resolve(*request_id, *code, body.clone());
            }
            // Heartbeat requests were answered and consumed before the
            // pipeline ran, so the only control event reaching here is an
            // ack for the heartbeat loop.
            ProtocolEvent::Control(control) => {
                let _ = ack_tx.send(*control).await;
            }
            ProtocolEvent::Notification { .. } => {}
        }
        self.emit(ConnectionEvent::Message(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use crate::reconnect::FixedStrategy;

    fn test_config() -> ConnectionConfiguration {
        ConnectionConfiguration::new(
            "test",
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 1,
            },
        )
        .with_heartbeat(HeartbeatConfig {
            enabled: false,
            ..HeartbeatConfig::default()
        })
    }

    #[test]
    fn new_connection_starts_disconnected() {
        let conn = Connection::new(
            test_config(),
            Box::new(FixedStrategy::new(Duration::from_secs(1), Some(0))),
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_on_a_disconnected_connection_is_a_no_op() {
        let conn = Connection::new(
            test_config(),
            Box::new(FixedStrategy::new(Duration::from_secs(1), Some(0))),
        );
        conn.disconnect(DisconnectReason::ClientInitiated)
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_without_connecting_fails_not_connected() {
        let conn = Connection::new(
            test_config(),
            Box::new(FixedStrategy::new(Duration::from_secs(1), Some(0))),
        );
        let err = conn.send(Bytes::from_static(b"x"), None).await.unwrap_err();
        assert!(matches!(err, NexusError::NotConnected));
    }

    #[tokio::test]
    async fn receive_is_unsupported_for_the_demuxing_adapter() {
        let conn = Connection::new(
            test_config(),
            Box::new(FixedStrategy::new(Duration::from_secs(1), Some(0))),
        );
        let err = conn
            .receive::<serde_json::Value>(None)
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::UnsupportedOperation { .. }));
    }
}
