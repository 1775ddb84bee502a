//! The Socket.IO v5 client: namespace multiplexing, event routing, ACK
//! correlation, room bookkeeping and binary attachment reassembly, all
//! layered on one Engine.IO session.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nexuskit_core::reconnect::{ExponentialBackoffStrategy, ReconnectStrategy};
use nexuskit_core::NexusError;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SocketIoConfig;
use crate::engineio::{EngineIoEvent, EngineIoSender, EngineIoTransport};
use crate::error::SocketIoError;
use crate::payload::Payload;
use crate::socketio::namespace::Namespace;
use crate::socketio::packet::{PacketKind, SocketIoPacket};

type EventCallback = Arc<dyn Fn(&[Payload]) + Send + Sync>;
type LifecycleCallback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Lifecycle notifications fanned out to `on_client_event` subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    NamespaceConnected(String),
    NamespaceDisconnected(String),
    Disconnected,
    Reconnecting(u32),
    ConnectError { namespace: String, message: String },
}

#[derive(Default)]
pub(crate) struct NamespaceState {
    pub(crate) connected: bool,
    pub(crate) waiters: Vec<oneshot::Sender<Result<(), SocketIoError>>>,
    pub(crate) rooms: HashSet<String>,
}

pub(crate) struct ClientShared {
    pub(crate) config: SocketIoConfig,
    sender: Mutex<Option<EngineIoSender>>,
    ack_seq: AtomicU32,
    acks: Mutex<HashMap<u32, oneshot::Sender<Vec<Payload>>>>,
    pub(crate) namespaces: Mutex<HashMap<String, NamespaceState>>,
    handlers: Mutex<HashMap<(String, String), Vec<EventCallback>>>,
    lifecycle: Mutex<Vec<LifecycleCallback>>,
    session: Mutex<Option<CancellationToken>>,
    closed: AtomicBool,
}

impl ClientShared {
    fn emit_lifecycle(&self, event: ClientEvent) {
        for callback in self.lifecycle.lock().iter() {
            callback(&event);
        }
    }

    fn sender(&self) -> Result<EngineIoSender, SocketIoError> {
        self.sender.lock().clone().ok_or(SocketIoError::NotConnected)
    }
}

/// A Socket.IO client over one Engine.IO session.
pub struct SocketIoClient {
    shared: Arc<ClientShared>,
}

impl SocketIoClient {
    pub fn new(config: SocketIoConfig) -> Self {
        let shared = Arc::new(ClientShared {
            config,
            sender: Mutex::new(None),
            ack_seq: AtomicU32::new(1),
            acks: Mutex::new(HashMap::new()),
            namespaces: Mutex::new(HashMap::from([("/".to_string(), NamespaceState::default())])),
            handlers: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        Self { shared }
    }

    /// Dial the server and wait for the default namespace's CONNECT
    /// confirmation.
    pub async fn connect(&self) -> Result<(), SocketIoError> {
        self.shared.closed.store(false, Ordering::SeqCst);
        let waiter = register_connect_waiter(&self.shared, "/");
        attach(&self.shared).await?;
        await_namespace_connect(&self.shared, waiter).await
    }

    /// Join `name` (e.g. `"/admin"`), returning a handle bound to it. If a
    /// session is live, the CONNECT packet goes out immediately; otherwise
    /// it is sent on the next (re)connect.
    pub async fn namespace(&self, name: &str) -> Result<Namespace, SocketIoError> {
        let name = normalize_namespace(name);
        let already_joined = {
            let mut namespaces = self.shared.namespaces.lock();
            let state = namespaces.entry(name.clone()).or_default();
            state.connected
        };
        if !already_joined {
            if let Ok(sender) = self.shared.sender() {
                let waiter = register_connect_waiter(&self.shared, &name);
                sender
                    .send_message(SocketIoPacket::new(PacketKind::Connect, name.clone()).encode())
                    .await?;
                await_namespace_connect(&self.shared, waiter).await?;
            }
        }
        Ok(Namespace::new(name, Arc::clone(&self.shared)))
    }

    /// Register a handler for `event` on the default namespace.
    pub fn on(&self, event: &str, handler: impl Fn(&[Payload]) + Send + Sync + 'static) {
        on_event(&self.shared, "/", event, handler);
    }

    /// Register a lifecycle subscriber.
    pub fn on_client_event(&self, handler: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        self.shared.lifecycle.lock().push(Arc::new(handler));
    }

    /// Emit `event` with `args` on the default namespace.
    pub async fn emit(&self, event: &str, args: Vec<Payload>) -> Result<(), SocketIoError> {
        emit_packet(&self.shared, "/", event, args, None).await
    }

    /// Emit with an acknowledgement: resolves with the server's ACK
    /// arguments, or `AckTimeout` after the configured timeout (the
    /// callback is dropped, never invoked late).
    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Payload>,
    ) -> Result<Vec<Payload>, SocketIoError> {
        emit_with_ack(&self.shared, "/", event, args).await
    }

    /// Tear the session down and suspend reconnection.
    pub async fn disconnect(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);

        let connected: Vec<String> = {
            let namespaces = self.shared.namespaces.lock();
            namespaces
                .iter()
                .filter(|(_, s)| s.connected)
                .map(|(n, _)| n.clone())
                .collect()
        };
        if let Ok(sender) = self.shared.sender() {
            for nsp in connected {
                let _ = sender
                    .send_message(SocketIoPacket::new(PacketKind::Disconnect, nsp).encode())
                    .await;
            }
        }

        if let Some(token) = self.shared.session.lock().take() {
            token.cancel();
        }
        drop_session_state(&self.shared);
        self.shared.emit_lifecycle(ClientEvent::Disconnected);
    }
}

pub(crate) fn normalize_namespace(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

pub(crate) fn on_event(
    shared: &Arc<ClientShared>,
    namespace: &str,
    event: &str,
    handler: impl Fn(&[Payload]) + Send + Sync + 'static,
) {
    shared
        .handlers
        .lock()
        .entry((namespace.to_string(), event.to_string()))
        .or_default()
        .push(Arc::new(handler));
}

fn register_connect_waiter(
    shared: &Arc<ClientShared>,
    namespace: &str,
) -> oneshot::Receiver<Result<(), SocketIoError>> {
    let (tx, rx) = oneshot::channel();
    shared
        .namespaces
        .lock()
        .entry(namespace.to_string())
        .or_default()
        .waiters
        .push(tx);
    rx
}

async fn await_namespace_connect(
    shared: &Arc<ClientShared>,
    waiter: oneshot::Receiver<Result<(), SocketIoError>>,
) -> Result<(), SocketIoError> {
    match tokio::time::timeout(shared.config.timeout, waiter).await {
        Ok(Ok(result)) => result,
        Ok(Err(_dropped)) => Err(SocketIoError::ConnectionClosed),
        Err(_elapsed) => Err(SocketIoError::ConnectTimeout),
    }
}

/// Build and send one event packet: binary arguments hoist into numbered
/// attachments that follow the main packet as bare binary frames.
pub(crate) async fn emit_packet(
    shared: &Arc<ClientShared>,
    namespace: &str,
    event: &str,
    args: Vec<Payload>,
    ack_id: Option<u32>,
) -> Result<(), SocketIoError> {
    let (packet, attachments) = build_event_packet(namespace, event, &args, ack_id);
    let sender = shared.sender()?;
    sender.send_message(packet.encode()).await?;
    for attachment in attachments {
        sender.send_binary(attachment.to_vec()).await?;
    }
    Ok(())
}

pub(crate) fn build_event_packet(
    namespace: &str,
    event: &str,
    args: &[Payload],
    ack_id: Option<u32>,
) -> (SocketIoPacket, Vec<Bytes>) {
    let mut attachments = Vec::new();
    let mut data = vec![serde_json::Value::String(event.to_string())];
    for arg in args {
        data.push(arg.to_json(&mut attachments));
    }

    let kind = if attachments.is_empty() {
        PacketKind::Event
    } else {
        PacketKind::BinaryEvent
    };
    let mut packet =
        SocketIoPacket::new(kind, namespace).with_data(serde_json::Value::Array(data));
    if let Some(id) = ack_id {
        packet = packet.with_id(id);
    }
    if !attachments.is_empty() {
        packet = packet.with_attachments(attachments.len() as u32);
    }
    (packet, attachments)
}

pub(crate) async fn emit_with_ack(
    shared: &Arc<ClientShared>,
    namespace: &str,
    event: &str,
    args: Vec<Payload>,
) -> Result<Vec<Payload>, SocketIoError> {
    let id = shared.ack_seq.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    shared.acks.lock().insert(id, tx);

    if let Err(e) = emit_packet(shared, namespace, event, args, Some(id)).await {
        shared.acks.lock().remove(&id);
        return Err(e);
    }

    match tokio::time::timeout(shared.config.timeout, rx).await {
        Ok(Ok(payloads)) => Ok(payloads),
        Ok(Err(_dropped)) => Err(SocketIoError::ConnectionClosed),
        Err(_elapsed) => {
            shared.acks.lock().remove(&id);
            Err(SocketIoError::AckTimeout)
        }
    }
}

/// Dial Engine.IO, announce every joined namespace, and start the driver
/// task that routes the session's events.
fn attach(
    shared: &Arc<ClientShared>,
) -> Pin<Box<dyn Future<Output = Result<(), SocketIoError>> + Send + '_>> {
    Box::pin(attach_inner(shared))
}

async fn attach_inner(shared: &Arc<ClientShared>) -> Result<(), SocketIoError> {
    let mut engine = EngineIoTransport::connect(&shared.config.engine_config()).await?;
    let sender = engine.sender();
    *shared.sender.lock() = Some(sender.clone());

    let joined: Vec<String> = shared.namespaces.lock().keys().cloned().collect();
    for namespace in joined {
        sender
            .send_message(SocketIoPacket::new(PacketKind::Connect, namespace).encode())
            .await?;
    }

    let token = CancellationToken::new();
    *shared.session.lock() = Some(token.clone());

    let shared_for_driver = Arc::clone(shared);
    tokio::spawn(async move {
        let mut pending_binary: Option<(SocketIoPacket, Vec<Bytes>)> = None;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    engine.close();
                    break;
                }
                event = engine.next_event() => {
                    match event {
                        Some(EngineIoEvent::Message(data)) => {
                            handle_message(&shared_for_driver, &data, &mut pending_binary);
                        }
                        Some(EngineIoEvent::Binary(bytes)) => {
                            handle_binary(&shared_for_driver, bytes, &mut pending_binary);
                        }
                        Some(EngineIoEvent::Closed) | None => {
                            handle_closed(&shared_for_driver).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(())
}

fn handle_message(
    shared: &Arc<ClientShared>,
    data: &str,
    pending_binary: &mut Option<(SocketIoPacket, Vec<Bytes>)>,
) {
    let packet = match SocketIoPacket::decode(data) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(error = %e, "undecodable socket.io packet");
            return;
        }
    };

    match packet.kind {
        PacketKind::Connect => {
            let namespace = packet.namespace.clone();
            let waiters = {
                let mut namespaces = shared.namespaces.lock();
                let state = namespaces.entry(namespace.clone()).or_default();
                state.connected = true;
                std::mem::take(&mut state.waiters)
            };
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
            info!(namespace = %namespace, "namespace connected");
            shared.emit_lifecycle(ClientEvent::NamespaceConnected(namespace));
        }
        PacketKind::ConnectError => {
            let namespace = packet.namespace.clone();
            let message = packet
                .data
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("connection rejected")
                .to_string();
            let waiters = {
                let mut namespaces = shared.namespaces.lock();
                let state = namespaces.entry(namespace.clone()).or_default();
                std::mem::take(&mut state.waiters)
            };
            for waiter in waiters {
                let _ = waiter.send(Err(SocketIoError::ConnectError(message.clone())));
            }
            shared.emit_lifecycle(ClientEvent::ConnectError { namespace, message });
        }
        PacketKind::Disconnect => {
            let namespace = packet.namespace.clone();
            if let Some(state) = shared.namespaces.lock().get_mut(&namespace) {
                state.connected = false;
                state.rooms.clear();
            }
            shared.emit_lifecycle(ClientEvent::NamespaceDisconnected(namespace));
        }
        PacketKind::Event => dispatch_event(shared, &packet, &[]),
        PacketKind::Ack => dispatch_ack(shared, &packet, &[]),
        PacketKind::BinaryEvent | PacketKind::BinaryAck => {
            if packet.attachments == 0 {
                // Degenerate but legal: no frames to wait for.
                let kind = packet.kind;
                if kind == PacketKind::BinaryEvent {
                    dispatch_event(shared, &packet, &[]);
                } else {
                    dispatch_ack(shared, &packet, &[]);
                }
            } else {
                *pending_binary = Some((packet, Vec::new()));
            }
        }
    }
}

fn handle_binary(
    shared: &Arc<ClientShared>,
    bytes: Vec<u8>,
    pending_binary: &mut Option<(SocketIoPacket, Vec<Bytes>)>,
) {
    let complete = match pending_binary.as_mut() {
        Some((packet, buffers)) => {
            buffers.push(Bytes::from(bytes));
            buffers.len() == packet.attachments as usize
        }
        None => {
            warn!("binary frame with no pending binary packet");
            return;
        }
    };
    if complete {
        if let Some((packet, buffers)) = pending_binary.take() {
            match packet.kind {
                PacketKind::BinaryAck => dispatch_ack(shared, &packet, &buffers),
                _ => dispatch_event(shared, &packet, &buffers),
            }
        }
    }
}

/// Event name is `data[0]`; everything after it becomes handler arguments.
fn dispatch_event(shared: &Arc<ClientShared>, packet: &SocketIoPacket, attachments: &[Bytes]) {
    let Some(serde_json::Value::Array(items)) = &packet.data else {
        warn!("event packet without array payload");
        return;
    };
    let Some(event) = items.first().and_then(|v| v.as_str()) else {
        warn!("event packet without a name");
        return;
    };
    let args: Vec<Payload> = items[1..]
        .iter()
        .map(|v| Payload::from_json(v, attachments))
        .collect();

    let callbacks: Vec<EventCallback> = shared
        .handlers
        .lock()
        .get(&(packet.namespace.clone(), event.to_string()))
        .cloned()
        .unwrap_or_default();
    debug!(namespace = %packet.namespace, event, handlers = callbacks.len(), "event dispatched");
    for callback in callbacks {
        callback(&args);
    }
}

fn dispatch_ack(shared: &Arc<ClientShared>, packet: &SocketIoPacket, attachments: &[Bytes]) {
    let Some(id) = packet.id else {
        warn!("ack packet without id");
        return;
    };
    let Some(waiter) = shared.acks.lock().remove(&id) else {
        debug!(id, "ack for unknown or timed-out request");
        return;
    };
    let args: Vec<Payload> = match &packet.data {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| Payload::from_json(v, attachments))
            .collect(),
        _ => Vec::new(),
    };
    let _ = waiter.send(args);
}

fn drop_session_state(shared: &Arc<ClientShared>) {
    *shared.sender.lock() = None;
    shared.acks.lock().clear();
    let mut namespaces = shared.namespaces.lock();
    for state in namespaces.values_mut() {
        state.connected = false;
        state.rooms.clear();
        state.waiters.clear();
    }
}

/// Session loss: reset per-session state, then hand control to the backoff
/// strategy unless the user asked for the disconnect.
async fn handle_closed(shared: &Arc<ClientShared>) {
    drop_session_state(shared);
    shared.emit_lifecycle(ClientEvent::Disconnected);

    if shared.closed.load(Ordering::SeqCst) || !shared.config.reconnect {
        return;
    }

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let mut strategy = ExponentialBackoffStrategy::new(
            shared.config.reconnection_delay,
            2.0,
            shared.config.reconnection_delay_max,
        );
        strategy.max_attempts = Some(shared.config.reconnection_attempts);

        let mut attempt = 1u32;
        loop {
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            let Some(delay) = strategy.next_delay(attempt, &NexusError::NotConnected) else {
                break;
            };
            shared.emit_lifecycle(ClientEvent::Reconnecting(attempt));
            tokio::time::sleep(delay).await;
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            match attach(&shared).await {
                Ok(()) => {
                    info!(attempt, "socket.io session re-established");
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "socket.io reconnect failed");
                    attempt += 1;
                }
            }
        }
    });
}
