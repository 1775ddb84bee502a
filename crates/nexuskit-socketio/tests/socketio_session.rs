//! Drives the full client stack against a minimal in-process Socket.IO
//! server that speaks just enough Engine.IO v4 + Socket.IO v5 to exercise
//! the handshake, ping liveness, event routing, ACKs, and binary
//! attachments.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nexuskit_socketio::{PacketKind, Payload, SocketIoClient, SocketIoConfig, SocketIoPacket};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

struct ServerProbe {
    upgrade_uri: Mutex<String>,
    pings: AtomicUsize,
    ping_seen: Notify,
}

impl ServerProbe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            upgrade_uri: Mutex::new(String::new()),
            pings: AtomicUsize::new(0),
            ping_seen: Notify::new(),
        })
    }
}

const HANDSHAKE: &str =
    r#"0{"sid":"test-sid","upgrades":[],"pingInterval":300,"pingTimeout":1000}"#;

async fn serve(stream: TcpStream, probe: Arc<ServerProbe>) {
    let uri_probe = Arc::clone(&probe);
    let callback = move |req: &Request, response: Response| {
        *uri_probe.upgrade_uri.lock() = req.uri().to_string();
        Ok(response)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .expect("websocket accept");

    ws.send(Message::Text(HANDSHAKE.into())).await.expect("send handshake");

    let mut pending: Option<(SocketIoPacket, Vec<Vec<u8>>)> = None;
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let text = text.as_str();
                match text.chars().next() {
                    Some('2') => {
                        probe.pings.fetch_add(1, Ordering::SeqCst);
                        probe.ping_seen.notify_waiters();
                        ws.send(Message::Text("3".into())).await.expect("send pong");
                    }
                    Some('4') => {
                        let packet =
                            SocketIoPacket::decode(&text[1..]).expect("decodable packet");
                        handle_packet(&mut ws, packet, &mut pending).await;
                    }
                    Some('1') => break,
                    _ => {}
                }
            }
            Message::Binary(bytes) => {
                let complete = match pending.as_mut() {
                    Some((packet, buffers)) => {
                        buffers.push(bytes.to_vec());
                        buffers.len() == packet.attachments as usize
                    }
                    None => false,
                };
                if complete {
                    if let Some((packet, buffers)) = pending.take() {
                        mirror_binary(&mut ws, packet, buffers).await;
                    }
                }
            }
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload)).await.expect("send pong frame");
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn handle_packet(
    ws: &mut WebSocketStream<TcpStream>,
    packet: SocketIoPacket,
    pending: &mut Option<(SocketIoPacket, Vec<Vec<u8>>)>,
) {
    match packet.kind {
        PacketKind::Connect => {
            let nsp_prefix = if packet.namespace == "/" {
                String::new()
            } else {
                format!("{},", packet.namespace)
            };
            ws.send(Message::Text(
                format!(r#"40{nsp_prefix}{{"sid":"ns-sid"}}"#).into(),
            ))
            .await
            .expect("send connect ack");
        }
        PacketKind::Event => {
            let Some(serde_json::Value::Array(items)) = &packet.data else {
                return;
            };
            match items.first().and_then(|v| v.as_str()) {
                Some("shout") => {
                    let mut reply = vec![serde_json::json!("shouted")];
                    reply.extend(items[1..].iter().cloned());
                    ws.send(Message::Text(
                        format!("42{}", serde_json::Value::Array(reply)).into(),
                    ))
                    .await
                    .expect("send echo event");
                }
                Some("sum") => {
                    let total: f64 = items[1..]
                        .iter()
                        .filter_map(|v| v.as_f64())
                        .sum();
                    let id = packet.id.expect("sum is always acked");
                    ws.send(Message::Text(format!("43{id}[{total}]").into()))
                        .await
                        .expect("send ack");
                }
                _ => {}
            }
        }
        PacketKind::BinaryEvent => {
            *pending = Some((packet, Vec::new()));
        }
        _ => {}
    }
}

/// Replies to a fully-buffered binary event with a `mirror` binary event
/// carrying the same attachments back.
async fn mirror_binary(
    ws: &mut WebSocketStream<TcpStream>,
    packet: SocketIoPacket,
    buffers: Vec<Vec<u8>>,
) {
    let mut data = vec![serde_json::json!("mirror")];
    for (num, _) in buffers.iter().enumerate() {
        data.push(serde_json::json!({"_placeholder": true, "num": num}));
    }
    let count = buffers.len();
    let nsp_prefix = if packet.namespace == "/" {
        String::new()
    } else {
        format!("{},", packet.namespace)
    };
    ws.send(Message::Text(
        format!("45{count}-{nsp_prefix}{}", serde_json::Value::Array(data)).into(),
    ))
    .await
    .expect("send mirror event");
    for buffer in buffers {
        ws.send(Message::Binary(buffer.into())).await.expect("send attachment");
    }
}

async fn start_server() -> (String, Arc<ServerProbe>) {
    let _ = tracing_subscriber::fmt::try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let probe = ServerProbe::new();
    let probe_for_server = Arc::clone(&probe);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Arc::clone(&probe_for_server)));
        }
    });
    (format!("http://127.0.0.1:{}", addr.port()), probe)
}

#[tokio::test]
async fn handshake_connects_and_pings_within_the_interval() {
    let (url, probe) = start_server().await;
    let client = SocketIoClient::new(SocketIoConfig::new(url));

    tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect should not hang")
        .expect("connect should succeed");

    let uri = probe.upgrade_uri.lock().clone();
    assert!(uri.contains("EIO=4"), "upgrade URI was {uri}");
    assert!(uri.contains("transport=websocket"), "upgrade URI was {uri}");
    assert!(uri.contains("/socket.io/"), "upgrade URI was {uri}");

    tokio::time::timeout(Duration::from_secs(2), probe.ping_seen.notified())
        .await
        .expect("client should ping within the advertised interval");
    assert!(probe.pings.load(Ordering::SeqCst) >= 1);

    client.disconnect().await;
}

#[tokio::test]
async fn events_route_to_handlers_and_acks_resolve() {
    let (url, _probe) = start_server().await;
    let client = SocketIoClient::new(SocketIoConfig::new(url));
    client.connect().await.expect("connect");

    let echoed = Arc::new(Mutex::new(Vec::new()));
    let echoed_for_handler = Arc::clone(&echoed);
    let notify = Arc::new(Notify::new());
    let notify_for_handler = Arc::clone(&notify);
    client.on("shouted", move |args| {
        echoed_for_handler.lock().push(args.to_vec());
        notify_for_handler.notify_waiters();
    });

    client
        .emit("shout", vec![Payload::Text("hello".into())])
        .await
        .expect("emit");
    tokio::time::timeout(Duration::from_secs(5), notify.notified())
        .await
        .expect("echo should arrive");
    assert_eq!(echoed.lock()[0], vec![Payload::Text("hello".into())]);

    let ack = tokio::time::timeout(
        Duration::from_secs(5),
        client.emit_with_ack("sum", vec![Payload::Number(19.0), Payload::Number(23.0)]),
    )
    .await
    .expect("ack should not hang")
    .expect("ack should resolve");
    assert_eq!(ack, vec![Payload::Number(42.0)]);

    client.disconnect().await;
}

#[tokio::test]
async fn binary_attachments_survive_the_round_trip() {
    let (url, _probe) = start_server().await;
    let client = SocketIoClient::new(SocketIoConfig::new(url));
    client.connect().await.expect("connect");

    let mirrored = Arc::new(Mutex::new(Vec::new()));
    let mirrored_for_handler = Arc::clone(&mirrored);
    let notify = Arc::new(Notify::new());
    let notify_for_handler = Arc::clone(&notify);
    client.on("mirror", move |args| {
        mirrored_for_handler.lock().push(args.to_vec());
        notify_for_handler.notify_waiters();
    });

    client
        .emit(
            "upload",
            vec![
                Payload::Bytes(Bytes::from_static(b"\x01\x02")),
                Payload::Bytes(Bytes::from_static(b"\x03\x04\x05")),
            ],
        )
        .await
        .expect("emit binary");

    tokio::time::timeout(Duration::from_secs(5), notify.notified())
        .await
        .expect("mirror should arrive");
    assert_eq!(
        mirrored.lock()[0],
        vec![
            Payload::Bytes(Bytes::from_static(b"\x01\x02")),
            Payload::Bytes(Bytes::from_static(b"\x03\x04\x05")),
        ]
    );

    client.disconnect().await;
}

#[tokio::test]
async fn namespaced_join_tracks_rooms_locally() {
    let (url, _probe) = start_server().await;
    let client = SocketIoClient::new(SocketIoConfig::new(url));
    client.connect().await.expect("connect");

    let admin = client.namespace("/admin").await.expect("join namespace");
    admin.join("ops").await.expect("join room");
    admin.join("oncall").await.expect("join room");
    let mut rooms = admin.rooms();
    rooms.sort();
    assert_eq!(rooms, vec!["oncall".to_string(), "ops".to_string()]);

    admin.leave("ops").await.expect("leave room");
    assert_eq!(admin.rooms(), vec!["oncall".to_string()]);

    client.disconnect().await;
    assert!(admin.rooms().is_empty());
}
