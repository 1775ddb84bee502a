//! Drives a real `Connection` against an in-process TCP server speaking
//! the length-prefixed binary frame protocol: heartbeat round-trips,
//! request/response demultiplexing, cache short-circuiting, and the
//! no-reconnect-on-auth-failure rule.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexuskit_core::{
    Connection, ConnectionConfiguration, ConnectionEvent, ConnectionState, DisconnectReason,
    Endpoint, FixedStrategy, HeartbeatConfig, HeartbeatMode, NexusError,
};
use nexuskit_middleware::builtin::{CacheMiddleware, TierConfig};
use nexuskit_proto::limits::FrameLimits;
use nexuskit_proto::{Frame, FrameReader, Header};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HEARTBEAT_FUNCTION_ID: u32 = 0xFFFF;

struct ServerBehaviour {
    ack_heartbeats: bool,
    echo_requests: bool,
}

async fn serve_connection(mut stream: TcpStream, behaviour: Arc<ServerBehaviour>, requests: Arc<AtomicUsize>) {
    let mut framer = FrameReader::new(FrameLimits::default());
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        framer.buf_mut().extend_from_slice(&chunk[..n]);
        let frames = match framer.drain_frames() {
            Ok(frames) => frames,
            Err(_) => return,
        };
        for frame in frames {
            if frame.header.function_id == HEARTBEAT_FUNCTION_ID {
                if frame.header.response_flag == 0 && behaviour.ack_heartbeats {
                    let mut header = frame.header;
                    header.response_flag = 1;
                    header.code = 200;
                    let ack = Frame::new(header, bytes::Bytes::new()).encode();
                    if stream.write_all(&ack).await.is_err() {
                        return;
                    }
                }
                continue;
            }
            if frame.header.response_flag == 0 && behaviour.echo_requests {
                requests.fetch_add(1, Ordering::SeqCst);
                let mut header = frame.header;
                header.response_flag = 1;
                header.code = 200;
                let response = Frame::new(header, frame.body.clone()).encode();
                if stream.write_all(&response).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn start_server(behaviour: ServerBehaviour) -> (u16, Arc<AtomicUsize>) {
    let _ = tracing_subscriber::fmt::try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let behaviour = Arc::new(behaviour);
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_for_server = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(
                stream,
                Arc::clone(&behaviour),
                Arc::clone(&requests_for_server),
            ));
        }
    });
    (port, requests)
}

fn config(port: u16, heartbeat: HeartbeatConfig) -> ConnectionConfiguration {
    ConnectionConfiguration::new(
        "itest",
        Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port,
        },
    )
    .with_heartbeat(heartbeat)
}

fn no_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        enabled: false,
        ..HeartbeatConfig::default()
    }
}

fn no_retry() -> Box<FixedStrategy> {
    Box::new(FixedStrategy::new(Duration::from_millis(10), Some(0)))
}

async fn wait_for_state(conn: &Arc<Connection>, wanted: ConnectionState, deadline: Duration) {
    let result = tokio::time::timeout(deadline, async {
        loop {
            if conn.state() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "never reached {wanted:?}, stuck at {:?}", conn.state());
}

#[tokio::test]
async fn connect_then_disconnect_ends_disconnected() {
    let (port, _) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: true,
    })
    .await;

    let conn = Connection::new(config(port, no_heartbeat()), no_retry());
    conn.connect().await.expect("connect");
    assert_eq!(conn.state(), ConnectionState::Connected);

    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("disconnect");
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // Idempotent: a second disconnect is a no-op in the same terminal state.
    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("second disconnect");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn heartbeats_are_acked_and_rtt_recorded() {
    let (port, _) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: false,
    })
    .await;

    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(50),
        timeout: Duration::from_secs(5),
        enabled: true,
        mode: HeartbeatMode::Client,
        adaptive: false,
    };
    let conn = Connection::new(config(port, heartbeat), no_retry());
    conn.connect().await.expect("connect");

    let acked = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(stats) = conn.heartbeat_stats() {
                if stats.received >= 1 {
                    return stats;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("heartbeat ack within deadline");
    assert!(acked.sent >= acked.received);
    assert_eq!(acked.failed, 0);

    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("disconnect");
}

#[tokio::test]
async fn request_response_resolves_the_matching_awaiter() {
    let (port, requests) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: true,
    })
    .await;

    let conn = Connection::new(config(port, no_heartbeat()), no_retry());
    conn.connect().await.expect("connect");

    let first: String = conn
        .send_request(&"Hello Server!".to_string(), 1, Some(Duration::from_secs(5)))
        .await
        .expect("first request");
    assert_eq!(first, "Hello Server!");

    let second: String = conn
        .send_request(&"Another".to_string(), 2, Some(Duration::from_secs(5)))
        .await
        .expect("second request");
    assert_eq!(second, "Another");

    assert_eq!(requests.load(Ordering::SeqCst), 2);

    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("disconnect");
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_response() {
    let (port, _) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: true,
    })
    .await;

    let conn = Connection::new(config(port, no_heartbeat()), no_retry());
    conn.connect().await.expect("connect");

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let conn = Arc::clone(&conn);
        handles.push(tokio::spawn(async move {
            let body = format!("payload-{i}");
            let reply: String = conn
                .send_request(&body, i + 1, Some(Duration::from_secs(5)))
                .await
                .expect("request");
            assert_eq!(reply, body);
        }));
    }
    for handle in handles {
        handle.await.expect("request task");
    }

    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("disconnect");
}

#[tokio::test]
async fn identical_request_is_served_from_the_cache() {
    let (port, requests) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: true,
    })
    .await;

    let cache = Arc::new(CacheMiddleware::new("cache", 10, TierConfig::default()));
    let cfg = config(port, no_heartbeat()).with_middleware(cache.clone());
    let conn = Connection::new(cfg, no_retry());
    conn.connect().await.expect("connect");

    let first: String = conn
        .send_request(&"cache me".to_string(), 7, Some(Duration::from_secs(5)))
        .await
        .expect("first request");
    let second: String = conn
        .send_request(&"cache me".to_string(), 7, Some(Duration::from_secs(5)))
        .await
        .expect("second request");

    assert_eq!(first, second);
    assert_eq!(requests.load(Ordering::SeqCst), 1, "second request must not hit the wire");
    assert_eq!(cache.stats().hits(), 1);
    assert_eq!(cache.stats().misses(), 1);

    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("disconnect");
}

#[tokio::test]
async fn heartbeat_timeout_disconnects_a_silent_server() {
    let (port, _) = start_server(ServerBehaviour {
        ack_heartbeats: false,
        echo_requests: false,
    })
    .await;

    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(40),
        timeout: Duration::from_millis(80),
        enabled: true,
        mode: HeartbeatMode::Client,
        adaptive: false,
    };
    let conn = Connection::new(config(port, heartbeat), no_retry());

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let reasons_for_handler = Arc::clone(&reasons);
    conn.on(move |event| {
        if let ConnectionEvent::Disconnected(reason) = event {
            reasons_for_handler.lock().push(reason.reason);
        }
    });

    conn.connect().await.expect("connect");
    wait_for_state(&conn, ConnectionState::Disconnected, Duration::from_secs(5)).await;

    let reasons = reasons.lock();
    assert!(
        reasons
            .iter()
            .any(|r| *r == nexuskit_core::state::DisconnectReasonKind::HeartbeatTimeout),
        "expected a heartbeat-timeout disconnect, saw {reasons:?}"
    );
}

#[tokio::test]
async fn authentication_failure_never_enters_reconnecting() {
    let (port, _) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: true,
    })
    .await;

    // A generous retry budget that would reconnect if the error allowed it.
    let strategy = Box::new(FixedStrategy::new(Duration::from_millis(10), Some(100)));
    let conn = Connection::new(config(port, no_heartbeat()), strategy);

    let states = Arc::new(Mutex::new(Vec::new()));
    let states_for_handler = Arc::clone(&states);
    conn.on(move |event| {
        if let ConnectionEvent::StateChange(_, new) = event {
            states_for_handler.lock().push(*new);
        }
    });

    conn.connect().await.expect("connect");
    conn.fail(NexusError::AuthenticationFailed).await;

    wait_for_state(&conn, ConnectionState::Disconnected, Duration::from_secs(5)).await;
    let states = states.lock();
    assert!(
        !states
            .iter()
            .any(|s| matches!(s, ConnectionState::Reconnecting(_))),
        "auth failure must not trigger reconnection, saw {states:?}"
    );
}

#[tokio::test]
async fn lost_transport_reconnects_and_recovers() {
    let (port, _) = start_server(ServerBehaviour {
        ack_heartbeats: true,
        echo_requests: true,
    })
    .await;

    let strategy = Box::new(FixedStrategy::new(Duration::from_millis(20), Some(50)));
    let conn = Connection::new(config(port, no_heartbeat()), strategy);

    let saw_reconnecting = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&saw_reconnecting);
    conn.on(move |event| {
        if let ConnectionEvent::StateChange(_, ConnectionState::Reconnecting(_)) = event {
            *flag.lock() = true;
        }
    });

    conn.connect().await.expect("connect");

    // Kill the live session from the client side of the socket by failing
    // it with a retryable error.
    conn.fail(NexusError::Disconnected(DisconnectReason::NetworkLost))
        .await;

    wait_for_state(&conn, ConnectionState::Connected, Duration::from_secs(5)).await;
    assert!(*saw_reconnecting.lock());

    let reply: String = conn
        .send_request(&"after-reconnect".to_string(), 3, Some(Duration::from_secs(5)))
        .await
        .expect("request after reconnect");
    assert_eq!(reply, "after-reconnect");

    conn.disconnect(DisconnectReason::ClientInitiated)
        .await
        .expect("disconnect");
}
