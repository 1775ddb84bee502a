//! NexusKit connection core.
//!
//! This crate owns the connection lifecycle: a per-connection state
//! machine driving a composed transport stack (TCP, optional SOCKS5
//! tunnel, optional TLS) with a length-prefixed binary request/response
//! protocol, keep-alive heartbeats, pluggable reconnection backoff, and a
//! bidirectional middleware pipeline around every frame.
//!
//! # Architecture
//!
//! - [`connection`]: the state machine that owns the stack and its tasks
//! - [`config`]: endpoint, transport and heartbeat configuration
//! - [`heartbeat`]: keep-alive timer, RTT accounting, timeout detection
//! - [`reconnect`]: backoff strategies (fixed, exponential, adaptive)
//! - [`state`]: lifecycle states, disconnect reasons, fan-out events
//! - [`error`]: the public error type aggregating every layer

pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod reconnect;
pub mod state;
pub mod window;

pub use config::{
    ConnectionConfiguration, Endpoint, HeartbeatConfig, HeartbeatMode, ProxyConfig, TlsSettings,
};
pub use connection::Connection;
pub use error::NexusError;
pub use heartbeat::{HeartbeatManager, HeartbeatStats};
pub use reconnect::{
    AdaptiveStrategy, CustomStrategy, ExponentialBackoffStrategy, FixedStrategy, ReconnectStrategy,
};
pub use state::{ConnectionEvent, ConnectionState, DisconnectReason};
