//! The transport stack for NexusKit: TCP, WebSocket, SOCKS5 tunnelling and
//! TLS, all composed behind one byte-stream abstraction so the connection
//! state machine never needs to know which concrete stack it's driving.

pub mod error;
pub mod io_bridge;
pub mod socks5;
pub mod tcp;
pub mod tls;
pub mod transport;
pub mod ws;

pub use error::TransportError;
pub use socks5::{Socks5Auth, Socks5Transport};
pub use tcp::TcpTransport;
pub use tls::{CertPin, CipherPolicy, TlsConfig, TlsInfo, TlsTransport, TlsVersion};
pub use transport::{PeerInfo, Transport};
pub use ws::{WebSocketTransport, WsPayload};
