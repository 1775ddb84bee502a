//! Engine.IO / Socket.IO client for NexusKit.
//!
//! Two layers over one WebSocket: [`engineio`] speaks the Engine.IO v4
//! session protocol (OPEN handshake, ping/pong liveness, MESSAGE frames);
//! [`socketio`] multiplexes Socket.IO v5 namespaces on top, with event
//! routing, acknowledgements, client-side room bookkeeping, and binary
//! attachment reassembly. Event arguments are the [`payload::Payload`]
//! tree, typed at the edge via `TryFrom`.

pub mod config;
pub mod engineio;
pub mod error;
pub mod payload;
pub mod socketio;

pub use config::{EngineIoConfig, SocketIoConfig};
pub use engineio::{EngineIoEvent, EngineIoTransport, Handshake};
pub use error::SocketIoError;
pub use payload::Payload;
pub use socketio::{ClientEvent, Namespace, PacketKind, SocketIoClient, SocketIoPacket};
