pub mod client;
pub mod namespace;
pub mod packet;

pub use client::{ClientEvent, SocketIoClient};
pub use namespace::Namespace;
pub use packet::{PacketKind, SocketIoPacket};
