pub mod packet;
pub mod transport;

pub use packet::{parse_handshake, EngineIoPacket, Handshake};
pub use transport::{EngineIoEvent, EngineIoSender, EngineIoTransport};
