//! Wire format and protocol adapter for NexusKit's binary request/response
//! protocol: a 4-byte length prefix, a fixed 20-byte header, and an optional
//! compressed body. See [`frame`] for the wire codec and [`adapter`] for the
//! request/response demultiplexer built on top of it.

pub mod adapter;
pub mod codec;
pub mod compression;
pub mod constants;
pub mod error;
pub mod frame;
pub mod header;
pub mod limits;

pub use adapter::{ControlEvent, PendingTable, ProtocolAdapter, ProtocolEvent, ResponsePayload};
pub use codec::{JsonCodec, PayloadCodec};
pub use error::ProtoError;
pub use frame::{Frame, FrameReader};
pub use header::Header;
