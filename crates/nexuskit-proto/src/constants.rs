//! Wire-format constants for the binary frame protocol.
//!
//! For payload size limits, see the [`limits`](crate::limits) module.

/// Magic tag at the start of every header. Big-endian `0x7A5A`.
pub const TAG: u16 = 0x7A5A;

/// Wire-format protocol version carried in the header.
pub const VERSION: u16 = 1;

/// Fixed header length in bytes (wire format): tag(2) + ver(2) + type_flags(1)
/// + response_flag(1) + request_id(4) + function_id(4) + code(4) + reserved(2).
pub const HEADER_LEN: usize = 20;

/// Length-prefix size in bytes. The length covers header + body.
pub const LEN_PREFIX: usize = 4;

/// `function_id` reserved to mark heartbeat request/ack frames.
pub const HEARTBEAT_FUNCTION_ID: u32 = 0xFFFF;

/// `type_flags` bit marking a frame as an idle/heartbeat frame.
pub const FLAG_HEARTBEAT: u8 = 1 << 0;

/// `type_flags` bit marking a compressed body.
pub const FLAG_COMPRESSED: u8 = 1 << 5;

/// Default bound on the per-connection receive buffer.
pub const DEFAULT_MAX_BUFFERED: usize = 1024 * 1024;
