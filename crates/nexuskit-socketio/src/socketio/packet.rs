//! Socket.IO v5 packet codec, layered on Engine.IO MESSAGE payloads.
//!
//! String format: `<type digit>[<attachments>'-'][<namespace>','][<id>][<json>]`.
//! The namespace is present only when it is not `/`; the JSON payload is an
//! array.

use crate::error::SocketIoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketKind {
    fn digit(self) -> char {
        match self {
            PacketKind::Connect => '0',
            PacketKind::Disconnect => '1',
            PacketKind::Event => '2',
            PacketKind::Ack => '3',
            PacketKind::ConnectError => '4',
            PacketKind::BinaryEvent => '5',
            PacketKind::BinaryAck => '6',
        }
    }

    fn from_digit(c: char) -> Option<PacketKind> {
        match c {
            '0' => Some(PacketKind::Connect),
            '1' => Some(PacketKind::Disconnect),
            '2' => Some(PacketKind::Event),
            '3' => Some(PacketKind::Ack),
            '4' => Some(PacketKind::ConnectError),
            '5' => Some(PacketKind::BinaryEvent),
            '6' => Some(PacketKind::BinaryAck),
            _ => None,
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, PacketKind::BinaryEvent | PacketKind::BinaryAck)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketIoPacket {
    pub kind: PacketKind,
    pub namespace: String,
    pub data: Option<serde_json::Value>,
    pub id: Option<u32>,
    /// Number of binary frames following this packet.
    pub attachments: u32,
}

impl SocketIoPacket {
    pub fn new(kind: PacketKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            data: None,
            id: None,
            attachments: 0,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_attachments(mut self, n: u32) -> Self {
        self.attachments = n;
        self
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.kind.is_binary() {
            out.push_str(&self.attachments.to_string());
            out.push('-');
        }
        if self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(raw: &str) -> Result<SocketIoPacket, SocketIoError> {
        let mut chars = raw.char_indices().peekable();
        let (_, type_char) = chars
            .next()
            .ok_or_else(|| SocketIoError::InvalidPacketFormat("empty packet".into()))?;
        let kind = PacketKind::from_digit(type_char).ok_or_else(|| {
            SocketIoError::InvalidPacketFormat(format!("unknown packet type '{type_char}'"))
        })?;

        let mut rest = &raw[type_char.len_utf8()..];

        // <attachments>'-' only on binary packets.
        let mut attachments = 0u32;
        if kind.is_binary() {
            let dash = rest.find('-').ok_or_else(|| {
                SocketIoError::InvalidPacketFormat("binary packet without attachment count".into())
            })?;
            attachments = rest[..dash].parse().map_err(|_| {
                SocketIoError::InvalidPacketFormat("malformed attachment count".into())
            })?;
            rest = &rest[dash + 1..];
        }

        // '/'-prefixed namespace terminated by ','.
        let mut namespace = "/".to_string();
        if rest.starts_with('/') {
            let comma = rest.find(',').ok_or_else(|| {
                SocketIoError::InvalidPacketFormat("unterminated namespace".into())
            })?;
            namespace = rest[..comma].to_string();
            rest = &rest[comma + 1..];
        }

        // Optional ack id: leading decimal digits.
        let id_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if id_len > 0 {
            Some(rest[..id_len].parse().map_err(|_| {
                SocketIoError::InvalidPacketFormat("ack id out of range".into())
            })?)
        } else {
            None
        };
        rest = &rest[id_len..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest).map_err(|e| {
                SocketIoError::InvalidPacketFormat(format!("bad JSON payload: {e}"))
            })?)
        };

        Ok(SocketIoPacket {
            kind,
            namespace,
            data,
            id,
            attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_connect_is_the_default_namespace() {
        let packet = SocketIoPacket::decode("0").unwrap();
        assert_eq!(packet.kind, PacketKind::Connect);
        assert_eq!(packet.namespace, "/");
        assert!(packet.data.is_none());
        assert_eq!(SocketIoPacket::new(PacketKind::Connect, "/").encode(), "0");
    }

    #[test]
    fn namespaced_connect_round_trips() {
        let packet = SocketIoPacket::decode("0/admin,").unwrap();
        assert_eq!(packet.namespace, "/admin");
        assert_eq!(
            SocketIoPacket::new(PacketKind::Connect, "/admin").encode(),
            "0/admin,"
        );
    }

    #[test]
    fn event_with_payload_round_trips() {
        let raw = r#"2["hello",1]"#;
        let packet = SocketIoPacket::decode(raw).unwrap();
        assert_eq!(packet.kind, PacketKind::Event);
        assert_eq!(packet.namespace, "/");
        assert_eq!(packet.data, Some(serde_json::json!(["hello", 1])));
        assert_eq!(packet.encode(), raw);
    }

    #[test]
    fn namespaced_event_with_ack_id() {
        let raw = r#"2/admin,12["project:delete",123]"#;
        let packet = SocketIoPacket::decode(raw).unwrap();
        assert_eq!(packet.namespace, "/admin");
        assert_eq!(packet.id, Some(12));
        assert_eq!(packet.data, Some(serde_json::json!(["project:delete", 123])));
        assert_eq!(packet.encode(), raw);
    }

    #[test]
    fn ack_without_namespace() {
        let raw = "312[]";
        let packet = SocketIoPacket::decode(raw).unwrap();
        assert_eq!(packet.kind, PacketKind::Ack);
        assert_eq!(packet.id, Some(12));
        assert_eq!(packet.data, Some(serde_json::json!([])));
        assert_eq!(packet.encode(), raw);
    }

    #[test]
    fn binary_event_declares_attachments() {
        let raw = r#"51-["file",{"_placeholder":true,"num":0}]"#;
        let packet = SocketIoPacket::decode(raw).unwrap();
        assert_eq!(packet.kind, PacketKind::BinaryEvent);
        assert_eq!(packet.attachments, 1);
        assert_eq!(packet.encode(), raw);
    }

    #[test]
    fn connect_error_carries_a_message_object() {
        let raw = r#"4{"message":"Not authorized"}"#;
        let packet = SocketIoPacket::decode(raw).unwrap();
        assert_eq!(packet.kind, PacketKind::ConnectError);
        assert_eq!(
            packet.data,
            Some(serde_json::json!({"message": "Not authorized"}))
        );
    }

    #[test]
    fn malformed_packets_are_rejected() {
        assert!(SocketIoPacket::decode("").is_err());
        assert!(SocketIoPacket::decode("7").is_err());
        assert!(SocketIoPacket::decode("5[\"x\"]").is_err()); // binary without count
        assert!(SocketIoPacket::decode("2/admin[\"x\"]").is_err()); // unterminated nsp
        assert!(SocketIoPacket::decode("2{not json").is_err());
    }
}
