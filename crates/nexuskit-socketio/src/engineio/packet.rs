//! Engine.IO v4 packet codec.
//!
//! Text packets are a single ASCII digit type followed by optional string
//! data; WebSocket framing supplies the boundaries, so there is no length
//! prefix. Binary payloads travel as raw WebSocket binary frames with no
//! type digit at all.

use serde::Deserialize;

use crate::error::SocketIoError;

/// The handshake payload delivered in the first OPEN packet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineIoPacket {
    /// Type `0`, carrying the JSON handshake.
    Open(String),
    /// Type `1`.
    Close,
    /// Type `2`, optional probe payload.
    Ping(Option<String>),
    /// Type `3`, optional probe payload.
    Pong(Option<String>),
    /// Type `4`, the application payload.
    Message(String),
    /// Type `5`, ignored by this client.
    Upgrade,
    /// Type `6`, ignored by this client.
    Noop,
}

impl EngineIoPacket {
    pub fn encode(&self) -> String {
        match self {
            EngineIoPacket::Open(data) => format!("0{data}"),
            EngineIoPacket::Close => "1".to_string(),
            EngineIoPacket::Ping(None) => "2".to_string(),
            EngineIoPacket::Ping(Some(data)) => format!("2{data}"),
            EngineIoPacket::Pong(None) => "3".to_string(),
            EngineIoPacket::Pong(Some(data)) => format!("3{data}"),
            EngineIoPacket::Message(data) => format!("4{data}"),
            EngineIoPacket::Upgrade => "5".to_string(),
            EngineIoPacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(raw: &str) -> Result<EngineIoPacket, SocketIoError> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SocketIoError::InvalidPacketFormat("empty packet".into()))?;
        let rest = &raw[kind.len_utf8()..];
        match kind {
            '0' => Ok(EngineIoPacket::Open(rest.to_string())),
            '1' => Ok(EngineIoPacket::Close),
            '2' => Ok(EngineIoPacket::Ping(non_empty(rest))),
            '3' => Ok(EngineIoPacket::Pong(non_empty(rest))),
            '4' => Ok(EngineIoPacket::Message(rest.to_string())),
            '5' => Ok(EngineIoPacket::Upgrade),
            '6' => Ok(EngineIoPacket::Noop),
            other => Err(SocketIoError::InvalidPacketFormat(format!(
                "unknown packet type '{other}'"
            ))),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Parse the body of an OPEN packet into a [`Handshake`].
pub fn parse_handshake(data: &str) -> Result<Handshake, SocketIoError> {
    let handshake: Handshake =
        serde_json::from_str(data).map_err(|e| SocketIoError::InvalidHandshake(e.to_string()))?;
    if handshake.sid.is_empty() {
        return Err(SocketIoError::InvalidHandshake("empty sid".into()));
    }
    if handshake.ping_interval == 0 {
        return Err(SocketIoError::InvalidHandshake("pingInterval must be positive".into()));
    }
    Ok(handshake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_packet_carries_the_handshake_json() {
        let raw = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
        let packet = EngineIoPacket::decode(raw).unwrap();
        let EngineIoPacket::Open(body) = packet else {
            panic!("expected OPEN");
        };
        let handshake = parse_handshake(&body).unwrap();
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.ping_interval, 25000);
        assert_eq!(handshake.ping_timeout, 20000);
    }

    #[test]
    fn ping_pong_and_message_round_trip() {
        assert_eq!(EngineIoPacket::decode("2").unwrap(), EngineIoPacket::Ping(None));
        assert_eq!(
            EngineIoPacket::decode("2probe").unwrap(),
            EngineIoPacket::Ping(Some("probe".into()))
        );
        assert_eq!(EngineIoPacket::Ping(None).encode(), "2");
        assert_eq!(EngineIoPacket::Pong(None).encode(), "3");
        assert_eq!(
            EngineIoPacket::decode("4hello").unwrap(),
            EngineIoPacket::Message("hello".into())
        );
        assert_eq!(EngineIoPacket::Message("hi".into()).encode(), "4hi");
    }

    #[test]
    fn empty_and_unknown_packets_are_rejected() {
        assert!(EngineIoPacket::decode("").is_err());
        assert!(EngineIoPacket::decode("9").is_err());
    }

    #[test]
    fn handshake_requires_sid_and_interval() {
        assert!(parse_handshake(r#"{"sid":"","pingInterval":25000,"pingTimeout":20000}"#).is_err());
        assert!(parse_handshake(r#"{"sid":"x","pingInterval":0,"pingTimeout":20000}"#).is_err());
        assert!(parse_handshake("not-json").is_err());
    }
}
