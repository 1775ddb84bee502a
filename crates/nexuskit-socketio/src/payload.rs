//! Dynamically-shaped event arguments as a statically-typed sum.
//!
//! Socket.IO events carry arbitrary JSON plus raw binary attachments; this
//! tree is what handlers receive and what `emit` accepts. Typed extraction
//! happens at the edge via `TryFrom`.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::SocketIoError;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Bytes(Bytes),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
}

impl Payload {
    /// Convert a JSON value into a payload tree, resolving binary
    /// placeholders (`{"_placeholder":true,"num":k}`) against
    /// `attachments[k]`.
    pub fn from_json(value: &serde_json::Value, attachments: &[Bytes]) -> Payload {
        if let Some(idx) = placeholder_index(value) {
            return attachments
                .get(idx)
                .map(|b| Payload::Bytes(b.clone()))
                .unwrap_or(Payload::Null);
        }
        match value {
            serde_json::Value::Null => Payload::Null,
            serde_json::Value::Bool(b) => Payload::Bool(*b),
            serde_json::Value::Number(n) => Payload::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Payload::Text(s.clone()),
            serde_json::Value::Array(items) => Payload::Array(
                items
                    .iter()
                    .map(|v| Payload::from_json(v, attachments))
                    .collect(),
            ),
            serde_json::Value::Object(map) => Payload::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Payload::from_json(v, attachments)))
                    .collect(),
            ),
        }
    }

    /// Convert into a JSON value, extracting every `Bytes` leaf into
    /// `attachments` and leaving a numbered placeholder in its place.
    pub fn to_json(&self, attachments: &mut Vec<Bytes>) -> serde_json::Value {
        match self {
            Payload::Null => serde_json::Value::Null,
            Payload::Bool(b) => serde_json::Value::Bool(*b),
            Payload::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Payload::Text(s) => serde_json::Value::String(s.clone()),
            Payload::Bytes(b) => {
                let num = attachments.len();
                attachments.push(b.clone());
                serde_json::json!({ "_placeholder": true, "num": num })
            }
            Payload::Array(items) => serde_json::Value::Array(
                items.iter().map(|p| p.to_json(attachments)).collect(),
            ),
            Payload::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json(attachments)))
                    .collect(),
            ),
        }
    }

    /// Whether any leaf of this tree is raw binary (and the packet carrying
    /// it must therefore go out as a binary event).
    pub fn has_binary(&self) -> bool {
        match self {
            Payload::Bytes(_) => true,
            Payload::Array(items) => items.iter().any(Payload::has_binary),
            Payload::Object(map) => map.values().any(Payload::has_binary),
            _ => false,
        }
    }
}

fn placeholder_index(value: &serde_json::Value) -> Option<usize> {
    let obj = value.as_object()?;
    if obj.get("_placeholder")?.as_bool()? {
        obj.get("num")?.as_u64().map(|n| n as usize)
    } else {
        None
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<f64> for Payload {
    fn from(n: f64) -> Self {
        Payload::Number(n)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl TryFrom<Payload> for String {
    type Error = SocketIoError;

    fn try_from(value: Payload) -> Result<Self, Self::Error> {
        match value {
            Payload::Text(s) => Ok(s),
            other => Err(SocketIoError::Serialization(format!(
                "expected text payload, got {other:?}"
            ))),
        }
    }
}

impl TryFrom<Payload> for f64 {
    type Error = SocketIoError;

    fn try_from(value: Payload) -> Result<Self, Self::Error> {
        match value {
            Payload::Number(n) => Ok(n),
            other => Err(SocketIoError::Serialization(format!(
                "expected numeric payload, got {other:?}"
            ))),
        }
    }
}

impl TryFrom<Payload> for bool {
    type Error = SocketIoError;

    fn try_from(value: Payload) -> Result<Self, Self::Error> {
        match value {
            Payload::Bool(b) => Ok(b),
            other => Err(SocketIoError::Serialization(format!(
                "expected boolean payload, got {other:?}"
            ))),
        }
    }
}

impl TryFrom<Payload> for Bytes {
    type Error = SocketIoError;

    fn try_from(value: Payload) -> Result<Self, Self::Error> {
        match value {
            Payload::Bytes(b) => Ok(b),
            other => Err(SocketIoError::Serialization(format!(
                "expected binary payload, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trips_without_binary() {
        let value = serde_json::json!(["msg", {"a": 1.0, "b": [true, null]}]);
        let payload = Payload::from_json(&value, &[]);
        let mut attachments = Vec::new();
        assert_eq!(payload.to_json(&mut attachments), value);
        assert!(attachments.is_empty());
    }

    #[test]
    fn bytes_become_numbered_placeholders() {
        let payload = Payload::Array(vec![
            Payload::Text("file".into()),
            Payload::Bytes(Bytes::from_static(b"\x01\x02")),
            Payload::Bytes(Bytes::from_static(b"\x03")),
        ]);
        let mut attachments = Vec::new();
        let json = payload.to_json(&mut attachments);

        assert_eq!(attachments.len(), 2);
        assert_eq!(
            json,
            serde_json::json!([
                "file",
                {"_placeholder": true, "num": 0},
                {"_placeholder": true, "num": 1}
            ])
        );
    }

    #[test]
    fn placeholders_resolve_against_attachments() {
        let json = serde_json::json!(["file", {"_placeholder": true, "num": 0}]);
        let attachments = vec![Bytes::from_static(b"\xAA")];
        let payload = Payload::from_json(&json, &attachments);
        assert_eq!(
            payload,
            Payload::Array(vec![
                Payload::Text("file".into()),
                Payload::Bytes(Bytes::from_static(b"\xAA")),
            ])
        );
    }

    #[test]
    fn typed_extraction_at_the_edge() {
        let name: String = Payload::Text("joe".into()).try_into().unwrap();
        assert_eq!(name, "joe");
        assert!(String::try_from(Payload::Number(1.0)).is_err());
    }
}
