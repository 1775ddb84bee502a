//! Pluggable payload serialization for the protocol adapter. JSON is the
//! default codec.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtoError;

/// A payload codec used to serialize/deserialize frame bodies.
pub trait PayloadCodec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtoError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ProtoError>;
}

/// The default payload codec: JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtoError> {
        serde_json::to_vec(value).map_err(ProtoError::from)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ProtoError> {
        serde_json::from_slice(bytes).map_err(ProtoError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonCodec;
        let value = Sample {
            a: 7,
            b: "hi".into(),
        };
        let bytes = codec.encode(&value).unwrap();
        let decoded: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
