//! Byte codecs for backends that store opaque values
//!
//! The SQLite backend keeps payloads as JSON text so rows stay inspectable. The
//! TTL-keyed backend stores raw bytes and lets the deployment pick between JSON
//! and MessagePack through [`Codec`].

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for serializing and deserializing checkpoint records
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Compact binary serializer using MessagePack
///
/// Structs are written as maps so optional fields survive schema additions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl SerializerProtocol for MsgPackSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// Runtime-selectable codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    #[serde(alias = "messagepack")]
    MsgPack,
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "msgpack" | "messagepack" => Ok(Codec::MsgPack),
            other => Err(format!("unknown codec `{other}` (expected json or msgpack)")),
        }
    }
}

impl SerializerProtocol for Codec {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => JsonSerializer.dumps(value),
            Codec::MsgPack => MsgPackSerializer.dumps(value),
        }
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json => JsonSerializer.loads(data),
            Codec::MsgPack => MsgPackSerializer.loads(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::PendingWrite;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
        note: Option<String>,
    }

    #[test]
    fn test_json_serializer() {
        let data = TestData {
            name: "test".to_string(),
            value: 42,
            note: None,
        };

        let bytes = JsonSerializer.dumps(&data).unwrap();
        let restored: TestData = JsonSerializer.loads(&bytes).unwrap();

        assert_eq!(data, restored);
    }

    #[test]
    fn test_msgpack_handles_dynamic_values() {
        let write = PendingWrite::new(
            "router",
            "exercise_data",
            json!({"items": [1, 2, 3], "topic": "past tense", "done": false}),
        );

        let bytes = MsgPackSerializer.dumps(&write).unwrap();
        let restored: PendingWrite = MsgPackSerializer.loads(&bytes).unwrap();

        assert_eq!(write, restored);
    }

    #[test]
    fn test_codec_parsing() {
        assert_eq!("JSON".parse::<Codec>().unwrap(), Codec::Json);
        assert_eq!("messagepack".parse::<Codec>().unwrap(), Codec::MsgPack);
        assert!("yaml".parse::<Codec>().is_err());
    }
}
