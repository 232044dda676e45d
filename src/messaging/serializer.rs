//! # Payload Serialization
//!
//! The bus converts messages to `serde_json::Value` and hands the value to an
//! injected [`MessageSerializer`] for the byte encoding. The store hands the
//! encoded bytes back after saving, and the bus dispatches what it decodes from
//! them, so every handler sees the persisted form of its request.

use super::errors::{SerializationError, SerializationResult};
use super::message::Message;
use crate::constants::JSON_CONTENT_TYPE;
use serde_json::Value;

pub trait MessageSerializer: Send + Sync + std::fmt::Debug {
    fn content_type(&self) -> &str;

    fn encode(&self, message_type: &str, value: &Value) -> SerializationResult<Vec<u8>>;

    fn decode(&self, message_type: &str, payload: &[u8]) -> SerializationResult<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, message_type: &str, value: &Value) -> SerializationResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| SerializationError::serialize(message_type, e))
    }

    fn decode(&self, message_type: &str, payload: &[u8]) -> SerializationResult<Value> {
        serde_json::from_slice(payload).map_err(|e| SerializationError::deserialize(message_type, e))
    }
}

/// Encode a typed message through a serializer
pub fn to_payload<T: serde::Serialize>(
    serializer: &dyn MessageSerializer,
    message_type: &str,
    message: &T,
) -> SerializationResult<Vec<u8>> {
    let value =
        serde_json::to_value(message).map_err(|e| SerializationError::serialize(message_type, e))?;
    serializer.encode(message_type, &value)
}

/// Decode a typed message through a serializer
pub fn from_payload<T: Message>(
    serializer: &dyn MessageSerializer,
    message_type: &str,
    payload: &[u8],
) -> SerializationResult<T> {
    let value = serializer.decode(message_type, payload)?;
    serde_json::from_value(value).map_err(|e| SerializationError::deserialize(message_type, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    impl Message for Add {}

    #[test]
    fn test_json_payload_normalizes_message() {
        let payload = to_payload(&JsonSerializer, "Add", &Add { a: 2, b: 3 }).unwrap();
        assert_eq!(payload, br#"{"a":2,"b":3}"#.to_vec());

        let decoded: Add = from_payload(&JsonSerializer, "Add", &payload).unwrap();
        assert_eq!(decoded, Add { a: 2, b: 3 });
    }

    #[test]
    fn test_decode_reports_message_type() {
        let result: SerializationResult<Add> = from_payload(&JsonSerializer, "Add", b"{\"a\":1}");
        match result {
            Err(SerializationError::Deserialize { message_type, .. }) => {
                assert_eq!(message_type, "Add")
            }
            other => panic!("expected deserialize error, got {other:?}"),
        }
    }
}
