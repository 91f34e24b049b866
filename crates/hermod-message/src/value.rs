use std::collections::BTreeMap;

use serde_json::Number;
use uuid::Uuid;

/// A decoded value inside a [`Message`](crate::Message)'s data view.
///
/// This is a small tagged union rather than `serde_json::Value` directly so
/// that [`sanitize`] can recognize binary/UUID shapes without any runtime
/// type introspection: the union enumerates every kind Hermod itself cares
/// about, and an explicit [`Value::Uuid`] variant exists precisely so a
/// 16-byte binary blob never needs to survive as an opaque byte array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Sanitizes a value being written into a message's data view so that it
/// round-trips through JSON deterministically.
///
/// A 16-byte binary value is assumed to be a UUID and is converted to its
/// canonical hex-string form; an already-explicit [`Value::Uuid`] is left
/// untouched (it already serializes as a string). Every other shape passes
/// through unchanged.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Bytes(ref bytes) if bytes.len() == 16 => {
            let array: [u8; 16] = bytes.as_slice().try_into().expect("checked len == 16");
            Value::Uuid(Uuid::from_bytes(array))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, sanitize(v))).collect())
        }
        other => other,
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, v.into()))
                    .collect::<serde_json::Map<_, _>>(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_sixteen_byte_blob_into_uuid() {
        let bytes = vec![0u8; 16];
        let sanitized = sanitize(Value::Bytes(bytes));
        assert!(matches!(sanitized, Value::Uuid(_)));
    }

    #[test]
    fn leaves_other_lengths_alone() {
        let bytes = vec![1u8, 2, 3];
        let sanitized = sanitize(Value::Bytes(bytes.clone()));
        assert_eq!(sanitized, Value::Bytes(bytes));
    }

    #[test]
    fn uuid_round_trips_as_string() {
        let uuid = Uuid::from_bytes([7u8; 16]);
        let json: serde_json::Value = Value::Uuid(uuid).into();
        assert_eq!(json, serde_json::Value::String(uuid.to_string()));
    }

    #[test]
    fn sanitizes_nested_object_fields() {
        let mut inner = BTreeMap::new();
        inner.insert("key".to_string(), Value::Bytes(vec![9u8; 16]));
        let sanitized = sanitize(Value::Object(inner));
        let Value::Object(map) = sanitized else {
            panic!("expected object");
        };
        assert!(matches!(map.get("key"), Some(Value::Uuid(_))));
    }
}
