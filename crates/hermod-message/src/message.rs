use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::operation::Operation;
use crate::value::{sanitize, Value};

/// See [`Message::into_record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub operation: Option<Operation>,
    pub schema: String,
    pub table: String,
    pub before: Option<Vec<u8>>,
    pub after: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

/// `before`/`after` hold two views of the same payload: the raw encoded
/// bytes and a decoded key/value map. Setting one invalidates the cached
/// other; the next read re-derives it. This mirrors spec §4.1's invariant
/// without needing a lock, since a `Message` is owned by exactly one
/// pipeline stage at a time (spec §9, "ownership transfer").
#[derive(Debug, Clone, Default)]
struct Payload {
    raw: Option<Vec<u8>>,
    data: Option<BTreeMap<String, Value>>,
}

impl Payload {
    fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = Some(raw);
        self.data = None;
    }

    fn clear(&mut self) {
        self.raw = None;
        self.data = None;
    }

    fn is_empty(&self) -> bool {
        self.raw.is_none() && self.data.is_none()
    }

    fn raw(&mut self) -> &[u8] {
        if self.raw.is_none() {
            let data = self.data.get_or_insert_with(BTreeMap::new);
            let object: serde_json::Map<String, serde_json::Value> = data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect();
            self.raw = Some(
                serde_json::to_vec(&serde_json::Value::Object(object))
                    .expect("map of Value serializes"),
            );
        }
        self.raw.as_deref().unwrap()
    }

    fn data(&mut self) -> &BTreeMap<String, Value> {
        if self.data.is_none() {
            let decoded = self
                .raw
                .as_deref()
                .and_then(|raw| serde_json::from_slice::<serde_json::Value>(raw).ok())
                .and_then(|v| match v {
                    serde_json::Value::Object(map) => Some(
                        map.into_iter()
                            .map(|(k, v)| (k, Value::from(v)))
                            .collect(),
                    ),
                    _ => None,
                })
                .unwrap_or_default();
            self.data = Some(decoded);
        }
        self.data.as_ref().unwrap()
    }

    fn set_value(&mut self, key: impl Into<String>, value: Value) {
        let value = sanitize(value);
        // Force decode of any existing raw bytes before we drop them.
        let _ = self.data();
        self.data.as_mut().unwrap().insert(key.into(), value);
        self.raw = None;
    }
}

/// Mutable unit of data in flight through a workflow (spec §3, §4.1).
///
/// A `Message` is acquired from a [`MessagePool`](crate::MessagePool) at
/// source ingest, moved by-value through transforms and sink writers, and
/// released back to the pool after a final `Source::ack` or DLQ commit.
/// Accessors are safe to call from concurrent readers, but a message must
/// not be mutated once it has been enqueued onto a buffer.
#[derive(Debug, Clone, Default)]
pub struct Message {
    id: String,
    operation: Option<Operation>,
    schema: String,
    table: String,
    before: Option<Vec<u8>>,
    payload: Payload,
    metadata: BTreeMap<String, String>,
}

impl Message {
    /// Well-known metadata keys used for routing (spec §4.6).
    pub const META_TARGET_CLUSTER: &'static str = "target_cluster";
    pub const META_TARGET_REGION: &'static str = "target_region";

    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id
        };
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn set_operation(&mut self, operation: Option<Operation>) {
        self.operation = operation;
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn set_schema(&mut self, schema: impl Into<String>) {
        self.schema = schema.into();
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = table.into();
    }

    pub fn before(&self) -> Option<&[u8]> {
        self.before.as_deref()
    }

    pub fn set_before(&mut self, before: Option<Vec<u8>>) {
        self.before = before;
    }

    /// The payload as encoded bytes. If the message was last mutated via
    /// [`Message::set_data`], this lazily re-encodes the decoded view.
    pub fn after(&mut self) -> &[u8] {
        self.payload.raw()
    }

    pub fn set_after(&mut self, after: Vec<u8>) {
        self.payload.set_raw(after);
    }

    /// The decoded view of the payload. If the message was last mutated via
    /// [`Message::set_after`], this lazily decodes the raw bytes as JSON.
    pub fn data(&mut self) -> &BTreeMap<String, Value> {
        self.payload.data()
    }

    /// Sets a single field of the decoded data view, sanitizing the value
    /// (16-byte binary, or an explicit UUID) into a canonical hex-string
    /// form so the payload round-trips deterministically through JSON.
    pub fn set_data(&mut self, key: impl Into<String>, value: Value) {
        self.payload.set_value(key, value);
    }

    pub fn clear_payloads(&mut self) {
        self.before = None;
        self.payload.clear();
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn target_cluster(&self) -> Option<&str> {
        self.metadata_get(Self::META_TARGET_CLUSTER)
    }

    pub fn target_region(&self) -> Option<&str> {
        self.metadata_get(Self::META_TARGET_REGION)
    }

    /// A lossless, serializable snapshot of a message's fields, used by
    /// durable buffers and the outbox to persist a message across process
    /// restarts. This is distinct from [`Message::marshal_json`], which
    /// produces the connector-facing wire envelope rather than an
    /// internal, round-trippable record.
    pub fn into_record(mut self) -> MessageRecord {
        MessageRecord {
            id: self.id.clone(),
            operation: self.operation,
            schema: self.schema.clone(),
            table: self.table.clone(),
            before: self.before.clone(),
            after: self.after().to_vec(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn from_record(record: MessageRecord) -> Self {
        let mut message = Message::new(record.id);
        message.operation = record.operation;
        message.schema = record.schema;
        message.table = record.table;
        message.before = record.before;
        message.payload.set_raw(record.after);
        message.metadata = record.metadata;
        message
    }

    /// Assigns (or regenerates) this message's id, for reuse from the pool.
    pub(crate) fn assign_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id
        };
    }

    /// Moves every field from `other` onto `self`, for reuse from a pool
    /// (spec §4.1, §5): the pooled slot keeps its identity, `other`'s
    /// content replaces whatever was left over from its previous use.
    pub(crate) fn absorb(&mut self, other: Message) {
        self.id = other.id;
        self.operation = other.operation;
        self.schema = other.schema;
        self.table = other.table;
        self.before = other.before;
        self.payload = other.payload;
        self.metadata = other.metadata;
    }

    /// Resets this message to its default state, for return to the pool.
    pub(crate) fn reset(&mut self) {
        self.id.clear();
        self.operation = None;
        self.schema.clear();
        self.table.clear();
        self.before = None;
        self.payload.clear();
        self.metadata.clear();
    }

    /// Serializes this message to its wire form (spec §4.1): a CDC envelope
    /// when an operation is set, or the decoded data flattened to the root
    /// with system fields added otherwise.
    pub fn marshal_json(&mut self) -> serde_json::Value {
        if let Some(operation) = self.operation {
            let mut envelope = serde_json::Map::new();
            envelope.insert("id".into(), serde_json::Value::String(self.id.clone()));
            envelope.insert(
                "operation".into(),
                serde_json::Value::String(operation.as_str().into()),
            );
            envelope.insert(
                "table".into(),
                serde_json::Value::String(self.table.clone()),
            );
            envelope.insert(
                "schema".into(),
                serde_json::Value::String(self.schema.clone()),
            );
            envelope.insert(
                "before".into(),
                match &self.before {
                    Some(bytes) => serde_json::Value::String(
                        String::from_utf8_lossy(bytes).into_owned(),
                    ),
                    None => serde_json::Value::Null,
                },
            );
            let after_empty = self.payload.is_empty();
            if !after_empty {
                let after = self.payload.raw().to_vec();
                envelope.insert(
                    "after".into(),
                    serde_json::Value::String(String::from_utf8_lossy(&after).into_owned()),
                );
            } else {
                envelope.insert("after".into(), serde_json::Value::Null);
            }
            envelope.insert(
                "metadata".into(),
                serde_json::to_value(&self.metadata).unwrap(),
            );
            serde_json::Value::Object(envelope)
        } else {
            let mut root: serde_json::Map<String, serde_json::Value> = self
                .payload
                .data()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect();
            root.insert("id".into(), serde_json::Value::String(self.id.clone()));
            if !self.table.is_empty() {
                root.insert(
                    "_table".into(),
                    serde_json::Value::String(self.table.clone()),
                );
            }
            if !self.schema.is_empty() {
                root.insert(
                    "_schema".into(),
                    serde_json::Value::String(self.schema.clone()),
                );
            }
            if !self.metadata.is_empty() {
                root.insert(
                    "_metadata".into(),
                    serde_json::to_value(&self.metadata).unwrap(),
                );
            }
            serde_json::Value::Object(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_id_when_missing() {
        let m = Message::new("");
        assert!(!m.id().is_empty());
    }

    #[test]
    fn keeps_given_id_stable() {
        let m = Message::new("A");
        assert_eq!(m.id(), "A");
    }

    #[test]
    fn setting_data_invalidates_cached_after() {
        let mut m = Message::new("A");
        m.set_after(br#"{"x":1}"#.to_vec());
        assert_eq!(m.data().get("x"), Some(&Value::Number(1.into())));

        m.set_data("y", Value::String("hi".into()));
        // after() must reflect the merged data, not the stale bytes.
        let after = String::from_utf8(m.after().to_vec()).unwrap();
        assert!(after.contains("\"y\":\"hi\""));
        assert!(after.contains("\"x\":1"));
    }

    #[test]
    fn setting_after_invalidates_cached_data() {
        let mut m = Message::new("A");
        m.set_data("x", Value::Number(1.into()));
        let _ = m.after();
        m.set_after(br#"{"z":9}"#.to_vec());
        assert_eq!(m.data().get("z"), Some(&Value::Number(9.into())));
        assert_eq!(m.data().get("x"), None);
    }

    #[test]
    fn marshal_cdc_envelope_when_operation_set() {
        let mut m = Message::new("A");
        m.set_operation(Some(Operation::Update));
        m.set_table("users");
        m.set_schema("public");
        m.set_after(br#"{"name":"ada"}"#.to_vec());
        let json = m.marshal_json();
        assert_eq!(json["operation"], "update");
        assert_eq!(json["table"], "users");
        assert_eq!(json["schema"], "public");
        assert!(json.get("after").is_some());
    }

    #[test]
    fn marshal_flattens_data_when_no_operation() {
        let mut m = Message::new("A");
        m.set_data("name", Value::String("ada".into()));
        let json = m.marshal_json();
        assert_eq!(json["name"], "ada");
        assert_eq!(json["id"], "A");
        assert!(json.get("operation").is_none());
    }
}
