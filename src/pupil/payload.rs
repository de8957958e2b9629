//! msgpack payloads exchanged with Pupil Capture.
//!
//! Every notification, annotation and data message carries a msgpack map as its
//! second frame. [`Payload`] is that map with string keys and dynamically typed
//! values. Byte strings are written with the msgpack `bin` type, the same framing
//! Pupil's own clients use.

use std::collections::BTreeMap;
use std::io::Cursor;

use rmpv::Value;

use crate::error::{PlrError, PlrResult};

/// Key under which extra binary frames of a message are collected.
pub const RAW_DATA_KEY: &str = "__raw_data__";

/// String-keyed msgpack map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    entries: BTreeMap<String, Value>,
}

impl Payload {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style [`Payload::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// String field, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Numeric field as `f64` (integers are widened).
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Non-negative integer field.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// Required string field, or a protocol error naming it.
    pub fn require_str(&self, key: &str) -> PlrResult<&str> {
        self.get_str(key)
            .ok_or_else(|| PlrError::Protocol(format!("payload has no string field '{key}'")))
    }

    /// Required numeric field, or a protocol error naming it.
    pub fn require_f64(&self, key: &str) -> PlrResult<f64> {
        self.get_f64(key)
            .ok_or_else(|| PlrError::Protocol(format!("payload has no numeric field '{key}'")))
    }

    /// Required integer field, or a protocol error naming it.
    pub fn require_u64(&self, key: &str) -> PlrResult<u64> {
        self.get_u64(key)
            .ok_or_else(|| PlrError::Protocol(format!("payload has no integer field '{key}'")))
    }

    /// Extra frames stored under [`RAW_DATA_KEY`], in arrival order.
    pub fn raw_frames(&self) -> Vec<&[u8]> {
        match self.get(RAW_DATA_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::Binary(bytes) => Some(bytes.as_slice()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Store extra frames under [`RAW_DATA_KEY`].
    pub fn set_raw_frames(&mut self, frames: Vec<Vec<u8>>) {
        let items = frames.into_iter().map(Value::Binary).collect::<Vec<_>>();
        self.insert(RAW_DATA_KEY, Value::Array(items));
    }

    /// The payload as a msgpack map value (for nesting, e.g. plugin args).
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(key, value)| (Value::from(key.as_str()), value.clone()))
                .collect(),
        )
    }

    /// Build a payload from a msgpack map value.
    pub fn from_value(value: Value) -> PlrResult<Self> {
        let pairs = match value {
            Value::Map(pairs) => pairs,
            other => {
                return Err(PlrError::Protocol(format!(
                    "expected a msgpack map, got {other}"
                )))
            }
        };

        let mut entries = BTreeMap::new();
        for (key, value) in pairs {
            let key = match key {
                Value::String(s) => s.into_str().ok_or_else(|| {
                    PlrError::Protocol("payload key is not valid UTF-8".to_string())
                })?,
                Value::Binary(bytes) => String::from_utf8(bytes).map_err(|_| {
                    PlrError::Protocol("payload key is not valid UTF-8".to_string())
                })?,
                other => {
                    return Err(PlrError::Protocol(format!(
                        "payload key must be a string, got {other}"
                    )))
                }
            };
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Serialize a payload to msgpack bytes.
pub fn encode_payload(payload: &Payload) -> PlrResult<Vec<u8>> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &payload.to_value())?;
    Ok(buf)
}

/// Deserialize msgpack bytes into a payload. The top-level value must be a map.
pub fn decode_payload(bytes: &[u8]) -> PlrResult<Payload> {
    let mut cursor = Cursor::new(bytes);
    let value = rmpv::decode::read_value(&mut cursor)?;
    Payload::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Payload {
        Payload::new()
            .with("subject", "start_plugin")
            .with("name", "Annotation_Capture")
            .with("args", Payload::new().to_value())
    }

    #[test]
    fn encode_then_decode_returns_original_mapping() {
        let original = notification()
            .with("timestamp", 1234.5678)
            .with("frame_index", 42u64)
            .with("offset", -3i64)
            .with("enabled", true)
            .with("colors", Value::Array(vec!["red".into(), "blue".into()]));

        let bytes = encode_payload(&original).unwrap();
        let decoded = decode_payload(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn byte_strings_use_bin_type() {
        let payload = Payload::new().with("blob", vec![1u8, 2, 3]);
        let bytes = encode_payload(&payload).unwrap();
        // fixmap(1), fixstr "blob", bin8 marker 0xc4, len 3
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[6], 0xc4);
        assert_eq!(bytes[7], 3);
    }

    #[test]
    fn decode_rejects_non_map() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::from(7)).unwrap();
        assert!(matches!(decode_payload(&buf), Err(PlrError::Protocol(_))));
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        let bytes = encode_payload(&notification()).unwrap();
        assert!(decode_payload(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn raw_frames_round_trip_in_order() {
        let mut payload = Payload::new();
        payload.set_raw_frames(vec![vec![1, 2], vec![3], vec![]]);
        let frames = payload.raw_frames();
        assert_eq!(frames, vec![&[1u8, 2][..], &[3u8][..], &[][..]]);
    }

    #[test]
    fn typed_accessors() {
        let payload = Payload::new()
            .with("height", 240u64)
            .with("timestamp", 12.5)
            .with("topic", "frame.world");
        assert_eq!(payload.require_u64("height").unwrap(), 240);
        assert_eq!(payload.get_f64("height"), Some(240.0));
        assert_eq!(payload.require_f64("timestamp").unwrap(), 12.5);
        assert_eq!(payload.require_str("topic").unwrap(), "frame.world");
        assert!(payload.require_str("missing").is_err());
    }
}
