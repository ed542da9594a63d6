//! Model identity: scalar and composite keys.

use crate::error::{SyncError, SyncResult};
use crate::record::Record;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One component of a model key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    /// Integer key component.
    Int(i64),
    /// Text key component.
    Text(String),
}

impl KeyPart {
    /// Extracts a key part from a record value.
    ///
    /// Returns `None` for null, missing, or non-scalar values.
    pub fn from_value(value: &Value) -> Option<KeyPart> {
        match value {
            Value::Number(n) => n.as_i64().map(KeyPart::Int),
            Value::String(s) if !s.is_empty() => Some(KeyPart::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the part back to a record value.
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Int(n) => Value::from(*n),
            KeyPart::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(n) => write!(f, "{n}"),
            KeyPart::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A resolved model identity: one or more key parts.
///
/// Composite keys serialize to a single scalar by joining parts with
/// the owning type's separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    parts: Vec<KeyPart>,
}

impl Key {
    /// Creates a key from parts. Panics in debug builds if empty.
    pub fn new(parts: Vec<KeyPart>) -> Key {
        debug_assert!(!parts.is_empty());
        Key { parts }
    }

    /// Creates a single-part key.
    pub fn single(part: KeyPart) -> Key {
        Key { parts: vec![part] }
    }

    /// The key parts in declaration order.
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Serializes the key to a scalar string using `separator`.
    pub fn serialize(&self, separator: &str) -> String {
        self.parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize("/"))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Key {
        Key::single(KeyPart::Text(s.to_string()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Key {
        Key::single(KeyPart::Text(s))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Key {
        Key::single(KeyPart::Int(n))
    }
}

/// Computes and normalizes model identity from raw records.
#[derive(Debug, Clone)]
pub struct KeyHandler {
    fields: Vec<String>,
    separator: String,
}

impl KeyHandler {
    /// Creates a handler for the given key fields and separator.
    pub fn new(fields: Vec<String>, separator: impl Into<String>) -> KeyHandler {
        debug_assert!(!fields.is_empty());
        KeyHandler {
            fields,
            separator: separator.into(),
        }
    }

    /// The key field names, in order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The separator used when serializing composite keys.
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Returns true if the key spans more than one field.
    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }

    /// Extracts a key from a record, or `None` if any part is missing.
    pub fn key_of(&self, record: &Record) -> Option<Key> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            parts.push(KeyPart::from_value(record.get(field)?)?);
        }
        Some(Key::new(parts))
    }

    /// Extracts a key, generating a fresh UUID for a missing simple
    /// key. Composite keys cannot be generated.
    pub fn ensure_key(&self, record: &mut Record) -> SyncResult<Key> {
        if let Some(key) = self.key_of(record) {
            return Ok(key);
        }
        if self.is_composite() {
            return Err(SyncError::MissingKey);
        }
        let generated = Uuid::new_v4().to_string();
        record.insert(self.fields[0].clone(), Value::from(generated.clone()));
        Ok(Key::from(generated))
    }

    /// Writes the key back onto the record's key fields.
    pub fn write_key(&self, key: &Key, record: &mut Record) {
        for (field, part) in self.fields.iter().zip(key.parts()) {
            record.insert(field.clone(), part.to_value());
        }
    }

    /// Serializes a key with this handler's separator.
    pub fn serialize(&self, key: &Key) -> String {
        key.serialize(&self.separator)
    }

    /// Parses a serialized key back into parts.
    ///
    /// Numeric-looking components become integer parts, everything
    /// else text, mirroring `KeyPart::from_value`.
    pub fn parse(&self, serialized: &str) -> Option<Key> {
        let parts: Vec<KeyPart> = if self.is_composite() {
            serialized
                .split(self.separator.as_str())
                .map(|piece| match piece.parse::<i64>() {
                    Ok(n) => KeyPart::Int(n),
                    Err(_) => KeyPart::Text(piece.to_string()),
                })
                .collect()
        } else {
            vec![match serialized.parse::<i64>() {
                Ok(n) => KeyPart::Int(n),
                Err(_) => KeyPart::Text(serialized.to_string()),
            }]
        };
        if parts.len() == self.fields.len() {
            Some(Key::new(parts))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn simple_key_extraction() {
        let handler = KeyHandler::new(vec!["id".into()], "/");
        let rec = record(json!({"id": 3, "name": "t0"}));
        assert_eq!(handler.key_of(&rec), Some(Key::from(3)));
    }

    #[test]
    fn missing_key_generates_uuid() {
        let handler = KeyHandler::new(vec!["id".into()], "/");
        let mut rec = record(json!({"name": "t0"}));
        let key = handler.ensure_key(&mut rec).unwrap();
        assert_eq!(handler.key_of(&rec), Some(key.clone()));
        assert!(!key.serialize("/").is_empty());
    }

    #[test]
    fn composite_key_cannot_be_generated() {
        let handler = KeyHandler::new(vec!["user_id".into(), "group_id".into()], "/");
        let mut rec = record(json!({"user_id": 1}));
        assert_eq!(handler.ensure_key(&mut rec), Err(SyncError::MissingKey));
    }

    #[test]
    fn composite_serialization_roundtrip() {
        let handler = KeyHandler::new(vec!["user_id".into(), "group_id".into()], "/");
        let rec = record(json!({"user_id": 1, "group_id": "g7"}));
        let key = handler.key_of(&rec).unwrap();
        assert_eq!(handler.serialize(&key), "1/g7");
        assert_eq!(handler.parse("1/g7"), Some(key));
    }

    #[test]
    fn write_key_back() {
        let handler = KeyHandler::new(vec!["id".into()], "/");
        let mut rec = Record::new();
        handler.write_key(&Key::from("k1"), &mut rec);
        assert_eq!(rec.get("id"), Some(&json!("k1")));
    }

    #[test]
    fn null_and_empty_are_not_keys() {
        let handler = KeyHandler::new(vec!["id".into()], "/");
        assert_eq!(handler.key_of(&record(json!({"id": null}))), None);
        assert_eq!(handler.key_of(&record(json!({"id": ""}))), None);
        assert_eq!(handler.key_of(&record(json!({}))), None);
    }
}
