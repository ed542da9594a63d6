//! Local persistent cache abstraction.

use crate::record::Record;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for local store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a local store adapter.
///
/// Store failures never abort a cascade; the pipeline logs them and
/// proceeds to the next stage so a broken cache cannot block remote
/// consistency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("local store failure: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Creates a store error from a message.
    pub fn new(message: impl Into<String>) -> StoreError {
        StoreError(message.into())
    }
}

/// The local persistent cache collaborator.
///
/// Keys are opaque strings; the database namespaces them as
/// `type-name/serialized-key`.
pub trait LocalStore: Send + Sync {
    /// Writes a record under a key, replacing any previous value.
    fn put(&self, key: &str, record: &Record) -> StoreResult<()>;

    /// Reads the record under a key.
    fn get(&self, key: &str) -> StoreResult<Option<Record>>;

    /// Removes the record under a key. Returns true if one existed.
    fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Returns every stored entry.
    fn all(&self) -> StoreResult<Vec<(String, Record)>>;

    /// Replaces the entire store contents.
    fn reset(&self, entries: &[(String, Record)]) -> StoreResult<()>;
}

/// An in-memory local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn put(&self, key: &str, record: &Record) -> StoreResult<()> {
        self.entries.write().insert(key.to_string(), record.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Record>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn all(&self) -> StoreResult<Vec<(String, Record)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn reset(&self, entries: &[(String, Record)]) -> StoreResult<()> {
        let mut map = self.entries.write();
        map.clear();
        for (key, record) in entries {
            map.insert(key.clone(), record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn put_get_remove() {
        let store = MemoryStore::new();
        let rec = record(json!({"id": "k1"}));

        store.put("task/k1", &rec).unwrap();
        assert_eq!(store.get("task/k1").unwrap(), Some(rec));
        assert!(store.remove("task/k1").unwrap());
        assert!(!store.remove("task/k1").unwrap());
        assert_eq!(store.get("task/k1").unwrap(), None);
    }

    #[test]
    fn reset_replaces_contents() {
        let store = MemoryStore::new();
        store.put("a", &record(json!({"v": 1}))).unwrap();

        store
            .reset(&[("b".to_string(), record(json!({"v": 2})))])
            .unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn all_is_sorted_by_key() {
        let store = MemoryStore::new();
        store.put("b", &record(json!({}))).unwrap();
        store.put("a", &record(json!({}))).unwrap();
        let keys: Vec<String> = store.all().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
