//! A local store that records operations and can inject failures.

use parking_lot::Mutex;
use riptide_core::{LocalStore, MemoryStore, Record, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One recorded operation against a [`TrackingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `put(key)`.
    Put(String),
    /// `get(key)`.
    Get(String),
    /// `remove(key)`.
    Remove(String),
    /// `all()`.
    All,
    /// `reset()`.
    Reset,
}

/// An in-memory store that logs every operation and can be told to
/// fail all writes, for exercising the log-and-proceed store failure
/// path.
#[derive(Default)]
pub struct TrackingStore {
    inner: MemoryStore,
    ops: Mutex<Vec<StoreOp>>,
    failing: AtomicBool,
}

impl TrackingStore {
    /// Creates an empty tracking store.
    pub fn new() -> TrackingStore {
        TrackingStore::default()
    }

    /// Makes every subsequent call fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The recorded operations, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    /// Drains and returns the recorded operations.
    pub fn take_ops(&self) -> Vec<StoreOp> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Reads an entry without logging, for assertions.
    pub fn peek(&self, key: &str) -> Option<Record> {
        self.inner.get(key).ok().flatten()
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        self.ops.lock().push(op);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::new("injected store failure"))
        } else {
            Ok(())
        }
    }
}

impl LocalStore for TrackingStore {
    fn put(&self, key: &str, record: &Record) -> StoreResult<()> {
        self.check(StoreOp::Put(key.to_string()))?;
        self.inner.put(key, record)
    }

    fn get(&self, key: &str) -> StoreResult<Option<Record>> {
        self.check(StoreOp::Get(key.to_string()))?;
        self.inner.get(key)
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        self.check(StoreOp::Remove(key.to_string()))?;
        self.inner.remove(key)
    }

    fn all(&self) -> StoreResult<Vec<(String, Record)>> {
        self.check(StoreOp::All)?;
        self.inner.all()
    }

    fn reset(&self, entries: &[(String, Record)]) -> StoreResult<()> {
        self.check(StoreOp::Reset)?;
        self.inner.reset(entries)
    }
}

/// A fresh [`TrackingStore`] behind an `Arc`, ready for injection.
pub fn tracking_store() -> Arc<TrackingStore> {
    Arc::new(TrackingStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec() -> Record {
        match json!({"v": 1}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn logs_operations() {
        let store = TrackingStore::new();
        store.put("task/t1", &rec()).unwrap();
        let _ = store.get("task/t1").unwrap();
        assert_eq!(
            store.ops(),
            vec![StoreOp::Put("task/t1".into()), StoreOp::Get("task/t1".into())]
        );
    }

    #[test]
    fn failure_injection() {
        let store = TrackingStore::new();
        store.set_failing(true);
        assert!(store.put("task/t1", &rec()).is_err());
        store.set_failing(false);
        assert!(store.put("task/t1", &rec()).is_ok());
        assert_eq!(store.peek("task/t1"), Some(rec()));
    }
}
