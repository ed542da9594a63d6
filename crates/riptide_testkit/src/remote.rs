//! A programmable remote service that records every call.

use parking_lot::Mutex;
use riptide_core::{Key, Record, RemoteError, RemoteResult, RemoteService, RequestOptions};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One recorded call against a [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `all(kind)`.
    All {
        /// Type name.
        kind: String,
    },
    /// `get(kind, key)`.
    Get {
        /// Type name.
        kind: String,
        /// Serialized key.
        key: String,
    },
    /// `create(kind, key, payload)`.
    Create {
        /// Type name.
        kind: String,
        /// Serialized key.
        key: String,
        /// The transmitted field diff.
        payload: Record,
    },
    /// `update(kind, key, payload)`.
    Update {
        /// Type name.
        kind: String,
        /// Serialized key.
        key: String,
        /// The transmitted field diff.
        payload: Record,
    },
    /// `remove(kind, key)`.
    Remove {
        /// Type name.
        kind: String,
        /// Serialized key.
        key: String,
    },
    /// `query(url, body)`.
    Query {
        /// Query URL.
        url: String,
        /// Query body.
        body: Record,
    },
}

impl RemoteCall {
    /// Returns true for `create` and `update` calls.
    pub fn is_save(&self) -> bool {
        matches!(self, RemoteCall::Create { .. } | RemoteCall::Update { .. })
    }
}

/// A remote service whose responses are scripted per call.
///
/// By default every call succeeds and echoes nothing back, matching a
/// server that confirms without changing anything. Push responses to
/// override the next single-record calls in FIFO order; flip
/// [`ScriptedRemote::set_offline`] to fail everything with status 0.
#[derive(Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<RemoteCall>>,
    script: Mutex<VecDeque<RemoteResult<Record>>>,
    list_script: Mutex<VecDeque<RemoteResult<Vec<Record>>>>,
    offline: AtomicBool,
}

impl ScriptedRemote {
    /// Creates a remote that accepts everything.
    pub fn new() -> ScriptedRemote {
        ScriptedRemote::default()
    }

    /// Queues a response for the next `get`/`create`/`update`/`remove`.
    pub fn push_response(&self, response: RemoteResult<Record>) {
        self.script.lock().push_back(response);
    }

    /// Queues a response for the next `all`/`query`.
    pub fn push_list_response(&self, response: RemoteResult<Vec<Record>>) {
        self.list_script.lock().push_back(response);
    }

    /// Makes every call fail with status 0 until turned off again.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Drains and returns the recorded calls.
    pub fn take_calls(&self) -> Vec<RemoteCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }

    fn next(&self) -> RemoteResult<Record> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Offline);
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Record::new()))
    }

    fn next_list(&self) -> RemoteResult<Vec<Record>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Offline);
        }
        self.list_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

impl RemoteService for ScriptedRemote {
    fn all(&self, kind: &str, _options: &RequestOptions) -> RemoteResult<Vec<Record>> {
        self.record(RemoteCall::All {
            kind: kind.to_string(),
        });
        self.next_list()
    }

    fn get(&self, kind: &str, key: &Key, _options: &RequestOptions) -> RemoteResult<Record> {
        self.record(RemoteCall::Get {
            kind: kind.to_string(),
            key: key.to_string(),
        });
        self.next()
    }

    fn create(
        &self,
        kind: &str,
        key: &Key,
        encoded: &Record,
        _options: &RequestOptions,
    ) -> RemoteResult<Record> {
        self.record(RemoteCall::Create {
            kind: kind.to_string(),
            key: key.to_string(),
            payload: encoded.clone(),
        });
        self.next()
    }

    fn update(
        &self,
        kind: &str,
        key: &Key,
        encoded: &Record,
        _options: &RequestOptions,
    ) -> RemoteResult<Record> {
        self.record(RemoteCall::Update {
            kind: kind.to_string(),
            key: key.to_string(),
            payload: encoded.clone(),
        });
        self.next()
    }

    fn remove(&self, kind: &str, key: &Key, _options: &RequestOptions) -> RemoteResult<Record> {
        self.record(RemoteCall::Remove {
            kind: kind.to_string(),
            key: key.to_string(),
        });
        self.next()
    }

    fn query(
        &self,
        url: &str,
        body: &Record,
        _options: &RequestOptions,
    ) -> RemoteResult<Vec<Record>> {
        self.record(RemoteCall::Query {
            url: url.to_string(),
            body: body.clone(),
        });
        self.next_list()
    }
}

/// A fresh [`ScriptedRemote`] behind an `Arc`, ready for injection.
pub fn scripted_remote() -> Arc<ScriptedRemote> {
    Arc::new(ScriptedRemote::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_calls_in_order() {
        let remote = ScriptedRemote::new();
        let options = RequestOptions::default();
        let _ = remote.get("task", &Key::from("t1"), &options);
        let _ = remote.remove("task", &Key::from("t1"), &options);
        assert_eq!(
            remote.calls(),
            vec![
                RemoteCall::Get {
                    kind: "task".into(),
                    key: "t1".into()
                },
                RemoteCall::Remove {
                    kind: "task".into(),
                    key: "t1".into()
                },
            ]
        );
    }

    #[test]
    fn scripted_responses_are_fifo() {
        let remote = ScriptedRemote::new();
        let body = match json!({"x": 1}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        remote.push_response(Ok(body.clone()));
        remote.push_response(Err(RemoteError::NotFound { status: 404 }));

        let options = RequestOptions::default();
        assert_eq!(remote.get("task", &Key::from("a"), &options), Ok(body));
        assert_eq!(
            remote.get("task", &Key::from("b"), &options),
            Err(RemoteError::NotFound { status: 404 })
        );
        // Script exhausted: back to the accepting default.
        assert_eq!(
            remote.get("task", &Key::from("c"), &options),
            Ok(Record::new())
        );
    }

    #[test]
    fn offline_overrides_script() {
        let remote = ScriptedRemote::new();
        remote.push_response(Ok(Record::new()));
        remote.set_offline(true);
        let options = RequestOptions::default();
        assert_eq!(
            remote.get("task", &Key::from("a"), &options),
            Err(RemoteError::Offline)
        );
        remote.set_offline(false);
        assert!(remote.get("task", &Key::from("a"), &options).is_ok());
    }
}
