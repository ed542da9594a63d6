//! Remote service abstraction.
//!
//! The core never speaks a wire protocol itself; callers inject a
//! [`RemoteService`] implementation (HTTP, gRPC, in-memory for tests).
//! Three status values carry fixed meaning: `0` is "no connectivity",
//! `404`/`410` are "resource absent", and `409` is "conflict, body
//! carries authoritative state".

use crate::error::SyncError;
use crate::key::Key;
use crate::record::Record;
use crate::config::RequestOptions;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure of a remote call, classified by status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Status 0: no connectivity. The operation parks until online.
    Offline,
    /// Status 404/410: the resource is gone remotely.
    NotFound {
        /// The reported status code.
        status: u16,
    },
    /// Status 409: the body carries the authoritative server state.
    Conflict {
        /// Authoritative record returned by the server.
        record: Record,
    },
    /// Any other failing status.
    Status {
        /// The reported status code.
        status: u16,
        /// Error message from the service.
        message: String,
    },
}

impl RemoteError {
    /// Classifies a raw status code plus optional body.
    pub fn from_status(status: u16, message: impl Into<String>, body: Option<Record>) -> Self {
        match status {
            0 => RemoteError::Offline,
            404 | 410 => RemoteError::NotFound { status },
            409 => RemoteError::Conflict {
                record: body.unwrap_or_default(),
            },
            _ => RemoteError::Status {
                status,
                message: message.into(),
            },
        }
    }

    /// Maps to the crate-level error taxonomy.
    pub fn to_sync_error(&self) -> SyncError {
        match self {
            RemoteError::Offline => SyncError::Offline,
            RemoteError::NotFound { status } => SyncError::NotFound { status: *status },
            RemoteError::Conflict { .. } => SyncError::Conflict,
            RemoteError::Status { status, message } => SyncError::remote(*status, message.clone()),
        }
    }
}

/// The remote REST collaborator.
///
/// All calls are blocking from the pipeline's point of view; an
/// implementation backed by an async client should block on its own
/// runtime internally.
pub trait RemoteService: Send + Sync {
    /// Fetches every record of a type.
    fn all(&self, kind: &str, options: &RequestOptions) -> RemoteResult<Vec<Record>>;

    /// Fetches one record by key.
    fn get(&self, kind: &str, key: &Key, options: &RequestOptions) -> RemoteResult<Record>;

    /// Creates a record. The returned record may carry server-assigned
    /// fields (keys, timestamps) merged back into the model.
    fn create(
        &self,
        kind: &str,
        key: &Key,
        encoded: &Record,
        options: &RequestOptions,
    ) -> RemoteResult<Record>;

    /// Updates a record with a field diff.
    fn update(
        &self,
        kind: &str,
        key: &Key,
        encoded: &Record,
        options: &RequestOptions,
    ) -> RemoteResult<Record>;

    /// Removes a record.
    fn remove(&self, kind: &str, key: &Key, options: &RequestOptions) -> RemoteResult<Record>;

    /// Executes an ad-hoc query against a URL with a query body.
    fn query(&self, url: &str, body: &Record, options: &RequestOptions)
        -> RemoteResult<Vec<Record>>;
}

/// A remote service that accepts every write and returns nothing.
///
/// Useful for local-only applications whose cascade defaults still
/// include the Rest bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRemote;

impl RemoteService for NullRemote {
    fn all(&self, _kind: &str, _options: &RequestOptions) -> RemoteResult<Vec<Record>> {
        Ok(Vec::new())
    }

    fn get(&self, _kind: &str, _key: &Key, _options: &RequestOptions) -> RemoteResult<Record> {
        Ok(Record::new())
    }

    fn create(
        &self,
        _kind: &str,
        _key: &Key,
        _encoded: &Record,
        _options: &RequestOptions,
    ) -> RemoteResult<Record> {
        Ok(Record::new())
    }

    fn update(
        &self,
        _kind: &str,
        _key: &Key,
        _encoded: &Record,
        _options: &RequestOptions,
    ) -> RemoteResult<Record> {
        Ok(Record::new())
    }

    fn remove(&self, _kind: &str, _key: &Key, _options: &RequestOptions) -> RemoteResult<Record> {
        Ok(Record::new())
    }

    fn query(
        &self,
        _url: &str,
        _body: &Record,
        _options: &RequestOptions,
    ) -> RemoteResult<Vec<Record>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        assert_eq!(RemoteError::from_status(0, "", None), RemoteError::Offline);
        assert_eq!(
            RemoteError::from_status(404, "", None),
            RemoteError::NotFound { status: 404 }
        );
        assert_eq!(
            RemoteError::from_status(410, "", None),
            RemoteError::NotFound { status: 410 }
        );
        assert!(matches!(
            RemoteError::from_status(409, "", None),
            RemoteError::Conflict { .. }
        ));
        assert!(matches!(
            RemoteError::from_status(500, "boom", None),
            RemoteError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn conflict_carries_body() {
        let body = match json!({"x": 9}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let err = RemoteError::from_status(409, "", Some(body.clone()));
        assert_eq!(err, RemoteError::Conflict { record: body });
        assert_eq!(err.to_sync_error(), SyncError::Conflict);
    }

    #[test]
    fn null_remote_accepts_everything() {
        let remote = NullRemote;
        let options = RequestOptions::default();
        assert!(remote.all("task", &options).unwrap().is_empty());
        assert!(remote
            .create("task", &Key::from("k"), &Record::new(), &options)
            .is_ok());
    }
}
