//! Error types for the synchronization core.

use thiserror::Error;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can surface from the operation pipeline and public API.
///
/// Errors are `Clone` so a settled [`Promise`](crate::promise::Promise)
/// can hand the same terminal outcome to every listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The record no longer exists remotely (HTTP 404/410).
    #[error("record not found remotely (status {status})")]
    NotFound {
        /// The status code reported by the remote service.
        status: u16,
    },

    /// The remote service reported a conflict (HTTP 409). The
    /// authoritative server state has already been merged in.
    #[error("remote conflict, server state applied")]
    Conflict,

    /// No connectivity (status 0 or a negative online probe). The
    /// remote leg of the operation is parked until reconnect.
    #[error("offline, remote stage deferred")]
    Offline,

    /// The remote service rejected the request with an unclassified
    /// status.
    #[error("remote failure (status {status}): {message}")]
    Remote {
        /// The status code reported by the remote service.
        status: u16,
        /// Error message from the service.
        message: String,
    },

    /// The local store adapter reported a failure.
    #[error("local store failure: {0}")]
    LocalStore(String),

    /// A type name did not resolve to a registered database.
    #[error("unknown model type: {0}")]
    UnknownType(String),

    /// A relation was declared against a type missing from the
    /// registry at build time.
    #[error("relation {relation} targets unregistered type {target}")]
    UnresolvedRelation {
        /// Name of the relation.
        relation: String,
        /// Target type name that failed to resolve.
        target: String,
    },

    /// The model has no resolvable key.
    #[error("model has no resolvable key")]
    MissingKey,

    /// The operation was canceled before it settled.
    #[error("operation canceled")]
    Canceled,

    /// A listener or plugin hook failed while an operation ran. The
    /// operation is finished so the queue cannot deadlock.
    #[error("internal failure during operation: {0}")]
    Internal(String),
}

impl SyncError {
    /// Creates a remote failure from a raw status and message.
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the error means the record is gone remotely
    /// and should be destroyed locally.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    /// Returns true if the error suspends the remote leg until the
    /// next online transition.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::NotFound { status: 404 }.is_not_found());
        assert!(SyncError::NotFound { status: 410 }.is_not_found());
        assert!(!SyncError::Offline.is_not_found());
        assert!(SyncError::Offline.is_offline());
        assert!(!SyncError::remote(500, "boom").is_offline());
    }

    #[test]
    fn display() {
        let err = SyncError::remote(500, "internal");
        assert!(err.to_string().contains("500"));
        assert_eq!(
            SyncError::MissingKey.to_string(),
            "model has no resolvable key"
        );
    }
}
