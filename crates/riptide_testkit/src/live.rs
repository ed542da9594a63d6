//! A live channel that records outbound broadcasts.

use parking_lot::Mutex;
use riptide_core::{Key, LiveChannel, Record};
use std::sync::Arc;

/// One recorded broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    /// A published save: type, serialized key, published diff.
    Save {
        /// Type name.
        kind: String,
        /// Serialized key.
        key: String,
        /// Published field diff.
        published: Record,
    },
    /// A published removal.
    Remove {
        /// Type name.
        kind: String,
        /// Serialized key.
        key: String,
    },
}

/// A live channel that keeps every broadcast for assertions.
#[derive(Default)]
pub struct RecordingLive {
    broadcasts: Mutex<Vec<Broadcast>>,
}

impl RecordingLive {
    /// Creates an empty recording channel.
    pub fn new() -> RecordingLive {
        RecordingLive::default()
    }

    /// The broadcasts so far, in order.
    pub fn broadcasts(&self) -> Vec<Broadcast> {
        self.broadcasts.lock().clone()
    }

    /// Number of broadcasts.
    pub fn len(&self) -> usize {
        self.broadcasts.lock().len()
    }

    /// Returns true if nothing was broadcast.
    pub fn is_empty(&self) -> bool {
        self.broadcasts.lock().is_empty()
    }
}

impl LiveChannel for RecordingLive {
    fn save(&self, kind: &str, key: &Key, published: &Record) {
        self.broadcasts.lock().push(Broadcast::Save {
            kind: kind.to_string(),
            key: key.to_string(),
            published: published.clone(),
        });
    }

    fn remove(&self, kind: &str, key: &Key) {
        self.broadcasts.lock().push(Broadcast::Remove {
            kind: kind.to_string(),
            key: key.to_string(),
        });
    }
}

/// A fresh [`RecordingLive`] behind an `Arc`, ready for injection.
pub fn recording_live() -> Arc<RecordingLive> {
    Arc::new(RecordingLive::new())
}
