//! Live publish/subscribe channel abstraction.
//!
//! Outbound broadcasts are fire-and-forget. Inbound live events are
//! delivered by the caller invoking [`Database::live_save`] and
//! [`Database::live_remove`](crate::database::Database::live_remove),
//! which route through the same merge and destroy logic as a refresh.
//!
//! [`Database::live_save`]: crate::database::Database::live_save

use crate::key::Key;
use crate::record::Record;

/// The live broadcast collaborator.
pub trait LiveChannel: Send + Sync {
    /// Broadcasts a save: the published field diff for a key.
    fn save(&self, kind: &str, key: &Key, published: &Record);

    /// Broadcasts a removal.
    fn remove(&self, kind: &str, key: &Key);
}

/// A live channel that drops every broadcast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLive;

impl LiveChannel for NullLive {
    fn save(&self, _kind: &str, _key: &Key, _published: &Record) {}

    fn remove(&self, _kind: &str, _key: &Key) {}
}
