//! Model instances: shared handles over per-record state.

use crate::cascade::Cascade;
use crate::config::RequestOptions;
use crate::database::{Database, DatabaseInner};
use crate::error::SyncError;
use crate::events::Listeners;
use crate::key::Key;
use crate::operation::{self, OpKind, OpQueue};
use crate::promise::Promise;
use crate::record::Record;
use crate::relation::{ModelRef, Related, RelationState};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Lifecycle status of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelStatus {
    /// No pending work; in-memory state matches the last confirmed
    /// stores.
    #[default]
    Synced = 0,
    /// A save has been recorded locally but not yet confirmed
    /// remotely.
    SavePending = 1,
    /// A removal has been recorded locally but not yet confirmed
    /// remotely.
    RemovePending = 2,
    /// The model has been removed everywhere it was asked to be.
    Removed = 3,
}

impl ModelStatus {
    /// The persisted status code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decodes a persisted status code.
    pub fn from_code(code: u8) -> Option<ModelStatus> {
        match code {
            0 => Some(ModelStatus::Synced),
            1 => Some(ModelStatus::SavePending),
            2 => Some(ModelStatus::RemovePending),
            3 => Some(ModelStatus::Removed),
            _ => None,
        }
    }

    /// Returns true for RemovePending and Removed.
    pub fn is_removing(self) -> bool {
        matches!(self, ModelStatus::RemovePending | ModelStatus::Removed)
    }
}

/// Lifecycle and failure events emitted by a model.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// The model was saved. `remote` is true when the change was
    /// confirmed by (or originated from) the remote service.
    Saved {
        /// Whether the save came from remote data.
        remote: bool,
    },
    /// The model was removed. `remote` is true when the removal came
    /// from the remote service or a live event.
    Removed {
        /// Whether the removal came from remote data.
        remote: bool,
    },
    /// The model's key changed (server-assigned keys).
    KeyChanged {
        /// Previous key.
        old: Key,
        /// New key.
        new: Key,
    },
    /// A remote fetch failed.
    RemoteGetFailure(SyncError),
    /// A remote save failed.
    RemoteSaveFailure(SyncError),
    /// A remote removal failed.
    RemoteRemoveFailure(SyncError),
    /// The local store adapter failed; the cascade proceeded anyway.
    LocalSaveFailure(String),
    /// The remote reported 409 and its state was applied.
    SaveConflict {
        /// Authoritative record from the server.
        record: Record,
    },
    /// A remote stage was deferred for lack of connectivity.
    Offline,
}

/// Bookkeeping for the last locally persisted envelope.
///
/// Its `saved` sub-field shares the same `Arc` as the model's own
/// `$saved`, keeping the two in lockstep.
#[derive(Debug, Clone, Default)]
pub(crate) struct LocalSnapshot {
    pub saved: Option<Arc<Record>>,
}

pub(crate) struct ModelState {
    pub fields: Record,
    pub key: Option<Key>,
    pub status: ModelStatus,
    /// Last value confirmed by the remote; absent means never created
    /// remotely.
    pub saved: Option<Arc<Record>>,
    /// Last value persisted to the local cache.
    pub local: Option<LocalSnapshot>,
    /// Snapshot of the fields most recently sent remotely.
    pub saving: Option<Record>,
    pub relations: HashMap<String, RelationState>,
    /// Models this model depends on: they must be saved remotely
    /// before this model's own remote save proceeds.
    pub dependents: HashMap<String, Model>,
    /// True while a one-shot online-resume listener is armed.
    pub resume_armed: bool,
}

impl Default for ModelState {
    fn default() -> Self {
        ModelState {
            fields: Record::new(),
            key: None,
            status: ModelStatus::Synced,
            saved: None,
            local: None,
            saving: None,
            relations: HashMap::new(),
            dependents: HashMap::new(),
            resume_armed: false,
        }
    }
}

pub(crate) struct ModelInner {
    pub db: Weak<DatabaseInner>,
    pub state: RwLock<ModelState>,
    pub queue: Mutex<OpQueue>,
    pub events: Listeners<ModelEvent>,
}

/// A model instance. Cloning shares the underlying state.
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Arc<ModelInner>,
}

impl Model {
    pub(crate) fn new(db: Weak<DatabaseInner>, fields: Record) -> Model {
        Model {
            inner: Arc::new(ModelInner {
                db,
                state: RwLock::new(ModelState {
                    fields,
                    ..ModelState::default()
                }),
                queue: Mutex::new(OpQueue::default()),
                events: Listeners::new(),
            }),
        }
    }

    /// Returns true if both handles refer to the same instance.
    pub fn same(a: &Model, b: &Model) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// A stable identifier for this instance, independent of its key.
    pub(crate) fn uid(&self) -> String {
        format!("{:p}", Arc::as_ptr(&self.inner))
    }

    /// The owning database, if it is still alive.
    pub fn database(&self) -> Option<Database> {
        self.inner.db.upgrade().map(Database::from_inner)
    }

    /// Lifecycle and failure events for this model.
    pub fn events(&self) -> &Listeners<ModelEvent> {
        &self.inner.events
    }

    /// The model's resolved key, if established.
    pub fn key(&self) -> Option<Key> {
        self.inner.state.read().key.clone()
    }

    /// The current status.
    pub fn status(&self) -> ModelStatus {
        self.inner.state.read().status
    }

    /// Returns true once the remote service has confirmed a save.
    pub fn is_saved_remotely(&self) -> bool {
        self.inner.state.read().saved.is_some()
    }

    /// Returns true once the model has been removed.
    pub fn is_removed(&self) -> bool {
        self.status() == ModelStatus::Removed
    }

    /// The last remote-confirmed snapshot.
    pub fn saved_snapshot(&self) -> Option<Arc<Record>> {
        self.inner.state.read().saved.clone()
    }

    /// The saved sub-field of the last locally persisted snapshot.
    ///
    /// Shares the same allocation as [`Model::saved_snapshot`] while
    /// the two are in lockstep.
    pub fn local_saved_snapshot(&self) -> Option<Arc<Record>> {
        self.inner
            .state
            .read()
            .local
            .as_ref()
            .and_then(|local| local.saved.clone())
    }

    /// Returns true if the model has ever been persisted locally.
    pub fn is_cached_locally(&self) -> bool {
        self.inner.state.read().local.is_some()
    }

    /// Reads one field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.state.read().fields.get(field).cloned()
    }

    /// A snapshot of all fields.
    pub fn fields(&self) -> Record {
        self.inner.state.read().fields.clone()
    }

    /// Writes one field. The change is in-memory until saved.
    pub fn set(&self, field: &str, value: impl Into<Value>) {
        self.inner
            .state
            .write()
            .fields
            .insert(field.to_string(), value.into());
        if let Some(db) = self.database() {
            db.resort();
        }
    }

    /// Writes several fields at once.
    pub fn set_fields(&self, fields: Record) {
        {
            let mut state = self.inner.state.write();
            for (name, value) in fields {
                state.fields.insert(name, value);
            }
        }
        if let Some(db) = self.database() {
            db.resort();
        }
    }

    /// Saves with the type's default cascade.
    pub fn save(&self) -> Promise {
        let cascade = self
            .database()
            .map(|db| db.options().cascade_save)
            .unwrap_or_default();
        self.save_cascade(cascade)
    }

    /// Saves with an explicit cascade.
    pub fn save_cascade(&self, cascade: Cascade) -> Promise {
        self.save_with(cascade, RequestOptions::default())
    }

    /// Saves with an explicit cascade and request options.
    pub fn save_with(&self, cascade: Cascade, options: RequestOptions) -> Promise {
        if cascade.is_none() {
            return Promise::resolved();
        }
        operation::enqueue(self, OpKind::SaveLocal, cascade, options)
    }

    /// Removes with the type's default cascade.
    pub fn remove(&self) -> Promise {
        let cascade = self
            .database()
            .map(|db| db.options().cascade_remove)
            .unwrap_or_default();
        self.remove_cascade(cascade)
    }

    /// Removes with an explicit cascade.
    pub fn remove_cascade(&self, cascade: Cascade) -> Promise {
        self.remove_with(cascade, RequestOptions::default())
    }

    /// Removes with an explicit cascade and request options.
    pub fn remove_with(&self, cascade: Cascade, options: RequestOptions) -> Promise {
        if cascade.is_none() {
            return Promise::resolved();
        }
        operation::enqueue(self, OpKind::RemoveLocal, cascade, options)
    }

    /// Re-fetches from the remote service (and local cache first when
    /// the cascade asks for it and nothing is loaded yet).
    pub fn refresh(&self) -> Promise {
        let cascade = self
            .database()
            .map(|db| db.options().cascade_get)
            .unwrap_or_default();
        self.refresh_cascade(cascade)
    }

    /// Refreshes with an explicit cascade.
    pub fn refresh_cascade(&self, cascade: Cascade) -> Promise {
        self.refresh_with(cascade, RequestOptions::default())
    }

    /// Refreshes with an explicit cascade and request options.
    pub fn refresh_with(&self, cascade: Cascade, options: RequestOptions) -> Promise {
        if cascade.is_none() {
            return Promise::resolved();
        }
        operation::enqueue(self, OpKind::GetRemote, cascade, options)
    }

    /// Cancels queued (not yet started) operations and disarms any
    /// offline resume. When `reset` is true a SavePending status rolls
    /// back to Synced if a remote-confirmed snapshot exists.
    pub fn cancel(&self, reset: bool) {
        operation::cancel_queued(self);
        let mut state = self.inner.state.write();
        state.resume_armed = false;
        if reset && state.status == ModelStatus::SavePending && state.saved.is_some() {
            state.status = ModelStatus::Synced;
        }
    }

    /// Registers a model this one depends on for remote save
    /// ordering.
    pub fn add_dependent(&self, dependency: &Model) {
        self.inner
            .state
            .write()
            .dependents
            .insert(dependency.uid(), dependency.clone());
    }

    /// Removes a dependency registration.
    pub fn remove_dependent(&self, dependency: &Model) {
        self.inner.state.write().dependents.remove(&dependency.uid());
    }

    /// Dependencies that have not yet been confirmed remotely.
    pub(crate) fn unsaved_dependents(&self) -> Vec<Model> {
        self.inner
            .state
            .read()
            .dependents
            .values()
            .filter(|m| !m.is_saved_remotely() && !m.status().is_removing())
            .cloned()
            .collect()
    }

    /// The related value of a named relation.
    pub fn get_related(&self, name: &str) -> Option<Related> {
        let db = self.database()?;
        let relation = db.relation(name)?;
        Some(relation.related(self))
    }

    /// Replaces a relation's value.
    pub fn set_related(&self, name: &str, value: ModelRef) {
        if let Some(relation) = self.database().and_then(|db| db.relation(name)) {
            relation.set(self, value, false);
        }
    }

    /// Adds to a relation (single relations behave like `set`).
    pub fn relate(&self, name: &str, value: ModelRef) {
        if let Some(relation) = self.database().and_then(|db| db.relation(name)) {
            relation.relate(self, value);
        }
    }

    /// Removes from a relation; `None` clears it entirely.
    pub fn unrelate(&self, name: &str, value: Option<ModelRef>) {
        if let Some(relation) = self.database().and_then(|db| db.relation(name)) {
            relation.unrelate(self, value);
        }
    }

    /// Re-derives a relation from current foreign-key state.
    pub fn sync_related(&self, name: &str, remove_unrelated: bool) {
        if let Some(relation) = self.database().and_then(|db| db.relation(name)) {
            relation.sync(self, remove_unrelated);
        }
    }

    /// Membership test against a relation.
    pub fn is_related(&self, name: &str, candidate: &ModelRef) -> bool {
        self.database()
            .and_then(|db| db.relation(name))
            .map(|relation| relation.is_related(self, candidate))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Model")
            .field("key", &state.key)
            .field("status", &state.status)
            .field("fields", &state.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for status in [
            ModelStatus::Synced,
            ModelStatus::SavePending,
            ModelStatus::RemovePending,
            ModelStatus::Removed,
        ] {
            assert_eq!(ModelStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ModelStatus::from_code(9), None);
    }

    #[test]
    fn removing_statuses() {
        assert!(ModelStatus::RemovePending.is_removing());
        assert!(ModelStatus::Removed.is_removing());
        assert!(!ModelStatus::SavePending.is_removing());
        assert!(!ModelStatus::Synced.is_removing());
    }
}
