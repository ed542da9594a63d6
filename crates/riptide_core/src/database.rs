//! Per-type databases and the registry binding them together.
//!
//! A [`Database`] owns every in-memory model of one type: the identity
//! map, the sorted collection, key handling, and the relation
//! strategies declared for the type. The [`Registry`] wires databases
//! to the shared collaborators (remote service, local store, live
//! channel), tracks connectivity, and surfaces global errors.
//!
//! Registries are built in two phases through [`RegistryBuilder`]:
//! databases first, then relations, so every relation target resolves
//! (or fails loudly) before any model exists.

use crate::collection::{Comparator, FilteredCollection, ModelCollection};
use crate::config::{DatabaseOptions, RequestOptions};
use crate::error::{SyncError, SyncResult};
use crate::events::Listeners;
use crate::key::{Key, KeyHandler};
use crate::live::{LiveChannel, NullLive};
use crate::model::{LocalSnapshot, Model, ModelEvent, ModelStatus};
use crate::operation::{self, OpKind};
use crate::promise::Promise;
use crate::record::{self, Record};
use crate::relation::{self, Relation, RelationDef};
use crate::remote::RemoteService;
use crate::store::{LocalStore, MemoryStore};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub(crate) struct DatabaseInner {
    pub options: DatabaseOptions,
    pub key_handler: KeyHandler,
    pub registry: Weak<RegistryInner>,
    /// Identity map and sorted collection in one: at most one live
    /// instance per key.
    pub models: ModelCollection,
    pub relations: RwLock<BTreeMap<String, Arc<dyn Relation>>>,
}

/// All models of one type. Cloning shares the underlying state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Database {
        Database { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<DatabaseInner> {
        Arc::downgrade(&self.inner)
    }

    /// The type name.
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// The type's configuration.
    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    /// The type's key handler.
    pub fn key_handler(&self) -> &KeyHandler {
        &self.inner.key_handler
    }

    /// The owning registry, if it is still alive.
    pub fn registry(&self) -> Option<Registry> {
        self.inner.registry.upgrade().map(|inner| Registry { inner })
    }

    pub(crate) fn remote(&self) -> Option<Arc<dyn RemoteService>> {
        self.inner
            .registry
            .upgrade()
            .map(|registry| Arc::clone(&registry.remote))
    }

    pub(crate) fn store(&self) -> Option<Arc<dyn LocalStore>> {
        self.inner
            .registry
            .upgrade()
            .map(|registry| Arc::clone(&registry.store))
    }

    pub(crate) fn live(&self) -> Option<Arc<dyn LiveChannel>> {
        self.inner
            .registry
            .upgrade()
            .map(|registry| Arc::clone(&registry.live))
    }

    pub(crate) fn cache_enabled(&self) -> bool {
        self.inner.options.cache != crate::config::CacheMode::None
    }

    /// The store namespace for a key: `type-name/serialized-key`.
    pub(crate) fn store_key(&self, key: &Key) -> String {
        format!("{}/{}", self.name(), self.inner.key_handler.serialize(key))
    }

    /// The sorted collection of all in-memory models of this type.
    pub fn models(&self) -> ModelCollection {
        self.inner.models.clone()
    }

    /// A live-filtered view over this type's collection.
    pub fn filtered<F>(&self, filter: F) -> Arc<FilteredCollection>
    where
        F: Fn(&Model) -> bool + Send + Sync + 'static,
    {
        FilteredCollection::new(&self.inner.models, filter)
    }

    /// Looks up a model by key.
    pub fn get(&self, key: &Key) -> Option<Model> {
        self.inner.models.get(key)
    }

    /// Number of in-memory models.
    pub fn len(&self) -> usize {
        self.inner.models.len()
    }

    /// Returns true if no models are loaded.
    pub fn is_empty(&self) -> bool {
        self.inner.models.is_empty()
    }

    /// The named relation strategy, if declared.
    pub fn relation(&self, name: &str) -> Option<Arc<dyn Relation>> {
        self.inner.relations.read().get(name).cloned()
    }

    /// Instantiates a model from a record without saving it. Type
    /// defaults are applied under the record's own fields; the model
    /// is registered if the record carries a resolvable key.
    pub fn instantiate(&self, record: Record) -> SyncResult<Model> {
        self.build_model(record, false)
    }

    /// Creates a model and saves it with the type's default cascade.
    pub fn create(&self, record: Record) -> SyncResult<(Model, Promise)> {
        let model = self.build_model(record, false)?;
        let promise = model.save();
        Ok((model, promise))
    }

    /// Returns the model under `key`, or a registered stub carrying
    /// only its key fields. Stubs are how foreign keys reference
    /// models that have not been loaded yet.
    pub fn stub(&self, key: Key) -> Model {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        let mut fields = Record::new();
        self.inner.key_handler.write_key(&key, &mut fields);
        let model = Model::new(self.downgrade(), fields);
        model.inner.state.write().key = Some(key.clone());
        self.register(key, &model);
        model
    }

    /// Returns the model under `key`, loading it through the local
    /// cache and remote service if it is not in memory. The promise
    /// settles when the load chain finishes.
    pub fn fetch(&self, key: impl Into<Key>) -> (Model, Promise) {
        let key = key.into();
        if let Some(existing) = self.get(&key) {
            return (existing, Promise::resolved());
        }
        let model = self.stub(key);
        let cascade = self.inner.options.cascade_get;
        let promise = operation::enqueue(&model, OpKind::GetLocal, cascade, RequestOptions::new());
        (model, promise)
    }

    /// Fetches every record of this type from the remote service and
    /// materializes it through the identity map.
    pub fn fetch_all(&self, options: &RequestOptions) -> SyncResult<Vec<Model>> {
        let Some(remote) = self.remote() else {
            return Ok(Vec::new());
        };
        let records = remote
            .all(self.name(), options)
            .map_err(|err| err.to_sync_error())?;
        let mut models = Vec::with_capacity(records.len());
        self.inner.models.delay_sorting(|| -> SyncResult<()> {
            for record in records {
                models.push(self.materialize(record, true)?);
            }
            Ok(())
        })?;
        Ok(models)
    }

    /// Restores every cached model of this type from the local store.
    ///
    /// Restored pending statuses re-enqueue their deferred remote leg,
    /// so work interrupted by a shutdown resumes on boot. Returns the
    /// number of models restored.
    pub fn load_all(&self) -> SyncResult<usize> {
        if !self.cache_enabled() {
            return Ok(0);
        }
        let Some(store) = self.store() else {
            return Ok(0);
        };
        let prefix = format!("{}/", self.name());
        let entries = store.all().map_err(|err| SyncError::LocalStore(err.0))?;

        let mut restored = 0;
        for (store_key, envelope) in entries {
            let Some(serialized) = store_key.strip_prefix(&prefix) else {
                continue;
            };
            let Some(key) = self.inner.key_handler.parse(serialized) else {
                continue;
            };
            if self.get(&key).is_some() {
                continue;
            }

            let (fields, status_code, saved) = record::decode_local(envelope);
            let status = status_code
                .and_then(ModelStatus::from_code)
                .unwrap_or(ModelStatus::Synced);
            let model = Model::new(self.downgrade(), fields);
            {
                let mut state = model.inner.state.write();
                state.key = Some(key.clone());
                state.status = status;
                let saved = saved.map(Arc::new);
                state.saved = saved.clone();
                state.local = Some(LocalSnapshot { saved });
            }
            self.register(key, &model);
            self.init_relations(&model, true);
            restored += 1;

            match status {
                ModelStatus::SavePending => {
                    let _ = operation::enqueue(
                        &model,
                        OpKind::SaveRemote,
                        self.inner.options.cascade_save,
                        RequestOptions::new(),
                    );
                }
                ModelStatus::RemovePending => {
                    let _ = operation::enqueue(
                        &model,
                        OpKind::RemoveRemote,
                        self.inner.options.cascade_remove,
                        RequestOptions::new(),
                    );
                }
                _ => {}
            }
        }
        if restored > 0 {
            self.resort();
            info!(db = self.name(), restored, "restored models from local store");
        }
        Ok(restored)
    }

    /// Routes an inbound live save: merges the published record into
    /// the identified model (materializing it if unknown) and persists
    /// the result. Models mid-removal ignore the event.
    pub fn live_save(&self, serialized_key: &str, published: Record) -> SyncResult<Model> {
        let key = self
            .inner
            .key_handler
            .parse(serialized_key)
            .ok_or(SyncError::MissingKey)?;
        let model = match self.get(&key) {
            Some(model) => {
                if model.status().is_removing() {
                    return Ok(model);
                }
                self.apply_remote(&model, published);
                model
            }
            None => {
                let mut record = published;
                self.inner.key_handler.write_key(&key, &mut record);
                self.materialize(record, true)?
            }
        };
        if self.cache_enabled() {
            let _ = operation::enqueue(
                &model,
                OpKind::SaveNow,
                crate::cascade::Cascade::LOCAL,
                RequestOptions::new(),
            );
        }
        Ok(model)
    }

    /// Routes an inbound live removal, destroying the identified model
    /// locally. Returns the model if it was known.
    pub fn live_remove(&self, serialized_key: &str) -> Option<Model> {
        let key = self.inner.key_handler.parse(serialized_key)?;
        let model = self.get(&key)?;
        self.destroy_local(&model, true);
        Some(model)
    }

    /// Detaches every in-memory model without touching the stores.
    pub fn clear(&self) {
        self.inner.models.clear();
    }

    // --- pipeline and relation support -----------------------------

    /// Builds a model from a record. `remote` marks the record as
    /// remote-confirmed, seeding the `$saved` snapshot and suppressing
    /// relation auto-saves during initialization.
    pub(crate) fn materialize(&self, record: Record, remote: bool) -> SyncResult<Model> {
        if let Some(key) = self.inner.key_handler.key_of(&record) {
            if let Some(existing) = self.get(&key) {
                if remote {
                    self.apply_remote(&existing, record);
                } else {
                    existing.set_fields(record);
                }
                return Ok(existing);
            }
        }
        self.build_model(record, remote)
    }

    fn build_model(&self, record: Record, remote: bool) -> SyncResult<Model> {
        let mut fields = self.inner.options.defaults.clone();
        record::merge(&mut fields, &record);
        let key = self.inner.key_handler.key_of(&fields);

        let model = Model::new(self.downgrade(), fields);
        {
            let mut state = model.inner.state.write();
            state.key = key.clone();
            if remote {
                let snapshot = Arc::new(state.fields.clone());
                state.saved = Some(snapshot);
            }
        }
        if let Some(key) = key {
            self.register(key, &model);
        }
        self.init_relations(&model, remote);
        Ok(model)
    }

    fn init_relations(&self, model: &Model, remote: bool) {
        let relations: Vec<Arc<dyn Relation>> =
            self.inner.relations.read().values().cloned().collect();
        for relation in relations {
            relation.init(model, remote);
        }
    }

    fn register(&self, key: Key, model: &Model) {
        debug!(db = self.name(), key = %key, "registering model");
        self.inner.models.insert(key, model.clone());
    }

    /// Establishes the model's key (generating one if needed) and
    /// registers it in the identity map.
    pub(crate) fn ensure_registered(&self, model: &Model) -> SyncResult<Key> {
        if let Some(key) = model.key() {
            return Ok(key);
        }
        let key = {
            let mut state = model.inner.state.write();
            let key = self.inner.key_handler.ensure_key(&mut state.fields)?;
            state.key = Some(key.clone());
            key
        };
        self.register(key.clone(), model);
        Ok(key)
    }

    /// Removes the model from the identity map if it is the registered
    /// instance for its key.
    pub(crate) fn detach(&self, model: &Model) {
        let Some(key) = model.key() else { return };
        let registered = self.get(&key);
        if registered.map(|m| Model::same(&m, model)).unwrap_or(false) {
            self.inner.models.remove(&key);
        }
    }

    /// Merges remote-confirmed data into a model: fields, the shared
    /// `$saved` snapshot, status, key, ordering, and relation state.
    pub(crate) fn apply_remote(&self, model: &Model, returned: Record) {
        {
            let mut state = model.inner.state.write();
            record::merge(&mut state.fields, &returned);
            let snapshot = Arc::new(state.fields.clone());
            state.saved = Some(Arc::clone(&snapshot));
            if let Some(local) = &mut state.local {
                local.saved = Some(snapshot);
            }
            if !state.status.is_removing() {
                state.status = ModelStatus::Synced;
            }
        }
        self.refresh_key(model);
        self.resort();
        self.sync_relations(model);
        model.events().emit(&ModelEvent::Saved { remote: true });
    }

    fn sync_relations(&self, model: &Model) {
        let relations: Vec<Arc<dyn Relation>> =
            self.inner.relations.read().values().cloned().collect();
        for relation in relations {
            relation.sync(model, false);
        }
    }

    /// Re-derives the model's key from its fields after a save.
    ///
    /// A changed key is honored (re-keying the identity map and
    /// emitting [`ModelEvent::KeyChanged`]) only when the type allows
    /// key changes; otherwise the established key is written back.
    pub(crate) fn refresh_key(&self, model: &Model) {
        enum Change {
            Established(Key),
            Rekeyed { old: Key, new: Key },
        }
        let change = {
            let mut state = model.inner.state.write();
            let derived = self.inner.key_handler.key_of(&state.fields);
            match (&state.key, derived) {
                (None, Some(new)) => {
                    state.key = Some(new.clone());
                    Some(Change::Established(new))
                }
                (Some(old), Some(new)) if *old != new => {
                    if self.inner.options.allow_key_change {
                        let old = old.clone();
                        state.key = Some(new.clone());
                        Some(Change::Rekeyed { old, new })
                    } else {
                        let old = old.clone();
                        self.inner.key_handler.write_key(&old, &mut state.fields);
                        None
                    }
                }
                _ => None,
            }
        };

        match change {
            Some(Change::Established(key)) => {
                self.register(key, model);
            }
            Some(Change::Rekeyed { old, new }) => {
                self.inner.models.rekey(&old, new.clone());
                if model.is_cached_locally() {
                    if let Some(store) = self.store() {
                        let _ = store.remove(&self.store_key(&old));
                    }
                }
                model.events().emit(&ModelEvent::KeyChanged { old, new });
            }
            None => {}
        }
    }

    /// Destroys a model locally: cache entry, identity map, relation
    /// subscriptions, and status. `remote` marks the removal as
    /// remote-sourced in the emitted event.
    pub(crate) fn destroy_local(&self, model: &Model, remote: bool) {
        if self.cache_enabled() && model.is_cached_locally() {
            if let (Some(store), Some(key)) = (self.store(), model.key()) {
                let _ = store.remove(&self.store_key(&key));
            }
        }
        {
            let mut state = model.inner.state.write();
            state.saved = None;
            state.local = None;
            state.saving = None;
            state.status = ModelStatus::Removed;
        }
        self.detach(model);
        self.teardown_relations(model);
        model.events().emit(&ModelEvent::Removed { remote });
    }

    /// Encodes a model for persistence or transmission: its fields
    /// plus whatever each relation contributes for the destination.
    pub(crate) fn encode(&self, model: &Model, for_remote: bool) -> Record {
        let mut out = model.fields();
        let relations: Vec<Arc<dyn Relation>> =
            self.inner.relations.read().values().cloned().collect();
        for relation in relations {
            relation.encode(model, &mut out, for_remote);
        }
        out
    }

    /// Releases every relation subscription held on behalf of a model.
    pub(crate) fn teardown_relations(&self, model: &Model) {
        let relations: Vec<Arc<dyn Relation>> =
            self.inner.relations.read().values().cloned().collect();
        for relation in relations {
            relation.teardown(model);
        }
    }

    /// Re-sorts the type's collection.
    pub(crate) fn resort(&self) {
        self.inner.models.sort();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("len", &self.len())
            .finish()
    }
}

/// A global error surfaced outside any one promise: local store
/// failures mid-cascade, listener panics, unroutable live events.
#[derive(Debug, Clone)]
pub struct RegistryError {
    /// Type name the error occurred under.
    pub type_name: String,
    /// Human-readable description.
    pub message: String,
}

pub(crate) struct RegistryInner {
    databases: RwLock<BTreeMap<String, Arc<DatabaseInner>>>,
    pub remote: Arc<dyn RemoteService>,
    pub store: Arc<dyn LocalStore>,
    pub live: Arc<dyn LiveChannel>,
    online: AtomicBool,
    resume: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    errors: Listeners<RegistryError>,
}

impl RegistryInner {
    pub(crate) fn database_inner(&self, name: &str) -> Option<Arc<DatabaseInner>> {
        self.databases.read().get(name).cloned()
    }
}

/// The set of databases sharing one collaborator stack. Cloning
/// shares the underlying state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The database for a type name.
    pub fn database(&self, name: &str) -> Option<Database> {
        self.inner.database_inner(name).map(Database::from_inner)
    }

    /// The registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        self.inner.databases.read().keys().cloned().collect()
    }

    /// Whether the registry currently believes it is online.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity transition. Going online replays every
    /// parked remote stage, each exactly once.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was {
            let parked: Vec<Box<dyn FnOnce() + Send>> =
                std::mem::take(&mut *self.inner.resume.lock());
            info!(parked = parked.len(), "back online, resuming deferred work");
            for listener in parked {
                listener();
            }
        }
    }

    /// Restores every cached model across all databases. Returns the
    /// total number restored.
    pub fn boot(&self) -> SyncResult<usize> {
        let databases: Vec<Database> = self
            .inner
            .databases
            .read()
            .values()
            .cloned()
            .map(Database::from_inner)
            .collect();
        let mut total = 0;
        for db in databases {
            total += db.load_all()?;
        }
        Ok(total)
    }

    /// Global error events.
    pub fn errors(&self) -> &Listeners<RegistryError> {
        &self.inner.errors
    }

    pub(crate) fn on_online_once(&self, listener: impl FnOnce() + Send + 'static) {
        if self.is_online() {
            listener();
            return;
        }
        self.inner.resume.lock().push(Box::new(listener));
    }

    pub(crate) fn emit_error(&self, type_name: &str, message: &str) {
        self.inner.errors.emit(&RegistryError {
            type_name: type_name.to_string(),
            message: message.to_string(),
        });
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.type_names())
            .field("online", &self.is_online())
            .finish()
    }
}

/// Two-phase registry construction: collaborators and type options
/// first, relations second, resolved together in [`RegistryBuilder::build`].
pub struct RegistryBuilder {
    remote: Arc<dyn RemoteService>,
    store: Arc<dyn LocalStore>,
    live: Arc<dyn LiveChannel>,
    online: bool,
    databases: Vec<DatabaseOptions>,
    relations: Vec<(String, RelationDef)>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Creates a builder with in-memory defaults: a null remote, a
    /// memory store, and a null live channel.
    pub fn new() -> RegistryBuilder {
        RegistryBuilder {
            remote: Arc::new(crate::remote::NullRemote),
            store: Arc::new(MemoryStore::new()),
            live: Arc::new(NullLive),
            online: true,
            databases: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Sets the remote service.
    pub fn remote(mut self, remote: Arc<dyn RemoteService>) -> Self {
        self.remote = remote;
        self
    }

    /// Sets the local store.
    pub fn store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the live channel.
    pub fn live(mut self, live: Arc<dyn LiveChannel>) -> Self {
        self.live = live;
        self
    }

    /// Sets the initial connectivity assumption (online by default).
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Declares a model type.
    pub fn database(mut self, options: DatabaseOptions) -> Self {
        self.databases.push(options);
        self
    }

    /// Declares a relation on a previously (or later) declared type.
    pub fn relation(mut self, owner: impl Into<String>, def: RelationDef) -> Self {
        self.relations.push((owner.into(), def));
        self
    }

    /// Builds the registry, failing if any relation names a type that
    /// was never declared.
    pub fn build(self) -> SyncResult<Registry> {
        let online = self.online;
        let inner = Arc::new_cyclic(|weak: &Weak<RegistryInner>| {
            let mut databases = BTreeMap::new();
            for options in self.databases {
                let key_handler =
                    KeyHandler::new(options.key_fields.clone(), options.key_separator.clone());
                let models =
                    ModelCollection::new(Comparator::by_fields(options.comparator.clone()));
                let name = options.name.clone();
                databases.insert(
                    name,
                    Arc::new(DatabaseInner {
                        options,
                        key_handler,
                        registry: weak.clone(),
                        models,
                        relations: RwLock::new(BTreeMap::new()),
                    }),
                );
            }
            RegistryInner {
                databases: RwLock::new(databases),
                remote: self.remote,
                store: self.store,
                live: self.live,
                online: AtomicBool::new(online),
                resume: Mutex::new(Vec::new()),
                errors: Listeners::new(),
            }
        });

        for (owner, def) in self.relations {
            let owner_inner = inner
                .database_inner(&owner)
                .ok_or_else(|| SyncError::UnknownType(owner.clone()))?;
            let db = Database::from_inner(Arc::clone(&owner_inner));
            let strategy = relation::build(def, &db, &inner)?;
            let name = strategy.def().name.clone();
            owner_inner.relations.write().insert(name, strategy);
        }

        Ok(Registry { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::Cascade;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn registry() -> Registry {
        Registry::builder()
            .database(DatabaseOptions::new("task"))
            .build()
            .unwrap()
    }

    #[test]
    fn create_registers_and_syncs() {
        let registry = registry();
        let db = registry.database("task").unwrap();

        let (model, promise) = db.create(record(json!({"id": "t1", "name": "one"}))).unwrap();
        assert!(promise.outcome().is_some());
        assert_eq!(model.status(), ModelStatus::Synced);
        assert!(model.is_saved_remotely());
        assert!(Model::same(&db.get(&Key::from("t1")).unwrap(), &model));
    }

    #[test]
    fn create_generates_missing_key() {
        let registry = registry();
        let db = registry.database("task").unwrap();

        let (model, _) = db.create(record(json!({"name": "anon"}))).unwrap();
        let key = model.key().expect("key generated");
        assert!(Model::same(&db.get(&key).unwrap(), &model));
    }

    #[test]
    fn identity_map_returns_same_instance() {
        let registry = registry();
        let db = registry.database("task").unwrap();

        let a = db.materialize(record(json!({"id": "t1"})), true).unwrap();
        let b = db.materialize(record(json!({"id": "t1", "name": "n"})), true).unwrap();
        assert!(Model::same(&a, &b));
        assert_eq!(a.get("name"), Some(json!("n")));
    }

    #[test]
    fn local_save_then_boot_restores() {
        let store = Arc::new(MemoryStore::new());
        {
            let registry = Registry::builder()
                .database(DatabaseOptions::new("task"))
                .store(Arc::clone(&store) as Arc<dyn LocalStore>)
                .build()
                .unwrap();
            let db = registry.database("task").unwrap();
            let (model, _) = db.create(record(json!({"id": "t1", "name": "keep"}))).unwrap();
            let promise = model.save_cascade(Cascade::LOCAL);
            assert!(promise.outcome().is_some());
        }

        let registry = Registry::builder()
            .database(DatabaseOptions::new("task"))
            .store(store as Arc<dyn LocalStore>)
            .build()
            .unwrap();
        assert_eq!(registry.boot().unwrap(), 1);
        let db = registry.database("task").unwrap();
        let restored = db.get(&Key::from("t1")).unwrap();
        assert_eq!(restored.get("name"), Some(json!("keep")));
    }

    #[test]
    fn relation_against_unknown_type_fails_build() {
        let result = Registry::builder()
            .database(DatabaseOptions::new("task"))
            .relation("task", RelationDef::belongs_to("list", "task_list", "task_list_id"))
            .build();
        assert!(matches!(
            result,
            Err(SyncError::UnresolvedRelation { .. })
        ));
    }

    #[test]
    fn offline_registry_parks_resume_listeners() {
        let registry = Registry::builder()
            .database(DatabaseOptions::new("task"))
            .online(false)
            .build()
            .unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        registry.on_online_once(move || flag.store(true, Ordering::SeqCst));

        assert!(!fired.load(Ordering::SeqCst));
        registry.set_online(true);
        assert!(fired.load(Ordering::SeqCst));
        // Going online twice must not replay anything.
        registry.set_online(true);
    }

    #[test]
    fn live_remove_destroys_known_model() {
        let registry = registry();
        let db = registry.database("task").unwrap();
        let (model, _) = db.create(record(json!({"id": "t1"}))).unwrap();

        let removed = db.live_remove("t1").unwrap();
        assert!(Model::same(&removed, &model));
        assert!(model.is_removed());
        assert!(db.get(&Key::from("t1")).is_none());
    }
}
