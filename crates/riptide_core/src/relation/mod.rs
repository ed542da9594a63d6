//! The relation synchronization engine.
//!
//! Each relation type is a strategy bound to (declaring type, field
//! name, target type, options) implementing the common [`Relation`]
//! contract. Strategies react to model lifecycle events to keep
//! foreign keys and related collections consistent, and trigger
//! cascading saves and removes.

mod fetched;
mod multiple;
mod poly;
mod single;
mod through;

pub use poly::DiscriminatorDef;

use crate::cascade::Cascade;
use crate::collection::ModelCollection;
use crate::database::{Database, RegistryInner};
use crate::error::{SyncError, SyncResult};
use crate::events::Subscription;
use crate::key::Key;
use crate::model::Model;
use crate::record::Record;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The kind of a relation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Single parent the owner points at; removing the parent
    /// cascade-removes the owner.
    BelongsTo,
    /// Single child the owner points at; removing the child clears
    /// the owner's dangling key.
    HasOne,
    /// Single in-memory reference, never persisted.
    HasReference,
    /// Keyed collection; foreign keys live on the related models.
    HasMany,
    /// Many-to-many through join records.
    HasManyThrough,
    /// Collection populated by a remote query.
    HasRemote,
    /// Embedded list stored inside the owner's record.
    HasList,
}

/// How a relation is written into persisted or transmitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeMode {
    /// The relation is not written.
    #[default]
    None,
    /// Only keys are written.
    Key,
    /// Full related records are nested.
    Model,
}

/// Join-table configuration for [`RelationKind::HasManyThrough`].
#[derive(Debug, Clone)]
pub struct ThroughDef {
    /// Type name of the join records.
    pub through: String,
    /// Join-record field holding the owner's key.
    pub local_key: String,
    /// Join-record field holding the related model's key.
    pub foreign_key: String,
}

/// Declaration of one relation on a model type.
#[derive(Debug, Clone)]
pub struct RelationDef {
    /// Relation (field) name on the owning type.
    pub name: String,
    /// Strategy kind.
    pub kind: RelationKind,
    /// Target type name. Ignored when a discriminator is set.
    pub target: String,
    /// Foreign-key field names. On the owner for single relations, on
    /// the related models for collections.
    pub foreign_key: Vec<String>,
    /// Cascade for automatic saves triggered by foreign-key writes.
    pub cascade_save: Cascade,
    /// Cascade for automatic removals (ninja-remove reactions).
    pub cascade_remove: Cascade,
    /// Whether foreign-key writes schedule automatic saves at all.
    pub auto_save: bool,
    /// How the relation is written into the local envelope.
    pub store: EncodeMode,
    /// How the relation is written into remote payloads.
    pub save: EncodeMode,
    /// Collection ordering for multi-relations.
    pub comparator: Vec<(String, bool)>,
    /// Join configuration for hasManyThrough.
    pub through: Option<ThroughDef>,
    /// Polymorphic target resolution.
    pub discriminator: Option<DiscriminatorDef>,
    /// Query URL for hasRemote.
    pub query_url: Option<String>,
}

impl RelationDef {
    fn base(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> RelationDef {
        RelationDef {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key: Vec::new(),
            cascade_save: Cascade::ALL,
            cascade_remove: Cascade::ALL,
            auto_save: true,
            store: EncodeMode::None,
            save: EncodeMode::None,
            comparator: Vec::new(),
            through: None,
            discriminator: None,
            query_url: None,
        }
    }

    /// Declares a belongsTo relation; `foreign_key` lives on the
    /// owning type.
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> RelationDef {
        let mut def = Self::base(name, RelationKind::BelongsTo, target);
        def.foreign_key = vec![foreign_key.into()];
        def
    }

    /// Declares a hasOne relation; `foreign_key` lives on the owning
    /// type.
    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> RelationDef {
        let mut def = Self::base(name, RelationKind::HasOne, target);
        def.foreign_key = vec![foreign_key.into()];
        def
    }

    /// Declares an in-memory reference relation.
    pub fn has_reference(name: impl Into<String>, target: impl Into<String>) -> RelationDef {
        Self::base(name, RelationKind::HasReference, target)
    }

    /// Declares a hasMany relation; `foreign_key` lives on the
    /// related type.
    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> RelationDef {
        let mut def = Self::base(name, RelationKind::HasMany, target);
        def.foreign_key = vec![foreign_key.into()];
        def
    }

    /// Declares a hasManyThrough relation over join records.
    pub fn has_many_through(
        name: impl Into<String>,
        target: impl Into<String>,
        through: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> RelationDef {
        let mut def = Self::base(name, RelationKind::HasManyThrough, target);
        def.through = Some(ThroughDef {
            through: through.into(),
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
        });
        def
    }

    /// Declares a query-populated remote relation.
    pub fn has_remote(
        name: impl Into<String>,
        target: impl Into<String>,
        query_url: impl Into<String>,
    ) -> RelationDef {
        let mut def = Self::base(name, RelationKind::HasRemote, target);
        def.query_url = Some(query_url.into());
        def
    }

    /// Declares an embedded list relation.
    pub fn has_list(name: impl Into<String>, target: impl Into<String>) -> RelationDef {
        let mut def = Self::base(name, RelationKind::HasList, target);
        def.store = EncodeMode::Model;
        def.save = EncodeMode::Model;
        def
    }

    /// Sets composite foreign-key fields.
    pub fn with_foreign_keys<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the automatic-save cascade.
    pub fn with_cascade_save(mut self, cascade: Cascade) -> Self {
        self.cascade_save = cascade;
        self
    }

    /// Sets the automatic-remove cascade.
    pub fn with_cascade_remove(mut self, cascade: Cascade) -> Self {
        self.cascade_remove = cascade;
        self
    }

    /// Disables automatic saves on foreign-key writes.
    pub fn without_auto_save(mut self) -> Self {
        self.auto_save = false;
        self
    }

    /// Sets the local-envelope encode mode.
    pub fn with_store(mut self, mode: EncodeMode) -> Self {
        self.store = mode;
        self
    }

    /// Sets the remote-payload encode mode.
    pub fn with_save(mut self, mode: EncodeMode) -> Self {
        self.save = mode;
        self
    }

    /// Orders the related collection by a field, ascending.
    pub fn with_comparator(mut self, field: impl Into<String>) -> Self {
        self.comparator.push((field.into(), false));
        self
    }

    /// Makes the relation polymorphic over a discriminator field.
    pub fn with_discriminator(mut self, def: DiscriminatorDef) -> Self {
        self.discriminator = Some(def);
        self
    }
}

/// A reference to one or more models, in any of the accepted shapes.
#[derive(Debug, Clone)]
pub enum ModelRef {
    /// A key of the target type.
    Key(Key),
    /// Several keys of the target type.
    Keys(Vec<Key>),
    /// A partial or complete record.
    Record(Record),
    /// Several records.
    Records(Vec<Record>),
    /// A live instance.
    Instance(Model),
    /// Several live instances.
    Instances(Vec<Model>),
}

impl From<Key> for ModelRef {
    fn from(key: Key) -> ModelRef {
        ModelRef::Key(key)
    }
}

impl From<Model> for ModelRef {
    fn from(model: Model) -> ModelRef {
        ModelRef::Instance(model)
    }
}

impl From<Record> for ModelRef {
    fn from(record: Record) -> ModelRef {
        ModelRef::Record(record)
    }
}

impl From<Vec<Model>> for ModelRef {
    fn from(models: Vec<Model>) -> ModelRef {
        ModelRef::Instances(models)
    }
}

impl From<Vec<Key>> for ModelRef {
    fn from(keys: Vec<Key>) -> ModelRef {
        ModelRef::Keys(keys)
    }
}

impl From<Vec<Record>> for ModelRef {
    fn from(records: Vec<Record>) -> ModelRef {
        ModelRef::Records(records)
    }
}

impl ModelRef {
    /// Splits a plural reference into singular ones.
    pub fn into_singles(self) -> Vec<ModelRef> {
        match self {
            ModelRef::Keys(keys) => keys.into_iter().map(ModelRef::Key).collect(),
            ModelRef::Records(records) => records.into_iter().map(ModelRef::Record).collect(),
            ModelRef::Instances(models) => models.into_iter().map(ModelRef::Instance).collect(),
            single => vec![single],
        }
    }
}

/// The related value of a relation.
#[derive(Debug, Clone)]
pub enum Related {
    /// Nothing related.
    None,
    /// A single related model.
    One(Model),
    /// A related collection, in comparator order.
    Many(Vec<Model>),
}

impl Related {
    /// The single related model, if any.
    pub fn one(&self) -> Option<&Model> {
        match self {
            Related::One(model) => Some(model),
            _ => None,
        }
    }

    /// The related models (empty for `None`, singleton for `One`).
    pub fn many(&self) -> Vec<Model> {
        match self {
            Related::None => Vec::new(),
            Related::One(model) => vec![model.clone()],
            Related::Many(models) => models.clone(),
        }
    }
}

/// Per-model, per-relation bookkeeping.
#[derive(Default)]
pub(crate) struct RelationState {
    /// The single related model (single strategies).
    pub related: Option<Model>,
    /// The related collection (multi strategies).
    pub collection: Option<ModelCollection>,
    /// Whether initial resolution has run.
    pub loaded: bool,
    /// Whether membership changed since the last owner save.
    pub dirty: bool,
    /// Keys of in-flight foreign lookups.
    pub pending: HashSet<Key>,
    /// Join records by related-model key (hasManyThrough).
    pub throughs: HashMap<Key, Model>,
    /// Ninja listeners keyed by related-model uid; dropping detaches.
    pub subs: HashMap<String, Vec<Subscription>>,
    /// Supersession counter for remote queries.
    pub generation: u64,
}

/// The strategy contract every relation kind implements.
pub trait Relation: Send + Sync {
    /// The relation's declaration.
    fn def(&self) -> &RelationDef;

    /// Initializes the relation record for a model, resolving initial
    /// related models from the model's fields and foreign keys.
    fn init(&self, model: &Model, remote: bool);

    /// Replaces the relation's value.
    fn set(&self, model: &Model, value: ModelRef, remote: bool);

    /// Adds to the relation (single relations behave like `set`).
    fn relate(&self, model: &Model, value: ModelRef);

    /// Removes from the relation; `None` clears it entirely.
    fn unrelate(&self, model: &Model, value: Option<ModelRef>);

    /// Re-derives the relation from current foreign-key state.
    fn sync(&self, model: &Model, remove_unrelated: bool);

    /// Membership test.
    fn is_related(&self, model: &Model, candidate: &ModelRef) -> bool;

    /// The current related value.
    fn related(&self, model: &Model) -> Related;

    /// Writes the relation into an encoded record per the configured
    /// encode mode.
    fn encode(&self, model: &Model, out: &mut Record, for_remote: bool);

    /// Releases ninja subscriptions when the owner is destroyed.
    fn teardown(&self, model: &Model);

    /// Reaction to a related model's removal (ninja-remove).
    fn on_related_removed(&self, model: &Model, related: &Model);

    /// Reaction to a related model's remote-sourced save
    /// (ninja-save).
    fn on_related_saved(&self, model: &Model, related: &Model);
}

/// Builds the strategy for a declaration, resolving target databases
/// from the registry.
pub(crate) fn build(
    def: RelationDef,
    owner: &Database,
    registry: &Arc<RegistryInner>,
) -> SyncResult<Arc<dyn Relation>> {
    let resolver = poly::TargetResolver::build(&def, registry)?;
    match def.kind {
        RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::HasReference => Ok(
            Arc::new(single::SingleRelation::new(def, owner.downgrade(), resolver)),
        ),
        RelationKind::HasMany => Ok(Arc::new(multiple::HasManyRelation::new(
            def,
            owner.downgrade(),
            resolver,
        ))),
        RelationKind::HasManyThrough => {
            let through_def = def
                .through
                .clone()
                .ok_or_else(|| SyncError::UnresolvedRelation {
                    relation: def.name.clone(),
                    target: "<missing through>".to_string(),
                })?;
            let through_db = registry
                .database_inner(&through_def.through)
                .ok_or_else(|| SyncError::UnresolvedRelation {
                    relation: def.name.clone(),
                    target: through_def.through.clone(),
                })?;
            Ok(Arc::new(through::HasManyThroughRelation::new(
                def,
                owner.downgrade(),
                resolver,
                Arc::downgrade(&through_db),
                through_def,
            )))
        }
        RelationKind::HasRemote | RelationKind::HasList => Ok(Arc::new(
            fetched::FetchedRelation::new(def, owner.downgrade(), resolver),
        )),
    }
}

/// Resolves a singular reference to a live model of the target type.
///
/// Unknown keys produce a registered stub so a foreign lookup can
/// complete later; records are materialized through the identity map.
pub(crate) fn resolve_one(db: &Database, reference: ModelRef, remote: bool) -> Option<Model> {
    match reference {
        ModelRef::Key(key) => Some(db.stub(key)),
        ModelRef::Record(record) => db.materialize(record, remote).ok(),
        ModelRef::Instance(model) => Some(model),
        ModelRef::Keys(_) | ModelRef::Records(_) | ModelRef::Instances(_) => None,
    }
}

/// Extracts the key a candidate reference identifies, if it can be
/// determined without materializing anything.
pub(crate) fn candidate_key(db: &Database, candidate: &ModelRef) -> Option<Key> {
    match candidate {
        ModelRef::Key(key) => Some(key.clone()),
        ModelRef::Record(record) => db.key_handler().key_of(record),
        ModelRef::Instance(model) => model.key(),
        _ => None,
    }
}

/// Reads a foreign key from `fields` using the given FK field names.
pub(crate) fn foreign_key_of(fields: &Record, foreign_key: &[String]) -> Option<Key> {
    let mut parts = Vec::with_capacity(foreign_key.len());
    for field in foreign_key {
        parts.push(crate::key::KeyPart::from_value(fields.get(field)?)?);
    }
    Some(Key::new(parts))
}

/// Writes `key` (or nulls when `None`) onto the FK fields of a model.
/// Returns true if any field changed.
pub(crate) fn write_foreign_key(model: &Model, foreign_key: &[String], key: Option<&Key>) -> bool {
    let mut state = model.inner.state.write();
    let mut changed = false;
    match key {
        Some(key) => {
            for (field, part) in foreign_key.iter().zip(key.parts()) {
                let value = part.to_value();
                if state.fields.get(field) != Some(&value) {
                    state.fields.insert(field.clone(), value);
                    changed = true;
                }
            }
        }
        None => {
            for field in foreign_key {
                if state.fields.get(field).map(|v| !v.is_null()).unwrap_or(false) {
                    state.fields.insert(field.clone(), serde_json::Value::Null);
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Runs `f` against the owner's bookkeeping record for this relation,
/// creating it on first touch.
pub(crate) fn with_relation_state<R>(
    def: &RelationDef,
    owner: &Model,
    f: impl FnOnce(&mut RelationState) -> R,
) -> R {
    let mut state = owner.inner.state.write();
    let rel = state.relations.entry(def.name.clone()).or_default();
    f(rel)
}

/// The owner's related collection for this relation, created with the
/// declared comparator on first touch. The clone shares contents.
pub(crate) fn collection_of(def: &RelationDef, owner: &Model) -> ModelCollection {
    let comparator = def.comparator.clone();
    with_relation_state(def, owner, |rel| {
        rel.collection
            .get_or_insert_with(|| {
                ModelCollection::new(crate::collection::Comparator::by_fields(comparator))
            })
            .clone()
    })
}

/// A key rendered as a single record value: scalar for simple keys,
/// serialized text for composite ones.
pub(crate) fn key_as_value(key: &Key, separator: &str) -> serde_json::Value {
    match key.parts() {
        [part] => part.to_value(),
        _ => serde_json::Value::from(key.serialize(separator)),
    }
}

/// Attaches ninja listeners on a related model, dispatching back to
/// the owning relation strategy by name.
pub(crate) fn watch_related(
    owner: &Model,
    related: &Model,
    relation_name: &str,
) -> Subscription {
    use crate::model::ModelEvent;

    let owner_weak = Arc::downgrade(&owner.inner);
    let related_weak = Arc::downgrade(&related.inner);
    let db_weak = owner.inner.db.clone();
    let name = relation_name.to_string();

    related.events().subscribe(move |event| {
        let (Some(owner_inner), Some(related_inner), Some(db_inner)) = (
            owner_weak.upgrade(),
            related_weak.upgrade(),
            db_weak.upgrade(),
        ) else {
            return;
        };
        let db = Database::from_inner(db_inner);
        let Some(strategy) = db.relation(&name) else {
            return;
        };
        let owner = Model { inner: owner_inner };
        let related = Model {
            inner: related_inner,
        };
        match event {
            ModelEvent::Removed { .. } => strategy.on_related_removed(&owner, &related),
            ModelEvent::Saved { remote: true } => strategy.on_related_saved(&owner, &related),
            _ => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_ref_flattening() {
        let plural = ModelRef::Keys(vec![Key::from(1), Key::from(2)]);
        let singles = plural.into_singles();
        assert_eq!(singles.len(), 2);
        assert!(matches!(singles[0], ModelRef::Key(_)));
    }

    #[test]
    fn foreign_key_extraction() {
        let fields = match json!({"task_list_id": "l0", "other": 3}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(
            foreign_key_of(&fields, &["task_list_id".to_string()]),
            Some(Key::from("l0"))
        );
        assert_eq!(foreign_key_of(&fields, &["missing".to_string()]), None);
    }

    #[test]
    fn relation_def_builders() {
        let def = RelationDef::has_many("tasks", "task", "task_list_id")
            .with_comparator("created_at")
            .with_cascade_save(Cascade::NO_LIVE)
            .with_save(EncodeMode::Key);
        assert_eq!(def.kind, RelationKind::HasMany);
        assert_eq!(def.foreign_key, vec!["task_list_id".to_string()]);
        assert_eq!(def.save, EncodeMode::Key);
        assert!(def.auto_save);
    }
}
