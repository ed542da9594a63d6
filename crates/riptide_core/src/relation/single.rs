//! Single-valued relation strategies: belongsTo, hasOne, hasReference.
//!
//! All three keep at most one related model per owner. belongsTo and
//! hasOne carry the foreign key on the owner; they differ in how they
//! react when the related model disappears. hasReference lives purely
//! in memory and is never persisted.

use super::poly::TargetResolver;
use super::{
    candidate_key, foreign_key_of, resolve_one, watch_related, with_relation_state,
    write_foreign_key, ModelRef, Related, Relation, RelationDef, RelationKind,
};
use crate::database::DatabaseInner;
use crate::model::Model;
use crate::record::Record;
use serde_json::Value;
use std::sync::Weak;

pub(crate) struct SingleRelation {
    def: RelationDef,
    #[allow(dead_code)]
    owner_db: Weak<DatabaseInner>,
    target: TargetResolver,
}

impl SingleRelation {
    pub(crate) fn new(
        def: RelationDef,
        owner_db: Weak<DatabaseInner>,
        target: TargetResolver,
    ) -> SingleRelation {
        SingleRelation {
            def,
            owner_db,
            target,
        }
    }

    fn is_reference(&self) -> bool {
        self.def.kind == RelationKind::HasReference
    }

    fn current(&self, owner: &Model) -> Option<Model> {
        with_relation_state(&self.def, owner, |rel| rel.related.clone())
    }

    fn resolve(&self, owner: &Model, reference: ModelRef, remote: bool) -> Option<Model> {
        match reference {
            ModelRef::Instance(model) => self.target.admits(&model).then_some(model),
            single @ (ModelRef::Key(_) | ModelRef::Record(_)) => {
                let db = self.target.for_fields(&owner.fields())?;
                resolve_one(&db, single, remote)
            }
            _ => None,
        }
    }

    /// Replaces the related model, keeping foreign key, dependency
    /// registration, and ninja subscriptions consistent. `remote`
    /// suppresses the automatic owner save.
    fn apply(&self, owner: &Model, new: Option<Model>, remote: bool) {
        let current = self.current(owner);

        if let (Some(current), Some(new)) = (&current, &new) {
            if Model::same(current, new) {
                if !self.is_reference() {
                    write_foreign_key(owner, &self.def.foreign_key, new.key().as_ref());
                }
                with_relation_state(&self.def, owner, |rel| rel.loaded = true);
                return;
            }
        }
        if current.is_none() && new.is_none() {
            with_relation_state(&self.def, owner, |rel| rel.loaded = true);
            return;
        }

        if let Some(old) = &current {
            let uid = old.uid();
            with_relation_state(&self.def, owner, |rel| {
                rel.subs.remove(&uid);
            });
            owner.remove_dependent(old);
        }

        let mut changed = false;
        match &new {
            Some(new_model) => {
                let subscription = watch_related(owner, new_model, &self.def.name);
                let uid = new_model.uid();
                let pending = (!new_model.is_saved_remotely()).then(|| new_model.key()).flatten();
                with_relation_state(&self.def, owner, |rel| {
                    rel.related = Some(new_model.clone());
                    rel.subs.insert(uid, vec![subscription]);
                    if let Some(key) = pending {
                        rel.pending.insert(key);
                    }
                    rel.loaded = true;
                });
                if !self.is_reference() {
                    changed =
                        write_foreign_key(owner, &self.def.foreign_key, new_model.key().as_ref());
                    if let Some((field, value)) = self.target.discriminator_for(new_model) {
                        if owner.get(&field) != Some(value.clone()) {
                            owner.inner.state.write().fields.insert(field, value);
                            changed = true;
                        }
                    }
                    // The related resource must exist remotely before
                    // a record referencing it can be pushed.
                    owner.add_dependent(new_model);
                }
            }
            None => {
                with_relation_state(&self.def, owner, |rel| {
                    rel.related = None;
                    rel.loaded = true;
                });
                if !self.is_reference() {
                    changed = write_foreign_key(owner, &self.def.foreign_key, None);
                }
            }
        }

        if changed && !remote && self.def.auto_save && owner.is_saved_remotely() {
            let _ = owner.save_cascade(self.def.cascade_save);
        }
    }
}

impl Relation for SingleRelation {
    fn def(&self) -> &RelationDef {
        &self.def
    }

    fn init(&self, owner: &Model, remote: bool) {
        if with_relation_state(&self.def, owner, |rel| rel.loaded) {
            return;
        }
        // An embedded record under the relation name seeds the target
        // type before foreign-key resolution runs.
        let embedded = owner.inner.state.write().fields.remove(&self.def.name);
        if let Some(Value::Object(record)) = embedded {
            if let Some(related) = self.resolve(owner, ModelRef::Record(record), remote) {
                self.apply(owner, Some(related), true);
                return;
            }
        }
        self.sync(owner, false);
        with_relation_state(&self.def, owner, |rel| rel.loaded = true);
    }

    fn set(&self, owner: &Model, value: ModelRef, remote: bool) {
        let resolved = self.resolve(owner, value, remote);
        self.apply(owner, resolved, remote);
    }

    fn relate(&self, owner: &Model, value: ModelRef) {
        self.set(owner, value, false);
    }

    fn unrelate(&self, owner: &Model, _value: Option<ModelRef>) {
        self.apply(owner, None, false);
    }

    fn sync(&self, owner: &Model, remove_unrelated: bool) {
        if self.is_reference() {
            return;
        }
        let fields = owner.fields();
        match foreign_key_of(&fields, &self.def.foreign_key) {
            Some(key) => {
                if let Some(db) = self.target.for_fields(&fields) {
                    if let Some(related) = resolve_one(&db, ModelRef::Key(key), true) {
                        self.apply(owner, Some(related), true);
                    }
                }
            }
            None => {
                if remove_unrelated {
                    self.apply(owner, None, true);
                }
            }
        }
    }

    fn is_related(&self, owner: &Model, candidate: &ModelRef) -> bool {
        let Some(current) = self.current(owner) else {
            return false;
        };
        match candidate {
            ModelRef::Instance(model) => Model::same(model, &current),
            other => {
                let Some(db) = self.target.for_fields(&owner.fields()) else {
                    return false;
                };
                match (candidate_key(&db, other), current.key()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
        }
    }

    fn related(&self, owner: &Model) -> Related {
        match self.current(owner) {
            Some(model) => Related::One(model),
            None => Related::None,
        }
    }

    fn encode(&self, owner: &Model, out: &mut Record, for_remote: bool) {
        if self.is_reference() {
            return;
        }
        let mode = if for_remote {
            self.def.save
        } else {
            self.def.store
        };
        if mode == super::EncodeMode::Model {
            if let Some(related) = self.current(owner) {
                out.insert(self.def.name.clone(), Value::Object(related.fields()));
            }
        }
        // Key mode needs nothing extra: the foreign key already lives
        // on the owner's fields.
    }

    fn teardown(&self, owner: &Model) {
        let related = with_relation_state(&self.def, owner, |rel| {
            rel.subs.clear();
            rel.pending.clear();
            rel.related.take()
        });
        if let Some(related) = related {
            owner.remove_dependent(&related);
            if self.def.kind == RelationKind::HasOne
                && !self.def.cascade_remove.is_none()
                && !related.status().is_removing()
            {
                let _ = related.remove_cascade(self.def.cascade_remove);
            }
        }
    }

    fn on_related_removed(&self, owner: &Model, _related: &Model) {
        match self.def.kind {
            RelationKind::BelongsTo => {
                // The parent is gone, so the owner goes with it.
                self.apply(owner, None, true);
                if !owner.status().is_removing() && !self.def.cascade_remove.is_none() {
                    let _ = owner.remove_cascade(self.def.cascade_remove);
                }
            }
            RelationKind::HasOne => {
                // Clears the dangling key and auto-saves the owner.
                self.apply(owner, None, false);
            }
            _ => {
                self.apply(owner, None, true);
            }
        }
    }

    fn on_related_saved(&self, owner: &Model, related: &Model) {
        if self.is_reference() {
            return;
        }
        if let Some(key) = related.key() {
            with_relation_state(&self.def, owner, |rel| {
                rel.pending.remove(&key);
            });
        }
        let still_ours = self
            .current(owner)
            .map(|current| Model::same(&current, related))
            .unwrap_or(false);
        if still_ours {
            // The save may have assigned the related model its key;
            // refresh the foreign key and persist the move.
            let changed = write_foreign_key(owner, &self.def.foreign_key, related.key().as_ref());
            if changed && self.def.auto_save && owner.is_saved_remotely() {
                let _ = owner.save_cascade(self.def.cascade_save);
            }
        }
    }
}
