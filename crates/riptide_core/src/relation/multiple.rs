//! The hasMany relation strategy.
//!
//! Membership is driven by foreign keys on the related models: a task
//! belongs to the list whose key its `task_list_id` carries. Relating
//! a model writes that key and auto-saves the related model; bulk
//! operations batch the sort and collapse owner saves to one.

use super::poly::TargetResolver;
use super::{
    candidate_key, collection_of, foreign_key_of, key_as_value, resolve_one, watch_related,
    with_relation_state, write_foreign_key, EncodeMode, ModelRef, Related, Relation, RelationDef,
};
use crate::database::{Database, DatabaseInner};
use crate::key::Key;
use crate::model::Model;
use crate::record::Record;
use serde_json::Value;
use std::sync::Weak;

pub(crate) struct HasManyRelation {
    def: RelationDef,
    #[allow(dead_code)]
    owner_db: Weak<DatabaseInner>,
    target: TargetResolver,
}

impl HasManyRelation {
    pub(crate) fn new(
        def: RelationDef,
        owner_db: Weak<DatabaseInner>,
        target: TargetResolver,
    ) -> HasManyRelation {
        HasManyRelation {
            def,
            owner_db,
            target,
        }
    }

    fn target_db(&self) -> Option<Database> {
        self.target.fixed()
    }

    fn persisted(&self) -> bool {
        self.def.store != EncodeMode::None || self.def.save != EncodeMode::None
    }

    /// Adds one related model. `remote` marks the membership change as
    /// FK-derived: no foreign-key writes and no automatic saves.
    fn attach_one(&self, owner: &Model, reference: ModelRef, remote: bool) {
        let Some(target) = self.target_db() else {
            return;
        };
        let Some(related) = resolve_one(&target, reference, remote) else {
            return;
        };
        let key = match related.key() {
            Some(key) => key,
            None => match target.ensure_registered(&related) {
                Ok(key) => key,
                Err(_) => return,
            },
        };

        let collection = collection_of(&self.def, owner);
        if collection.contains(&key) {
            // Relating twice is a no-op: no duplicate membership, no
            // duplicate foreign-key write, no duplicate save.
            return;
        }

        let subscription = watch_related(owner, &related, &self.def.name);
        let pending = !related.is_saved_remotely();
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.insert(related.uid(), vec![subscription]);
            if pending {
                rel.pending.insert(key.clone());
            }
            rel.dirty = true;
        });
        collection.insert(key, related.clone());

        if !remote {
            let owner_key = owner.key();
            let changed =
                write_foreign_key(&related, &self.def.foreign_key, owner_key.as_ref());
            // The member's key points at the owner, so the owner must
            // exist remotely before the member's push goes out.
            related.add_dependent(owner);
            if self.def.auto_save && (changed || !related.is_saved_remotely()) {
                let _ = related.save_cascade(self.def.cascade_save);
            }
        }
    }

    /// Drops one member. `clear_fk` also nulls the member's foreign
    /// key and auto-saves it.
    fn detach_one(&self, owner: &Model, key: &Key, clear_fk: bool) {
        let collection = collection_of(&self.def, owner);
        let Some(removed) = collection.remove(key) else {
            return;
        };
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.remove(&removed.uid());
            rel.pending.remove(key);
            rel.dirty = true;
        });
        removed.remove_dependent(owner);
        if clear_fk && !removed.status().is_removing() {
            let changed = write_foreign_key(&removed, &self.def.foreign_key, None);
            if changed && self.def.auto_save && removed.is_saved_remotely() {
                let _ = removed.save_cascade(self.def.cascade_save);
            }
        }
    }

    /// One owner save per batch when the relation is persisted on the
    /// owner, no matter how many members changed.
    fn flush_owner(&self, owner: &Model) {
        let dirty = with_relation_state(&self.def, owner, |rel| std::mem::take(&mut rel.dirty));
        if dirty && self.persisted() && self.def.auto_save && owner.is_saved_remotely() {
            let _ = owner.save_cascade(self.def.cascade_save);
        }
    }
}

impl Relation for HasManyRelation {
    fn def(&self) -> &RelationDef {
        &self.def
    }

    fn init(&self, owner: &Model, remote: bool) {
        if with_relation_state(&self.def, owner, |rel| rel.loaded) {
            return;
        }
        // Embedded records under the relation name seed the target
        // type before the foreign-key scan runs.
        let embedded = owner.inner.state.write().fields.remove(&self.def.name);
        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            if let Some(Value::Array(items)) = embedded {
                for item in items {
                    if let Value::Object(record) = item {
                        self.attach_one(owner, ModelRef::Record(record), remote);
                    }
                }
            }
            self.sync(owner, false);
        });
        with_relation_state(&self.def, owner, |rel| {
            rel.loaded = true;
            rel.dirty = false;
        });
    }

    fn set(&self, owner: &Model, value: ModelRef, remote: bool) {
        let Some(target) = self.target_db() else {
            return;
        };
        let singles = value.into_singles();
        let desired: Vec<Key> = singles
            .iter()
            .filter_map(|single| candidate_key(&target, single))
            .collect();

        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            for key in collection.keys() {
                if !desired.contains(&key) {
                    self.detach_one(owner, &key, !remote);
                }
            }
            for single in singles {
                self.attach_one(owner, single, remote);
            }
        });
        if !remote {
            self.flush_owner(owner);
        }
    }

    fn relate(&self, owner: &Model, value: ModelRef) {
        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            for single in value.into_singles() {
                self.attach_one(owner, single, false);
            }
        });
        self.flush_owner(owner);
    }

    fn unrelate(&self, owner: &Model, value: Option<ModelRef>) {
        let collection = collection_of(&self.def, owner);
        let keys: Vec<Key> = match value {
            None => collection.keys(),
            Some(value) => {
                let Some(target) = self.target_db() else {
                    return;
                };
                value
                    .into_singles()
                    .iter()
                    .filter_map(|single| candidate_key(&target, single))
                    .collect()
            }
        };
        collection.delay_sorting(|| {
            for key in keys {
                self.detach_one(owner, &key, true);
            }
        });
        self.flush_owner(owner);
    }

    fn sync(&self, owner: &Model, remove_unrelated: bool) {
        let Some(target) = self.target_db() else {
            return;
        };
        let Some(owner_key) = owner.key() else {
            return;
        };

        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            for model in target.models().to_vec() {
                let fk = foreign_key_of(&model.fields(), &self.def.foreign_key);
                if fk.as_ref() == Some(&owner_key) {
                    self.attach_one(owner, ModelRef::Instance(model), true);
                }
            }
            if remove_unrelated {
                for member_key in collection.keys() {
                    let still = collection
                        .get(&member_key)
                        .map(|member| {
                            foreign_key_of(&member.fields(), &self.def.foreign_key).as_ref()
                                == Some(&owner_key)
                        })
                        .unwrap_or(false);
                    if !still {
                        self.detach_one(owner, &member_key, false);
                    }
                }
            }
        });
        with_relation_state(&self.def, owner, |rel| rel.dirty = false);
    }

    fn is_related(&self, owner: &Model, candidate: &ModelRef) -> bool {
        let Some(target) = self.target_db() else {
            return false;
        };
        match candidate_key(&target, candidate) {
            Some(key) => collection_of(&self.def, owner).contains(&key),
            None => false,
        }
    }

    fn related(&self, owner: &Model) -> Related {
        Related::Many(collection_of(&self.def, owner).to_vec())
    }

    fn encode(&self, owner: &Model, out: &mut Record, for_remote: bool) {
        let mode = if for_remote {
            self.def.save
        } else {
            self.def.store
        };
        if mode == EncodeMode::None {
            return;
        }
        let members = collection_of(&self.def, owner).to_vec();
        let encoded: Vec<Value> = match mode {
            EncodeMode::Key => {
                let Some(target) = self.target_db() else {
                    return;
                };
                let separator = target.key_handler().separator().to_string();
                members
                    .iter()
                    .filter_map(|member| member.key())
                    .map(|key| key_as_value(&key, &separator))
                    .collect()
            }
            EncodeMode::Model => members
                .iter()
                .map(|member| Value::Object(member.fields()))
                .collect(),
            EncodeMode::None => unreachable!(),
        };
        out.insert(self.def.name.clone(), Value::Array(encoded));
    }

    fn teardown(&self, owner: &Model) {
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.clear();
            rel.pending.clear();
        });
        collection_of(&self.def, owner).clear();
    }

    fn on_related_removed(&self, owner: &Model, related: &Model) {
        if let Some(key) = related.key() {
            self.detach_one(owner, &key, false);
        }
    }

    fn on_related_saved(&self, owner: &Model, related: &Model) {
        // A remote echo can move a member's foreign key: stale
        // members leave, matching strangers join.
        let Some(owner_key) = owner.key() else {
            return;
        };
        let Some(related_key) = related.key() else {
            return;
        };
        let matches = foreign_key_of(&related.fields(), &self.def.foreign_key).as_ref()
            == Some(&owner_key);
        let member = collection_of(&self.def, owner).contains(&related_key);
        if member && !matches {
            self.detach_one(owner, &related_key, false);
        } else if !member && matches {
            self.attach_one(owner, ModelRef::Instance(related.clone()), true);
        } else if member {
            with_relation_state(&self.def, owner, |rel| {
                rel.pending.remove(&related_key);
            });
            collection_of(&self.def, owner).sort();
        }
    }
}
