//! The hasManyThrough relation strategy.
//!
//! Membership lives in join records of a third type: relating creates
//! the join and inserts the member in the same synchronous step, and
//! unrelating removes both, so the pair can never drift apart.

use super::poly::TargetResolver;
use super::{
    candidate_key, collection_of, key_as_value, resolve_one, watch_related, with_relation_state,
    EncodeMode, ModelRef, Related, Relation, RelationDef, ThroughDef,
};
use crate::database::{Database, DatabaseInner};
use crate::key::{Key, KeyPart};
use crate::model::Model;
use crate::record::Record;
use serde_json::Value;
use std::sync::Weak;

pub(crate) struct HasManyThroughRelation {
    def: RelationDef,
    owner_db: Weak<DatabaseInner>,
    target: TargetResolver,
    through_db: Weak<DatabaseInner>,
    through: ThroughDef,
}

impl HasManyThroughRelation {
    pub(crate) fn new(
        def: RelationDef,
        owner_db: Weak<DatabaseInner>,
        target: TargetResolver,
        through_db: Weak<DatabaseInner>,
        through: ThroughDef,
    ) -> HasManyThroughRelation {
        HasManyThroughRelation {
            def,
            owner_db,
            target,
            through_db,
            through,
        }
    }

    fn target_db(&self) -> Option<Database> {
        self.target.fixed()
    }

    fn through_database(&self) -> Option<Database> {
        self.through_db.upgrade().map(Database::from_inner)
    }

    fn owner_key_value(&self, owner: &Model) -> Option<Value> {
        let key = owner.key()?;
        let separator = self
            .owner_db
            .upgrade()
            .map(|db| db.key_handler.separator().to_string())
            .unwrap_or_else(|| "/".to_string());
        Some(key_as_value(&key, &separator))
    }

    /// Adds a member and, unless the membership was derived from an
    /// existing join, creates and saves the join record with it.
    fn attach_one(
        &self,
        owner: &Model,
        reference: ModelRef,
        existing_join: Option<Model>,
    ) {
        let (Some(target), Some(through)) = (self.target_db(), self.through_database()) else {
            return;
        };
        let remote = existing_join.is_some();
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
            return;
        }

        let join = match existing_join {
            Some(join) => join,
            None => {
                let Some(owner_value) = self.owner_key_value(owner) else {
                    return;
                };
                let related_separator = target.key_handler().separator().to_string();
                let mut fields = Record::new();
                fields.insert(self.through.local_key.clone(), owner_value);
                fields.insert(
                    self.through.foreign_key.clone(),
                    key_as_value(&key, &related_separator),
                );
                let Ok(join) = through.instantiate(fields) else {
                    return;
                };
                let _ = join.save_cascade(self.def.cascade_save);
                join
            }
        };

        let related_sub = watch_related(owner, &related, &self.def.name);
        let join_sub = watch_related(owner, &join, &self.def.name);
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.insert(related.uid(), vec![related_sub]);
            rel.subs.insert(join.uid(), vec![join_sub]);
            rel.throughs.insert(key.clone(), join);
        });
        collection.insert(key, related);
    }

    /// Drops a member; `remove_join` also removes its join record.
    fn detach_one(&self, owner: &Model, key: &Key, remove_join: bool) {
        let collection = collection_of(&self.def, owner);
        let Some(removed) = collection.remove(key) else {
            return;
        };
        let join = with_relation_state(&self.def, owner, |rel| {
            rel.subs.remove(&removed.uid());
            let join = rel.throughs.remove(key);
            if let Some(join) = &join {
                rel.subs.remove(&join.uid());
            }
            join
        });
        if remove_join {
            if let Some(join) = join {
                if !join.status().is_removing() {
                    let _ = join.remove_cascade(self.def.cascade_remove);
                }
            }
        }
    }

    fn is_join(&self, model: &Model) -> bool {
        Weak::ptr_eq(&self.through_db, &model.inner.db)
    }

    /// The member a join record belongs to, by uid.
    fn member_of_join(&self, owner: &Model, join: &Model) -> Option<Key> {
        with_relation_state(&self.def, owner, |rel| {
            rel.throughs
                .iter()
                .find(|(_, candidate)| Model::same(candidate, join))
                .map(|(key, _)| key.clone())
        })
    }
}

impl Relation for HasManyThroughRelation {
    fn def(&self) -> &RelationDef {
        &self.def
    }

    fn init(&self, owner: &Model, _remote: bool) {
        if with_relation_state(&self.def, owner, |rel| rel.loaded) {
            return;
        }
        self.sync(owner, false);
        with_relation_state(&self.def, owner, |rel| rel.loaded = true);
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
                self.attach_one(owner, single, None);
            }
        });
    }

    fn relate(&self, owner: &Model, value: ModelRef) {
        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            for single in value.into_singles() {
                self.attach_one(owner, single, None);
            }
        });
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
    }

    /// Rebuilds membership from the join records currently in memory.
    fn sync(&self, owner: &Model, remove_unrelated: bool) {
        let Some(through) = self.through_database() else {
            return;
        };
        let Some(owner_value) = self.owner_key_value(owner) else {
            return;
        };

        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            let mut seen: Vec<Key> = Vec::new();
            for join in through.models().to_vec() {
                if join.get(&self.through.local_key) != Some(owner_value.clone()) {
                    continue;
                }
                let Some(foreign) = join.get(&self.through.foreign_key) else {
                    continue;
                };
                let Some(part) = KeyPart::from_value(&foreign) else {
                    continue;
                };
                let key = Key::single(part);
                seen.push(key.clone());
                self.attach_one(owner, ModelRef::Key(key), Some(join));
            }
            if remove_unrelated {
                for member_key in collection.keys() {
                    if !seen.contains(&member_key) {
                        self.detach_one(owner, &member_key, false);
                    }
                }
            }
        });
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
        if mode != EncodeMode::Key {
            return;
        }
        let Some(target) = self.target_db() else {
            return;
        };
        let separator = target.key_handler().separator().to_string();
        let keys: Vec<Value> = collection_of(&self.def, owner)
            .to_vec()
            .iter()
            .filter_map(|member| member.key())
            .map(|key| key_as_value(&key, &separator))
            .collect();
        out.insert(self.def.name.clone(), Value::Array(keys));
    }

    fn teardown(&self, owner: &Model) {
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.clear();
            rel.throughs.clear();
        });
        collection_of(&self.def, owner).clear();
    }

    fn on_related_removed(&self, owner: &Model, related: &Model) {
        if self.is_join(related) {
            // The join vanished (possibly via a live event), so the
            // membership goes with it.
            if let Some(key) = self.member_of_join(owner, related) {
                self.detach_one(owner, &key, false);
            }
        } else if let Some(key) = related.key() {
            // The member vanished; its join is now meaningless.
            self.detach_one(owner, &key, true);
        }
    }

    fn on_related_saved(&self, _owner: &Model, _related: &Model) {
        // Join records carry static keys; nothing to re-derive.
    }
}
