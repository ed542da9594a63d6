//! Fetched relation strategies: hasRemote and hasList.
//!
//! Neither writes foreign keys or schedules saves of its members.
//! hasRemote populates its collection from a remote query; a
//! generation counter discards results a newer query supersedes.
//! hasList keeps an embedded collection that travels inside the
//! owner's own record.

use super::poly::TargetResolver;
use super::{
    candidate_key, collection_of, resolve_one, watch_related, with_relation_state, EncodeMode,
    ModelRef, Related, Relation, RelationDef, RelationKind,
};
use crate::config::RequestOptions;
use crate::database::{Database, DatabaseInner};
use crate::key::Key;
use crate::model::Model;
use crate::record::Record;
use serde_json::Value;
use std::sync::Weak;
use tracing::debug;

pub(crate) struct FetchedRelation {
    def: RelationDef,
    owner_db: Weak<DatabaseInner>,
    target: TargetResolver,
}

impl FetchedRelation {
    pub(crate) fn new(
        def: RelationDef,
        owner_db: Weak<DatabaseInner>,
        target: TargetResolver,
    ) -> FetchedRelation {
        FetchedRelation {
            def,
            owner_db,
            target,
        }
    }

    fn target_db(&self) -> Option<Database> {
        self.target.fixed()
    }

    fn attach_one(&self, owner: &Model, reference: ModelRef) {
        let Some(target) = self.target_db() else {
            return;
        };
        let Some(related) = resolve_one(&target, reference, true) else {
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
        let subscription = watch_related(owner, &related, &self.def.name);
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.insert(related.uid(), vec![subscription]);
        });
        collection.insert(key, related);
    }

    fn detach_one(&self, owner: &Model, key: &Key) {
        let collection = collection_of(&self.def, owner);
        if let Some(removed) = collection.remove(key) {
            with_relation_state(&self.def, owner, |rel| {
                rel.subs.remove(&removed.uid());
            });
        }
    }

    /// Runs the remote query and replaces membership with its result,
    /// unless a newer query started meanwhile.
    fn query(&self, owner: &Model) {
        let Some(url) = self.def.query_url.as_deref() else {
            return;
        };
        let Some(remote) = self
            .owner_db
            .upgrade()
            .map(Database::from_inner)
            .and_then(|db| db.remote())
        else {
            return;
        };

        let generation =
            with_relation_state(&self.def, owner, |rel| {
                rel.generation += 1;
                rel.generation
            });

        let mut body = Record::new();
        if let (Some(db), Some(key)) = (self.owner_db.upgrade(), owner.key()) {
            db.key_handler.write_key(&key, &mut body);
        }

        let records = match remote.query(url, &body, &RequestOptions::new()) {
            Ok(records) => records,
            Err(err) => {
                debug!(relation = %self.def.name, error = ?err, "remote query failed");
                return;
            }
        };

        let superseded =
            with_relation_state(&self.def, owner, |rel| rel.generation != generation);
        if superseded {
            return;
        }

        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            for key in collection.keys() {
                self.detach_one(owner, &key);
            }
            for record in records {
                self.attach_one(owner, ModelRef::Record(record));
            }
        });
    }
}

impl Relation for FetchedRelation {
    fn def(&self) -> &RelationDef {
        &self.def
    }

    fn init(&self, owner: &Model, _remote: bool) {
        if with_relation_state(&self.def, owner, |rel| rel.loaded) {
            return;
        }
        match self.def.kind {
            RelationKind::HasList => {
                let embedded = owner.inner.state.write().fields.remove(&self.def.name);
                if let Some(Value::Array(items)) = embedded {
                    let collection = collection_of(&self.def, owner);
                    collection.delay_sorting(|| {
                        for item in items {
                            if let Value::Object(record) = item {
                                self.attach_one(owner, ModelRef::Record(record));
                            }
                        }
                    });
                }
            }
            _ => {
                if owner.key().is_some() {
                    self.query(owner);
                }
            }
        }
        with_relation_state(&self.def, owner, |rel| rel.loaded = true);
    }

    fn set(&self, owner: &Model, value: ModelRef, _remote: bool) {
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
                    self.detach_one(owner, &key);
                }
            }
            for single in singles {
                self.attach_one(owner, single);
            }
        });
    }

    fn relate(&self, owner: &Model, value: ModelRef) {
        let collection = collection_of(&self.def, owner);
        collection.delay_sorting(|| {
            for single in value.into_singles() {
                self.attach_one(owner, single);
            }
        });
    }

    fn unrelate(&self, owner: &Model, value: Option<ModelRef>) {
        let keys: Vec<Key> = match value {
            None => collection_of(&self.def, owner).keys(),
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
        for key in keys {
            self.detach_one(owner, &key);
        }
    }

    fn sync(&self, owner: &Model, _remove_unrelated: bool) {
        if self.def.kind == RelationKind::HasRemote && owner.key().is_some() {
            self.query(owner);
        }
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
        if self.def.kind != RelationKind::HasList {
            return;
        }
        let mode = if for_remote {
            self.def.save
        } else {
            self.def.store
        };
        if mode != EncodeMode::Model {
            return;
        }
        let members: Vec<Value> = collection_of(&self.def, owner)
            .to_vec()
            .iter()
            .map(|member| Value::Object(member.fields()))
            .collect();
        out.insert(self.def.name.clone(), Value::Array(members));
    }

    fn teardown(&self, owner: &Model) {
        with_relation_state(&self.def, owner, |rel| {
            rel.subs.clear();
        });
        collection_of(&self.def, owner).clear();
    }

    fn on_related_removed(&self, owner: &Model, related: &Model) {
        if let Some(key) = related.key() {
            self.detach_one(owner, &key);
        }
    }

    fn on_related_saved(&self, owner: &Model, _related: &Model) {
        collection_of(&self.def, owner).sort();
    }
}
