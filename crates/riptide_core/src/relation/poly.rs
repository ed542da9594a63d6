//! Per-instance target resolution for polymorphic relations.
//!
//! A discriminated relation reads a field off the owning record to
//! decide which registered type the relation points at, instead of
//! binding one target at declaration time.

use super::RelationDef;
use crate::database::{Database, DatabaseInner, RegistryInner};
use crate::error::{SyncError, SyncResult};
use crate::model::Model;
use crate::record::Record;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Discriminator configuration: a field on the owning record whose
/// value selects the related type.
#[derive(Debug, Clone)]
pub struct DiscriminatorDef {
    /// Field on the owning record carrying the discriminator value.
    pub field: String,
    /// Mapping from discriminator value to registered type name.
    pub types: Vec<(String, String)>,
}

impl DiscriminatorDef {
    /// Creates a discriminator over `field` with no mappings yet.
    pub fn new(field: impl Into<String>) -> DiscriminatorDef {
        DiscriminatorDef {
            field: field.into(),
            types: Vec::new(),
        }
    }

    /// Maps a discriminator value to a type name.
    pub fn with_type(
        mut self,
        value: impl Into<String>,
        type_name: impl Into<String>,
    ) -> DiscriminatorDef {
        self.types.push((value.into(), type_name.into()));
        self
    }
}

/// Resolves the target database for a relation, either once at build
/// time or per-instance through a discriminator field.
pub(crate) enum TargetResolver {
    Fixed(Weak<DatabaseInner>),
    Discriminated {
        field: String,
        /// (discriminator value, target database) pairs.
        types: Vec<(String, Weak<DatabaseInner>)>,
    },
}

impl TargetResolver {
    /// Resolves every named target against the registry, failing on
    /// the first unregistered type.
    pub(crate) fn build(
        def: &RelationDef,
        registry: &Arc<RegistryInner>,
    ) -> SyncResult<TargetResolver> {
        let unresolved = |target: &str| SyncError::UnresolvedRelation {
            relation: def.name.clone(),
            target: target.to_string(),
        };
        match &def.discriminator {
            None => {
                let db = registry
                    .database_inner(&def.target)
                    .ok_or_else(|| unresolved(&def.target))?;
                Ok(TargetResolver::Fixed(Arc::downgrade(&db)))
            }
            Some(discriminator) => {
                let mut types = Vec::with_capacity(discriminator.types.len());
                for (value, type_name) in &discriminator.types {
                    let db = registry
                        .database_inner(type_name)
                        .ok_or_else(|| unresolved(type_name))?;
                    types.push((value.clone(), Arc::downgrade(&db)));
                }
                Ok(TargetResolver::Discriminated {
                    field: discriminator.field.clone(),
                    types,
                })
            }
        }
    }

    /// The fixed target, or `None` for discriminated relations.
    pub(crate) fn fixed(&self) -> Option<Database> {
        match self {
            TargetResolver::Fixed(db) => db.upgrade().map(Database::from_inner),
            TargetResolver::Discriminated { .. } => None,
        }
    }

    /// Resolves against the owning record's discriminator field.
    /// Fixed resolvers ignore the fields.
    pub(crate) fn for_fields(&self, fields: &Record) -> Option<Database> {
        match self {
            TargetResolver::Fixed(db) => db.upgrade().map(Database::from_inner),
            TargetResolver::Discriminated { field, types } => {
                let value = fields.get(field)?.as_str()?;
                types
                    .iter()
                    .find(|(candidate, _)| candidate == value)
                    .and_then(|(_, db)| db.upgrade())
                    .map(Database::from_inner)
            }
        }
    }

    /// Returns true if `model` belongs to an admissible target type.
    pub(crate) fn admits(&self, model: &Model) -> bool {
        match self {
            TargetResolver::Fixed(db) => Weak::ptr_eq(db, &model.inner.db),
            TargetResolver::Discriminated { types, .. } => types
                .iter()
                .any(|(_, db)| Weak::ptr_eq(db, &model.inner.db)),
        }
    }

    /// The discriminator write a given related model implies on the
    /// owner, if any: `(field, value)`.
    pub(crate) fn discriminator_for(&self, model: &Model) -> Option<(String, Value)> {
        match self {
            TargetResolver::Fixed(_) => None,
            TargetResolver::Discriminated { field, types } => types
                .iter()
                .find(|(_, db)| Weak::ptr_eq(db, &model.inner.db))
                .map(|(value, _)| (field.clone(), Value::from(value.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseOptions;
    use crate::database::Registry;
    use crate::key::Key;
    use serde_json::json;

    #[test]
    fn discriminator_builder() {
        let def = DiscriminatorDef::new("parent_type")
            .with_type("list", "task_list")
            .with_type("project", "project");
        assert_eq!(def.field, "parent_type");
        assert_eq!(def.types.len(), 2);
    }

    #[test]
    fn discriminated_resolution_follows_field() {
        let registry = Registry::builder()
            .database(DatabaseOptions::new("task"))
            .database(DatabaseOptions::new("task_list"))
            .database(DatabaseOptions::new("project"))
            .relation(
                "task",
                RelationDef::belongs_to("parent", "", "parent_id").with_discriminator(
                    DiscriminatorDef::new("parent_type")
                        .with_type("list", "task_list")
                        .with_type("project", "project"),
                ),
            )
            .build()
            .unwrap();

        let task_db = registry.database("task").unwrap();
        let list_db = registry.database("task_list").unwrap();
        let list = list_db.stub(Key::from("l1"));

        let task = task_db
            .instantiate(match json!({"id": "t1", "parent_type": "list", "parent_id": "l1"}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .unwrap();

        let related = task.get_related("parent").unwrap();
        let parent = related.one().expect("parent resolved");
        assert!(Model::same(parent, &list));
    }
}
