//! Registry fixtures for the task / task-list domain.

use crate::remote::ScriptedRemote;
use crate::store::TrackingStore;
use riptide_core::{
    DatabaseOptions, LocalStore, Record, Registry, RegistryBuilder, RelationDef, RemoteService,
};
use std::sync::Arc;

/// Unwraps a JSON object literal into a [`Record`].
///
/// Panics on non-object values; fixtures only.
pub fn rec(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("fixture record must be an object, got {other}"),
    }
}

/// The builder for the standard two-type fixture: `task_list` hasMany
/// `task` ordered by `position`, `task` belongsTo its list.
pub fn task_registry_builder() -> RegistryBuilder {
    Registry::builder()
        .database(DatabaseOptions::new("task_list"))
        .database(DatabaseOptions::new("task").with_comparator("position"))
        .relation(
            "task_list",
            RelationDef::has_many("tasks", "task", "task_list_id").with_comparator("position"),
        )
        .relation(
            "task",
            RelationDef::belongs_to("list", "task_list", "task_list_id"),
        )
}

/// The standard fixture registry over a given remote.
pub fn task_registry(remote: Arc<ScriptedRemote>) -> Registry {
    task_registry_builder()
        .remote(remote as Arc<dyn RemoteService>)
        .build()
        .expect("fixture registry builds")
}

/// The standard fixture registry over a given remote and store.
pub fn task_registry_with_store(
    remote: Arc<ScriptedRemote>,
    store: Arc<TrackingStore>,
) -> Registry {
    task_registry_builder()
        .remote(remote as Arc<dyn RemoteService>)
        .store(store as Arc<dyn LocalStore>)
        .build()
        .expect("fixture registry builds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::scripted_remote;
    use serde_json::json;

    #[test]
    fn fixture_registry_builds_both_types() {
        let registry = task_registry(scripted_remote());
        assert!(registry.database("task").is_some());
        assert!(registry.database("task_list").is_some());
    }

    #[test]
    fn rec_unwraps_objects() {
        let record = rec(json!({"id": "t1"}));
        assert_eq!(record.get("id"), Some(&json!("t1")));
    }
}
