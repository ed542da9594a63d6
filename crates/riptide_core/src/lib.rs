//! Offline-capable synchronization for structured records.
//!
//! `riptide_core` keeps three stores consistent for every model: an
//! in-memory instance, a local persistent cache, and a remote service,
//! with optional live broadcasting of confirmed changes. Mutations run
//! through a per-model operation pipeline whose stages are gated by a
//! [`Cascade`] bitmask; relations between types are kept consistent by
//! strategy objects reacting to model lifecycle events.
//!
//! Everything starts from a [`Registry`]:
//!
//! ```
//! use riptide_core::{DatabaseOptions, RelationDef, Registry};
//!
//! let registry = Registry::builder()
//!     .database(DatabaseOptions::new("task_list"))
//!     .database(DatabaseOptions::new("task").with_comparator("position"))
//!     .relation("task_list", RelationDef::has_many("tasks", "task", "task_list_id"))
//!     .relation("task", RelationDef::belongs_to("list", "task_list", "task_list_id"))
//!     .build()
//!     .unwrap();
//!
//! let tasks = registry.database("task").unwrap();
//! let (task, promise) = tasks
//!     .create(serde_json::json!({"id": "t1", "position": 1}).as_object().cloned().unwrap())
//!     .unwrap();
//! assert!(promise.outcome().is_some());
//! assert!(task.is_saved_remotely());
//! ```
//!
//! The collaborators ([`RemoteService`], [`LocalStore`], [`LiveChannel`])
//! are injected traits; the crate ships in-memory and null
//! implementations, and `riptide_testkit` provides scripted ones.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cascade;
mod collection;
mod config;
mod database;
mod error;
mod events;
mod key;
mod live;
mod model;
mod operation;
mod promise;
mod record;
mod relation;
mod remote;
mod store;

pub use cascade::Cascade;
pub use collection::{
    compare_values, CollectionEvent, Comparator, FilteredCollection, ModelCollection,
};
pub use config::{CacheMode, DatabaseOptions, RequestOptions};
pub use database::{Database, Registry, RegistryBuilder, RegistryError};
pub use error::{SyncError, SyncResult};
pub use events::{Listeners, Subscription};
pub use key::{Key, KeyHandler, KeyPart};
pub use live::{LiveChannel, NullLive};
pub use model::{Model, ModelEvent, ModelStatus};
pub use operation::OpKind;
pub use promise::{Outcome, Promise, PromiseGroup};
pub use record::{decode_local, diff, encode_local, matches, merge, Record, SAVED_FIELD, STATUS_FIELD};
pub use relation::{
    DiscriminatorDef, EncodeMode, ModelRef, Related, Relation, RelationDef, RelationKind,
    ThroughDef,
};
pub use remote::{NullRemote, RemoteError, RemoteResult, RemoteService};
pub use store::{LocalStore, MemoryStore, StoreError, StoreResult};
