//! # Riptide Testkit
//!
//! Test utilities for Riptide.
//!
//! This crate provides:
//! - Scripted collaborator implementations that record every call and
//!   can be programmed to fail, conflict, or go offline
//! - Registry fixtures for the task / task-list domain used across
//!   the integration suites
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use riptide_testkit::prelude::*;
//!
//! let remote = scripted_remote();
//! let registry = task_registry(remote.clone());
//! let tasks = registry.database("task").unwrap();
//! let (task, promise) = tasks.create(rec(serde_json::json!({"id": "t1"}))).unwrap();
//! assert!(promise.outcome().is_some());
//! assert_eq!(remote.call_count(), 1);
//! assert!(task.is_saved_remotely());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod live;
pub mod remote;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::live::*;
    pub use crate::remote::*;
    pub use crate::store::*;
}

pub use fixtures::*;
pub use generators::*;
pub use live::*;
pub use remote::*;
pub use store::*;
