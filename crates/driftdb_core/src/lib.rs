//! # DriftDB Core
//!
//! Local-first object store with live collections, thread handoff and an
//! operation-based merge engine.
//!
//! This crate provides:
//! - `Store`, the committed state shared by every handle on one location,
//!   with a single writer (in-process and, for file-backed stores, across
//!   processes) and lock-free readers on pinned snapshots
//! - `Database`, a thread-confined handle with write transactions,
//!   refresh and change notifications
//! - Live collections (`LiveList`, `LiveSet`, `LiveMap`), query `Results`
//!   and `LinkingObjects`, all implementing `Collection`
//! - `ThreadSafeReference`, a one-shot capability for moving identities
//!   between threads, and the reusable `ThreadSafe` slot
//! - The merge engine applying local and remote sync operations with
//!   idempotent replay
//! - `Registry`, the explicit table of open stores and default configuration
//!
//! ## Usage
//!
//! ```
//! use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, Value, ValueType};
//!
//! let registry = Registry::new();
//! let schema = Schema::new().class(
//!     ClassSchema::new("Dog")
//!         .field("name", ValueType::String)
//!         .list("tricks", ValueType::String),
//! );
//! let db = Database::open(&registry, Config::in_memory("docs").schema(schema)).unwrap();
//!
//! let rex = db.write(|db| db.create("Dog", [("name", "Rex")])).unwrap();
//! let tricks = rex.list("tricks").unwrap();
//! db.write(|_| tricks.extend(["sit", "roll"])).unwrap();
//!
//! assert_eq!(tricks.len().unwrap(), 2);
//! assert_eq!(rex.get("name").unwrap(), Value::from("Rex"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collections;
mod config;
mod database;
mod dir;
mod error;
mod handoff;
mod merge;
mod notify;
mod object;
mod record;
mod registry;
mod schema;
mod snapshot;
mod store;
mod types;

pub use collections::{
    AnyCollection, Collection, CompareOp, LinkingObjects, LiveList, LiveMap, LiveSet, Predicate,
    Results, SortKey,
};
pub use config::{Config, Location};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use handoff::{HandoffPath, Resolution, ThreadConfined, ThreadSafe, ThreadSafeReference};
pub use merge::MergeReport;
pub use notify::{ChangeSet, NotificationToken};
pub use object::{DraftValue, Object, ObjectDraft};
pub use registry::Registry;
pub use schema::{ClassSchema, Property, PropertyKind, Schema};
pub use snapshot::Snapshot;
pub use store::{Store, WriteGuard};
pub use types::Version;

pub use driftdb_codec::{Decimal128, ObjectId, ObjectKey, RowId, Value, ValueType};
pub use driftdb_sync_protocol::{ReplicaId, SyncOperation};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
