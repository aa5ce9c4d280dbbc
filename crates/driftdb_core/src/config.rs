//! Database configuration.

use crate::schema::Schema;
use driftdb_sync_protocol::ReplicaId;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// Process-local store identified by name. Lives until the registry
    /// that opened it is reset.
    InMemory(String),
    /// Directory on disk, shared by every process that opens it.
    Path(PathBuf),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::InMemory(name) => write!(f, "memory:{name}"),
            Location::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the store lives.
    pub location: Location,

    /// Declared schema. `None` opens with whatever schema is stored.
    pub schema: Option<Schema>,

    /// Replica identity for a newly created store.
    pub replica: Option<ReplicaId>,

    /// How long `begin_write` may wait for the writer lock (`None` = forever).
    pub write_lock_timeout: Option<Duration>,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the store image on every commit.
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: Location::InMemory("default".into()),
            schema: None,
            replica: None,
            write_lock_timeout: None,
            create_if_missing: true,
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a configuration for a named in-memory store.
    #[must_use]
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            location: Location::InMemory(name.into()),
            ..Self::default()
        }
    }

    /// Creates a configuration for a store directory.
    #[must_use]
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::Path(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Sets the declared schema.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the replica id used when the store is created.
    #[must_use]
    pub const fn replica(mut self, replica: ReplicaId) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Sets the writer lock timeout.
    #[must_use]
    pub const fn write_lock_timeout(mut self, timeout: Duration) -> Self {
        self.write_lock_timeout = Some(timeout);
        self
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync on commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
