//! Test fixtures and database helpers.
//!
//! Provides temporary databases and replica pairs synchronized through an
//! in-memory relay.

use crate::cases::HOLDER;
use driftdb_core::{Config, CoreResult, Database, Object, ObjectDraft, Registry, Schema};
use driftdb_sync_engine::{MemoryServer, StoreApplier, SyncConfig, SyncEngine, SyncResult};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database handle.
    pub db: Database,
    /// Registry the database was opened through.
    pub registry: Registry,
    /// Kept alive so the directory outlives the handle.
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates an in-memory test database.
    pub fn memory(schema: Schema) -> Self {
        let registry = Registry::new();
        let db = Database::open(&registry, Config::in_memory("test").schema(schema))
            .expect("failed to open in-memory database");
        Self {
            db,
            registry,
            temp_dir: None,
        }
    }

    /// Creates a file-backed test database in a fresh temporary directory.
    pub fn file(schema: Schema) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let registry = Registry::new();
        let db = Database::open(&registry, Config::at_path(temp_dir.path()).schema(schema))
            .expect("failed to open file database");
        Self {
            db,
            registry,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Opens the same directory through a fresh registry, as another process
    /// would. Returns `None` for in-memory databases.
    pub fn open_another_process(&self) -> Option<Database> {
        let path = self.path()?;
        Database::open(&Registry::new(), Config::at_path(path)).ok()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(schema: Schema, f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory(schema);
    f(&test_db.db)
}

/// Runs a test with a temporary file-backed database.
pub fn with_file_db<F, R>(schema: Schema, f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file(schema);
    let path = test_db
        .path()
        .expect("file database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}

/// One replica: a database plus the engine syncing it.
pub struct Replica {
    /// The database handle.
    pub db: Database,
    /// Engine connected to the pair's relay.
    pub engine: SyncEngine<MemoryServer, StoreApplier>,
}

impl Replica {
    /// Opens a named in-memory replica on `registry`.
    pub fn open(
        registry: &Registry,
        name: &str,
        schema: Schema,
        server: &Arc<MemoryServer>,
    ) -> CoreResult<Self> {
        let db = Database::open(registry, Config::in_memory(name).schema(schema))?;
        let applier = Arc::new(StoreApplier::new(db.store().clone()));
        let engine = SyncEngine::new(SyncConfig::new("testkit"), Arc::clone(server), applier);
        Ok(Self { db, engine })
    }

    /// Runs one sync cycle and refreshes the handle.
    pub fn sync(&self) -> SyncResult<()> {
        self.engine.sync()?;
        self.db.refresh()?;
        Ok(())
    }

    /// Creates an empty [`HOLDER`] object in its own transaction.
    pub fn create_holder(&self) -> CoreResult<Object> {
        self.db.write(|db| db.add(ObjectDraft::new(HOLDER)))
    }
}

/// Two replicas sharing one relay.
pub struct ReplicaPair {
    /// The relay.
    pub server: Arc<MemoryServer>,
    /// First replica.
    pub a: Replica,
    /// Second replica.
    pub b: Replica,
    /// Registry both replicas were opened through.
    pub registry: Registry,
}

impl ReplicaPair {
    /// Opens two in-memory replicas with the same schema.
    pub fn new(schema: Schema) -> Self {
        let server = Arc::new(MemoryServer::new());
        let registry = Registry::new();
        let a = Replica::open(&registry, "replica-a", schema.clone(), &server)
            .expect("failed to open replica a");
        let b = Replica::open(&registry, "replica-b", schema, &server)
            .expect("failed to open replica b");
        Self {
            server,
            a,
            b,
            registry,
        }
    }

    /// Syncs a, then b, then a, which exchanges everything both ways.
    pub fn sync(&self) {
        self.a.sync().expect("sync a");
        self.b.sync().expect("sync b");
        self.a.sync().expect("sync a");
    }
}
