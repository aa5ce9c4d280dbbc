//! Bridge between the sync engine and a local store.

use crate::error::SyncResult;
use driftdb_core::{MergeReport, Store};
use driftdb_sync_protocol::{ReplicaId, SyncOperation};
use std::sync::Arc;

/// Local side of a sync session: applies downloads, supplies uploads.
pub trait SyncApplier: Send + Sync {
    /// Returns the replica whose operations this applier uploads.
    fn replica(&self) -> ReplicaId;

    /// Merges a batch of operations from the server.
    fn apply_remote_operations(&self, operations: &[SyncOperation]) -> SyncResult<MergeReport>;

    /// Returns up to `limit` local operations awaiting upload, oldest first.
    fn pending_operations(&self, limit: u32) -> SyncResult<Vec<SyncOperation>>;

    /// Returns the number of local operations awaiting upload.
    fn pending_count(&self) -> SyncResult<usize>;

    /// Drops uploaded operations up to and including `clock`.
    fn acknowledge_operations(&self, clock: u64) -> SyncResult<()>;

    /// Returns how far this replica has downloaded.
    fn server_cursor(&self) -> SyncResult<u64>;

    /// Records download progress.
    fn set_server_cursor(&self, cursor: u64) -> SyncResult<()>;
}

/// Applier backed by a shared [`Store`].
///
/// Merges run in their own write transaction on the store, so open handles
/// see downloaded changes at their next refresh.
#[derive(Debug, Clone)]
pub struct StoreApplier {
    store: Arc<Store>,
}

impl StoreApplier {
    /// Creates an applier for a store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

impl SyncApplier for StoreApplier {
    fn replica(&self) -> ReplicaId {
        self.store.replica()
    }

    fn apply_remote_operations(&self, operations: &[SyncOperation]) -> SyncResult<MergeReport> {
        Ok(self.store.apply_remote(operations)?)
    }

    fn pending_operations(&self, limit: u32) -> SyncResult<Vec<SyncOperation>> {
        Ok(self.store.pending_operations(limit as usize)?)
    }

    fn pending_count(&self) -> SyncResult<usize> {
        self.store.latest()?;
        Ok(self.store.pending_count())
    }

    fn acknowledge_operations(&self, clock: u64) -> SyncResult<()> {
        Ok(self.store.acknowledge(clock)?)
    }

    fn server_cursor(&self) -> SyncResult<u64> {
        self.store.latest()?;
        Ok(self.store.server_cursor())
    }

    fn set_server_cursor(&self, cursor: u64) -> SyncResult<()> {
        Ok(self.store.set_server_cursor(cursor)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, ValueType};

    fn open(registry: &Registry, name: &str) -> Database {
        let schema = Schema::new().class(ClassSchema::new("Item").field("n", ValueType::Int));
        Database::open(registry, Config::in_memory(name).schema(schema)).unwrap()
    }

    #[test]
    fn applier_moves_operations_between_stores() {
        let registry = Registry::new();
        let source = open(&registry, "source");
        let target = open(&registry, "target");
        source
            .write(|db| db.create("Item", [("n", 1i64)]).map(|_| ()))
            .unwrap();

        let from = StoreApplier::new(source.store().clone());
        let to = StoreApplier::new(target.store().clone());
        assert_eq!(from.replica(), source.replica());

        let ops = from.pending_operations(10).unwrap();
        assert_eq!(from.pending_count().unwrap(), ops.len());
        let report = to.apply_remote_operations(&ops).unwrap();
        assert_eq!(report.applied, ops.len());

        target.refresh().unwrap();
        assert_eq!(target.objects("Item").unwrap().len().unwrap(), 1);

        let last = ops.last().unwrap().clock();
        from.acknowledge_operations(last).unwrap();
        assert_eq!(from.pending_count().unwrap(), 0);
    }

    #[test]
    fn cursor_round_trips_and_never_moves_back() {
        let registry = Registry::new();
        let db = open(&registry, "cursor");
        let applier = StoreApplier::new(db.store().clone());

        assert_eq!(applier.server_cursor().unwrap(), 0);
        applier.set_server_cursor(7).unwrap();
        applier.set_server_cursor(3).unwrap();
        assert_eq!(applier.server_cursor().unwrap(), 7);
    }
}
