//! Thread-confined database handles.

use crate::collections::Results;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::merge;
use crate::notify::{ChangeSet, NotificationToken, Observers};
use crate::object::{DraftValue, Object, ObjectDraft};
use crate::registry::Registry;
use crate::schema::{PropertyKind, Schema};
use crate::snapshot::Snapshot;
use crate::store::{Store, WriteGuard};
use crate::types::Version;
use driftdb_codec::{ObjectKey, RowId, Value};
use driftdb_sync_protocol::{OperationKind, ReplicaId, Stamp, SyncOperation};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// A handle on a store, confined to the thread that opened it.
///
/// A handle reads from one pinned version until it refreshes or commits.
/// The pin is taken lazily on the first read. Within a write transaction
/// reads see the transaction's own uncommitted changes.
///
/// `Database` is `!Send`: objects, collections and results obtained from it
/// stay on its thread. Use [`ThreadSafeReference`](crate::ThreadSafeReference)
/// to hand them to another thread. Cloning a `Database` yields another
/// reference to the same handle.
#[derive(Clone)]
pub struct Database {
    inner: Rc<Inner>,
}

struct Inner {
    store: Arc<Store>,
    config: Config,
    view: RefCell<Option<Arc<Snapshot>>>,
    write: RefCell<Option<WriteState>>,
    observers: Rc<Observers>,
    closed: Cell<bool>,
}

struct WriteState {
    guard: WriteGuard,
    base: Arc<Snapshot>,
    working: Snapshot,
    ops: Vec<SyncOperation>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", self.inner.store.location())
            .field("version", &self.version())
            .field("in_write", &self.is_in_write_transaction())
            .finish()
    }
}

impl Database {
    /// Opens a handle on the store at `config.location`.
    pub fn open(registry: &Registry, config: Config) -> CoreResult<Self> {
        let store = registry.store(&config)?;
        tracing::debug!(location = %store.location(), "database handle opened");
        Ok(Self {
            inner: Rc::new(Inner {
                store,
                config,
                view: RefCell::new(None),
                write: RefCell::new(None),
                observers: Rc::new(Observers::default()),
                closed: Cell::new(false),
            }),
        })
    }

    /// Opens a handle using the registry's default configuration.
    pub fn open_default(registry: &Registry) -> CoreResult<Self> {
        Self::open(registry, registry.default_config())
    }

    /// Returns the configuration this handle was opened with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// Returns the store's replica id.
    pub fn replica(&self) -> ReplicaId {
        self.inner.store.replica()
    }

    /// Returns the schema visible to this handle.
    pub fn schema(&self) -> CoreResult<Schema> {
        self.read(|s| s.schema().clone())
    }

    /// Returns the version this handle is pinned to, if any.
    ///
    /// Inside a write transaction this is the version the write started from.
    pub fn version(&self) -> Option<Version> {
        if let Some(state) = self.inner.write.borrow().as_ref() {
            return Some(state.base.version);
        }
        self.inner.view.borrow().as_ref().map(|s| s.version)
    }

    /// Returns true if `other` is a handle on the same store.
    pub fn same_store(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner.store, &other.inner.store)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns true once the handle is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Closes the handle. Any open write is rolled back and every object
    /// obtained from this handle becomes invalidated.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        self.inner.write.borrow_mut().take();
        self.inner.view.borrow_mut().take();
        self.inner.observers.clear();
        tracing::debug!(location = %self.inner.store.location(), "database handle closed");
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::DatabaseClosed);
        }
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Returns true while a write transaction is open on this handle.
    pub fn is_in_write_transaction(&self) -> bool {
        self.inner.write.borrow().is_some()
    }

    pub(crate) fn ensure_in_write(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if !self.is_in_write_transaction() {
            return Err(CoreError::wrong_transaction_state(
                "cannot modify managed objects outside of a write transaction",
            ));
        }
        Ok(())
    }

    /// Starts a write transaction.
    ///
    /// Waits for the store's writer lock (bounded by the configured
    /// `write_lock_timeout`), then advances the handle to the latest
    /// version. Observers fire if that advance changed anything.
    pub fn begin_write(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.is_in_write_transaction() {
            return Err(CoreError::AlreadyInWriteTransaction);
        }
        let guard = self
            .inner
            .store
            .begin_write(self.inner.config.write_lock_timeout)?;
        let latest = self.inner.store.current();
        self.advance_to(Arc::clone(&latest));
        if self.inner.view.borrow().is_none() {
            *self.inner.view.borrow_mut() = Some(Arc::clone(&latest));
        }

        tracing::trace!(version = %latest.version, "write transaction started");
        *self.inner.write.borrow_mut() = Some(WriteState {
            guard,
            working: (*latest).clone(),
            base: latest,
            ops: Vec::new(),
        });
        Ok(())
    }

    /// Commits the open write transaction and returns the resulting version.
    ///
    /// A transaction that changed nothing does not create a version. If
    /// persisting fails the store keeps its previous version and the
    /// transaction is rolled back.
    pub fn commit_write(&self) -> CoreResult<Version> {
        self.ensure_open()?;
        let state = self
            .inner
            .write
            .borrow_mut()
            .take()
            .ok_or_else(|| CoreError::wrong_transaction_state("no write transaction to commit"))?;
        let WriteState {
            guard,
            base,
            working,
            ops,
        } = state;
        if ops.is_empty() {
            return Ok(base.version);
        }

        let count = ops.len();
        let published = self.inner.store.commit(&guard, working, ops)?;
        drop(guard);
        tracing::debug!(version = %published.version, operations = count, "write committed");

        self.inner.view.borrow_mut().replace(Arc::clone(&published));
        let changes = ChangeSet::between(&base, &published);
        if !changes.is_empty() {
            self.inner.observers.notify(&changes);
        }
        Ok(published.version)
    }

    /// Discards the open write transaction.
    pub fn cancel_write(&self) -> CoreResult<()> {
        self.ensure_open()?;
        match self.inner.write.borrow_mut().take() {
            Some(state) => {
                tracing::trace!(discarded = state.ops.len(), "write transaction cancelled");
                Ok(())
            }
            None => Err(CoreError::wrong_transaction_state(
                "no write transaction to cancel",
            )),
        }
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok`.
    ///
    /// If `f` fails the transaction is cancelled and the error returned.
    pub fn write<R>(&self, f: impl FnOnce(&Database) -> CoreResult<R>) -> CoreResult<R> {
        self.begin_write()?;
        match f(self) {
            Ok(result) => {
                if self.is_in_write_transaction() {
                    self.commit_write()?;
                }
                Ok(result)
            }
            Err(error) => {
                if self.is_in_write_transaction() {
                    self.cancel_write()?;
                }
                Err(error)
            }
        }
    }

    // =========================================================================
    // Versions and notifications
    // =========================================================================

    /// Advances the handle to the latest committed version.
    ///
    /// Returns true if the visible version changed. Observers are called
    /// with the objects that changed. A handle that has not read anything
    /// yet is pinned to the latest version. Inside a write transaction this
    /// does nothing.
    pub fn refresh(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        if self.is_in_write_transaction() {
            return Ok(false);
        }
        let latest = self.inner.store.latest()?;
        if self.inner.view.borrow().is_none() {
            *self.inner.view.borrow_mut() = Some(latest);
            return Ok(false);
        }
        Ok(self.advance_to(latest))
    }

    /// Moves a pinned view forward to `next`, notifying observers.
    pub(crate) fn advance_to(&self, next: Arc<Snapshot>) -> bool {
        let current = self.inner.view.borrow().clone();
        let Some(current) = current else {
            return false;
        };
        if next.version <= current.version {
            return false;
        }
        *self.inner.view.borrow_mut() = Some(Arc::clone(&next));
        tracing::trace!(from = %current.version, to = %next.version, "handle advanced");

        let changes = ChangeSet::between(&current, &next);
        if !changes.is_empty() {
            self.inner.observers.notify(&changes);
        }
        true
    }

    /// Pins the handle to `snapshot` if it has no pin yet, or advances it
    /// if `snapshot` is newer. Never moves the handle backward.
    pub(crate) fn adopt(&self, snapshot: &Arc<Snapshot>) {
        if self.is_in_write_transaction() {
            return;
        }
        let unpinned = self.inner.view.borrow().is_none();
        if unpinned {
            *self.inner.view.borrow_mut() = Some(Arc::clone(snapshot));
        } else {
            self.advance_to(Arc::clone(snapshot));
        }
    }

    /// Registers a callback invoked whenever this handle advances to a
    /// version with changed objects.
    ///
    /// Observing pins the handle to its current version, so changes made
    /// elsewhere are reported on the next `refresh`.
    pub fn observe(&self, callback: impl FnMut(&ChangeSet) + 'static) -> CoreResult<NotificationToken> {
        self.ensure_open()?;
        self.pinned()?;
        Ok(self.inner.observers.add(Box::new(callback)))
    }

    pub(crate) fn pinned(&self) -> CoreResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.inner.view.borrow().as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        let latest = self.inner.store.latest()?;
        *self.inner.view.borrow_mut() = Some(Arc::clone(&latest));
        Ok(latest)
    }

    /// Runs `f` against the state visible to this handle.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> CoreResult<R> {
        self.ensure_open()?;
        if let Some(state) = self.inner.write.borrow().as_ref() {
            return Ok(f(&state.working));
        }
        let snapshot = self.pinned()?;
        Ok(f(&snapshot))
    }

    /// Records a local operation in the open write transaction and returns
    /// its stamp (which is also the element id of a list insert).
    pub(crate) fn mutate(&self, object: &ObjectKey, kind: OperationKind) -> CoreResult<Stamp> {
        self.ensure_in_write()?;
        let replica = self.replica();
        let mut write = self.inner.write.borrow_mut();
        let state = write.as_mut().ok_or_else(|| {
            CoreError::wrong_transaction_state("cannot modify managed objects outside of a write transaction")
        })?;
        let stamp = Stamp::new(state.working.clock.tick(), replica);
        let op = SyncOperation::new(stamp, object.clone(), kind);
        merge::apply_local(&mut state.working, &op)?;
        state.ops.push(op);
        Ok(stamp)
    }

    pub(crate) fn property_kind(&self, class: &str, property: &str) -> CoreResult<PropertyKind> {
        self.read(|s| s.schema().property(class, property).map(|p| p.kind.clone()))?
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Creates an object of `class` with the given field values.
    pub fn create<K, V>(&self, class: &str, values: impl IntoIterator<Item = (K, V)>) -> CoreResult<Object>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut draft = ObjectDraft::new(class);
        for (name, value) in values {
            draft = draft.with(name, value);
        }
        self.add(draft)
    }

    /// Adds an unmanaged draft, returning the managed object.
    pub fn add(&self, draft: ObjectDraft) -> CoreResult<Object> {
        self.ensure_in_write()?;
        let (class, values) = draft.into_parts();
        let key = ObjectKey::new(class, RowId::new());
        self.mutate(&key, OperationKind::CreateObject)?;

        for (property, value) in values {
            match value {
                DraftValue::Value(value) => {
                    self.mutate(&key, OperationKind::SetField { property, value })?;
                }
                DraftValue::List(values) => {
                    let mut after = None;
                    for value in values {
                        let id = self.mutate(
                            &key,
                            OperationKind::ListInsert {
                                property: property.clone(),
                                after,
                                value,
                            },
                        )?;
                        after = Some(id);
                    }
                }
                DraftValue::Set(values) => {
                    for value in values {
                        self.mutate(
                            &key,
                            OperationKind::SetInsert {
                                property: property.clone(),
                                value,
                            },
                        )?;
                    }
                }
                DraftValue::Map(entries) => {
                    for (map_key, value) in entries {
                        self.mutate(
                            &key,
                            OperationKind::MapSet {
                                property: property.clone(),
                                key: map_key,
                                value,
                            },
                        )?;
                    }
                }
            }
        }
        Ok(Object::new(self.clone(), key))
    }

    /// Returns the object of `class` with `id`, if it exists.
    pub fn object(&self, class: &str, id: RowId) -> CoreResult<Option<Object>> {
        let key = ObjectKey::new(class, id);
        let exists = self.read(|s| {
            s.schema()
                .get(class)
                .ok_or_else(|| CoreError::unknown_class(class))
                .map(|_| s.contains(&key))
        })??;
        Ok(exists.then(|| Object::new(self.clone(), key)))
    }

    /// Returns all objects of `class`.
    pub fn objects(&self, class: &str) -> CoreResult<Results> {
        self.read(|s| {
            s.schema()
                .get(class)
                .map(|_| ())
                .ok_or_else(|| CoreError::unknown_class(class))
        })??;
        Ok(Results::new(self.clone(), class))
    }

    /// Deletes an object.
    pub fn delete(&self, object: &Object) -> CoreResult<()> {
        if !self.same_store(object.database()) {
            return Err(CoreError::invalid_operation(
                "object belongs to a different store",
            ));
        }
        self.mutate(object.key(), OperationKind::DeleteObject)?;
        Ok(())
    }

    /// Deletes every object in the store.
    pub fn delete_all(&self) -> CoreResult<()> {
        self.ensure_in_write()?;
        let keys: Vec<ObjectKey> = self.read(|s| s.objects.keys().cloned().collect())?;
        for key in &keys {
            self.mutate(key, OperationKind::DeleteObject)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ClassSchema;
    use driftdb_codec::ValueType;
    use std::time::Duration;

    fn schema() -> Schema {
        Schema::new().class(
            ClassSchema::new("Dog")
                .field("name", ValueType::String)
                .field("age", ValueType::Int)
                .list("tags", ValueType::String),
        )
    }

    fn open(registry: &Registry) -> Database {
        Database::open(registry, Config::in_memory("db").schema(schema())).unwrap()
    }

    #[test]
    fn mutation_outside_write_fails() {
        let registry = Registry::new();
        let db = open(&registry);
        let result = db.create("Dog", [("name", "Rex")]);
        assert!(matches!(result, Err(CoreError::WrongTransactionState { .. })));
    }

    #[test]
    fn nested_write_fails() {
        let registry = Registry::new();
        let db = open(&registry);
        db.begin_write().unwrap();
        assert!(matches!(db.begin_write(), Err(CoreError::AlreadyInWriteTransaction)));
        db.cancel_write().unwrap();
        assert!(db.cancel_write().is_err());
    }

    #[test]
    fn commit_advances_version() {
        let registry = Registry::new();
        let db = open(&registry);
        let before = db.store().latest_version();
        db.write(|db| db.create("Dog", [("name", "Rex")]).map(|_| ()))
            .unwrap();
        assert_eq!(db.version(), Some(before.next()));
        assert_eq!(db.objects("Dog").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn empty_commit_keeps_version() {
        let registry = Registry::new();
        let db = open(&registry);
        db.begin_write().unwrap();
        let before = db.store().latest_version();
        assert_eq!(db.commit_write().unwrap(), before);
        assert_eq!(db.store().latest_version(), before);
    }

    #[test]
    fn cancelled_write_discards_changes() {
        let registry = Registry::new();
        let db = open(&registry);
        db.begin_write().unwrap();
        db.create("Dog", [("name", "Rex")]).unwrap();
        assert_eq!(db.objects("Dog").unwrap().len().unwrap(), 1);
        db.cancel_write().unwrap();
        assert_eq!(db.objects("Dog").unwrap().len().unwrap(), 0);
    }

    #[test]
    fn failed_closure_rolls_back() {
        let registry = Registry::new();
        let db = open(&registry);
        let result: CoreResult<()> = db.write(|db| {
            db.create("Dog", [("name", "Rex")])?;
            db.create("Cat", [("name", "Tom")])?;
            Ok(())
        });
        assert!(matches!(result, Err(CoreError::UnknownClass { .. })));
        assert!(!db.is_in_write_transaction());
        assert_eq!(db.objects("Dog").unwrap().len().unwrap(), 0);
    }

    #[test]
    fn handle_stays_pinned_until_refresh() {
        let registry = Registry::new();
        let reader = open(&registry);
        let writer = open(&registry);
        assert_eq!(reader.objects("Dog").unwrap().len().unwrap(), 0);

        writer
            .write(|db| db.create("Dog", [("name", "Rex")]).map(|_| ()))
            .unwrap();
        assert_eq!(reader.objects("Dog").unwrap().len().unwrap(), 0);
        assert!(reader.refresh().unwrap());
        assert_eq!(reader.objects("Dog").unwrap().len().unwrap(), 1);
        assert!(!reader.refresh().unwrap());
    }

    #[test]
    fn observers_receive_changes() {
        let registry = Registry::new();
        let reader = open(&registry);
        let writer = open(&registry);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _token = reader
            .observe(move |changes| sink.borrow_mut().push(changes.clone()))
            .unwrap();

        writer
            .write(|db| db.create("Dog", [("name", "Rex")]).map(|_| ()))
            .unwrap();
        reader.refresh().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].inserted.len(), 1);
    }

    #[test]
    fn writer_lock_timeout_is_reported() {
        let registry = Registry::new();
        let config = Config::in_memory("db")
            .schema(schema())
            .write_lock_timeout(Duration::from_millis(20));
        let a = Database::open(&registry, config.clone()).unwrap();
        let b = Database::open(&registry, config).unwrap();
        a.begin_write().unwrap();
        assert!(matches!(b.begin_write(), Err(CoreError::WriteLockTimeout)));
    }

    #[test]
    fn closed_handle_rejects_use() {
        let registry = Registry::new();
        let db = open(&registry);
        db.close();
        assert!(matches!(db.objects("Dog"), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.begin_write(), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn draft_list_keeps_order() {
        let registry = Registry::new();
        let db = open(&registry);
        let dog = db
            .write(|db| {
                db.add(
                    ObjectDraft::new("Dog")
                        .with("name", "Rex")
                        .with_list("tags", ["a", "b", "c"]),
                )
            })
            .unwrap();
        let tags = dog.list("tags").unwrap().to_vec().unwrap();
        assert_eq!(tags, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    }
}
