//! Shared store: the committed state behind every handle on one location.
//!
//! A `Store` is `Send + Sync` and shared by all handles (on any thread) that
//! opened the same location through the same [`Registry`](crate::Registry).
//! It owns:
//!
//! - the latest committed [`Snapshot`]
//! - the single-writer lock (in-process flag plus, for file-backed stores, an
//!   exclusive lock on `WRITE.LOCK` so other processes serialize too)
//! - the outbox of local operations awaiting upload
//! - commit subscribers
//!
//! Readers never block: they hold an `Arc<Snapshot>` of the version they
//! pinned, and commits publish a new `Arc`.

use crate::config::{Config, Location};
use crate::dir::{FileWriteLock, StoreDir};
use crate::error::{CoreError, CoreResult};
use crate::merge::{self, MergeReport};
use crate::schema::Schema;
use crate::snapshot::{Snapshot, SnapshotImage};
use crate::types::Version;
use driftdb_codec::{decode_image, encode_image};
use driftdb_sync_protocol::{Outbox, ReplicaId, SyncOperation};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const STORE_MAGIC: [u8; 4] = *b"DRFT";
const STORE_FORMAT: u16 = 1;

#[derive(Serialize, Deserialize)]
struct StoreImage {
    replica: ReplicaId,
    snapshot: SnapshotImage,
    outbox: Outbox,
    /// Bumped on every write of the image, including outbox-only updates.
    #[serde(default)]
    generation: u64,
}

/// Outbox plus the image generation it was last read from or written as.
struct Durable {
    outbox: Outbox,
    generation: u64,
}

/// Committed state shared by every handle on one location.
pub struct Store {
    location: Location,
    dir: Option<StoreDir>,
    replica: ReplicaId,
    sync_on_commit: bool,
    latest: RwLock<Arc<Snapshot>>,
    durable: Mutex<Durable>,
    writer_busy: Mutex<bool>,
    writer_released: Condvar,
    subscribers: Mutex<Vec<mpsc::Sender<Version>>>,
}

/// Exclusive right to commit to a store. Released on drop.
pub struct WriteGuard {
    store: Arc<Store>,
    _file: Option<FileWriteLock>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        *self.store.writer_busy.lock() = false;
        self.store.writer_released.notify_one();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("replica", &self.replica)
            .field("version", &self.latest_version())
            .finish()
    }
}

impl Store {
    /// Opens the store described by `config`.
    ///
    /// File-backed stores load their image from disk. The configured schema
    /// is merged into the stored one (new classes are added, changed classes
    /// are rejected with `Configuration`).
    pub fn open(config: &Config) -> CoreResult<Arc<Self>> {
        let (dir, image) = match &config.location {
            Location::InMemory(_) => (None, None),
            Location::Path(path) => {
                let dir = StoreDir::open(path, config.create_if_missing)?;
                let image = match dir.read_image()? {
                    Some(bytes) => Some(decode_store_image(&bytes)?),
                    None => None,
                };
                (Some(dir), image)
            }
        };

        let fresh = image.is_none();
        let (replica, snapshot, outbox, generation) = match image {
            Some(image) => {
                if let Some(requested) = config.replica {
                    if requested != image.replica {
                        tracing::warn!(
                            stored = %image.replica,
                            %requested,
                            "ignoring configured replica id for existing store"
                        );
                    }
                }
                (
                    image.replica,
                    Snapshot::from(image.snapshot),
                    image.outbox,
                    image.generation,
                )
            }
            None => (
                config.replica.unwrap_or_default(),
                Snapshot::empty(Schema::new()),
                Outbox::new(),
                0,
            ),
        };

        let store = Arc::new(Self {
            location: config.location.clone(),
            dir,
            replica,
            sync_on_commit: config.sync_on_commit,
            latest: RwLock::new(Arc::new(snapshot)),
            durable: Mutex::new(Durable { outbox, generation }),
            writer_busy: Mutex::new(false),
            writer_released: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
        });

        let schema = config.schema.clone().unwrap_or_default();
        store.ensure_schema(&schema, fresh && store.dir.is_some())?;

        tracing::info!(
            location = %store.location,
            replica = %store.replica,
            version = %store.latest_version(),
            "store opened"
        );
        Ok(store)
    }

    /// Merges `schema` into the stored schema, committing if it changes.
    pub(crate) fn ensure_schema(self: &Arc<Self>, schema: &Schema, force_persist: bool) -> CoreResult<()> {
        schema.validate()?;
        if self.latest.read().schema.merge(schema)?.is_none() && !force_persist {
            return Ok(());
        }

        let guard = self.begin_write(None)?;
        let current = self.current();
        let merged = current.schema.merge(schema)?;
        if merged.is_none() && !force_persist {
            return Ok(());
        }
        let mut working = (*current).clone();
        if let Some(merged) = merged {
            tracing::info!(classes = merged.len(), "schema extended");
            working.schema = Arc::new(merged);
        }
        self.commit(&guard, working, Vec::new())?;
        Ok(())
    }

    /// Returns where this store lives.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns this store's replica id.
    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// Returns the latest version known in this process, without checking disk.
    pub fn latest_version(&self) -> Version {
        self.latest.read().version
    }

    /// Returns the latest snapshot known in this process, without checking disk.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.latest.read())
    }

    /// Returns the latest committed snapshot, picking up commits made by
    /// other processes.
    pub fn latest(&self) -> CoreResult<Arc<Snapshot>> {
        self.reload_if_newer()?;
        Ok(self.current())
    }

    fn reload_if_newer(&self) -> CoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let Some(bytes) = dir.read_image()? else {
            return Ok(());
        };
        let image = decode_store_image(&bytes)?;
        let mut durable = self.durable.lock();
        if image.generation <= durable.generation {
            return Ok(());
        }
        // Outbox-only updates (acknowledgements, cursor moves) change the
        // generation without a new version.
        durable.outbox = image.outbox;
        durable.generation = image.generation;
        let mut latest = self.latest.write();
        if image.snapshot.version > latest.version {
            tracing::debug!(
                from = %latest.version,
                to = %image.snapshot.version,
                "loaded commit from another process"
            );
            *latest = Arc::new(Snapshot::from(image.snapshot));
        }
        Ok(())
    }

    /// Acquires the writer lock, waiting up to `timeout` (forever if `None`).
    ///
    /// On success the in-memory state has been brought up to date with disk.
    pub fn begin_write(self: &Arc<Self>, timeout: Option<Duration>) -> CoreResult<WriteGuard> {
        let deadline = timeout.map(|t| Instant::now() + t);
        {
            let mut busy = self.writer_busy.lock();
            while *busy {
                match deadline {
                    None => self.writer_released.wait(&mut busy),
                    Some(deadline) => {
                        if self.writer_released.wait_until(&mut busy, deadline).timed_out() && *busy {
                            return Err(CoreError::WriteLockTimeout);
                        }
                    }
                }
            }
            *busy = true;
        }

        let mut guard = WriteGuard {
            store: Arc::clone(self),
            _file: None,
        };
        if let Some(dir) = &self.dir {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            guard._file = Some(dir.lock_writer(remaining)?);
        }
        self.reload_if_newer()?;
        Ok(guard)
    }

    /// Publishes `working` as the next version and queues `ops` for upload.
    ///
    /// The image is persisted before the version becomes visible; if that
    /// fails the store stays at the previous version.
    pub(crate) fn commit(
        &self,
        guard: &WriteGuard,
        mut working: Snapshot,
        ops: Vec<SyncOperation>,
    ) -> CoreResult<Arc<Snapshot>> {
        debug_assert!(std::ptr::eq(Arc::as_ptr(&guard.store), self));
        let mut durable = self.durable.lock();
        let previous = self.latest_version();
        working.version = previous.next();

        let mut next_outbox = durable.outbox.clone();
        for op in ops {
            next_outbox.push(op);
        }
        let generation = durable.generation + 1;
        self.persist(&working, &next_outbox, generation)?;
        durable.outbox = next_outbox;
        durable.generation = generation;

        let published = Arc::new(working);
        *self.latest.write() = Arc::clone(&published);
        drop(durable);

        tracing::debug!(version = %published.version, "committed");
        self.notify(published.version);
        Ok(published)
    }

    fn persist(&self, snapshot: &Snapshot, outbox: &Outbox, generation: u64) -> CoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let image = StoreImage {
            replica: self.replica,
            snapshot: SnapshotImage::from(snapshot),
            outbox: outbox.clone(),
            generation,
        };
        let bytes = encode_image(STORE_MAGIC, STORE_FORMAT, &image)?;
        dir.write_image(&bytes, self.sync_on_commit)
    }

    fn notify(&self, version: Version) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(version).is_ok());
    }

    /// Subscribes to commit notifications.
    ///
    /// Every commit in this process sends its version. Handles do not
    /// refresh on their own; receiving a version is the signal that a
    /// `refresh` would advance.
    pub fn subscribe(&self) -> mpsc::Receiver<Version> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Applies a batch of operations received from the server.
    ///
    /// Runs in its own write transaction; readers keep their snapshots and
    /// see the result after their next refresh. Already-applied operations
    /// are skipped.
    pub fn apply_remote(self: &Arc<Self>, ops: &[SyncOperation]) -> CoreResult<MergeReport> {
        if ops.is_empty() {
            return Ok(MergeReport::default());
        }
        let guard = self.begin_write(None)?;
        let mut working = (*self.current()).clone();
        let report = merge::apply_remote(&mut working, ops);
        if report.applied + report.rejected + report.deferred > 0 {
            self.commit(&guard, working, Vec::new())?;
        }
        tracing::info!(
            applied = report.applied,
            duplicates = report.duplicates,
            rejected = report.rejected,
            deferred = report.deferred,
            version = %self.latest_version(),
            "merged remote operations"
        );
        Ok(report)
    }

    /// Returns up to `limit` operations awaiting upload, oldest first.
    pub fn pending_operations(&self, limit: usize) -> CoreResult<Vec<SyncOperation>> {
        self.reload_if_newer()?;
        Ok(self.durable.lock().outbox.pending(limit))
    }

    /// Returns the number of operations awaiting upload, as last loaded.
    ///
    /// Call [`latest`](Self::latest) first to pick up acknowledgements made
    /// by other processes.
    pub fn pending_count(&self) -> usize {
        self.durable.lock().outbox.len()
    }

    /// Drops uploaded operations with a clock at or below `clock`.
    pub fn acknowledge(self: &Arc<Self>, clock: u64) -> CoreResult<()> {
        self.update_outbox(|outbox| outbox.acknowledge_up_to(clock))
    }

    /// Returns the server cursor, as last loaded.
    pub fn server_cursor(&self) -> u64 {
        self.durable.lock().outbox.server_cursor()
    }

    /// Records how far this store has pulled from the server.
    pub fn set_server_cursor(self: &Arc<Self>, cursor: u64) -> CoreResult<()> {
        self.update_outbox(|outbox| outbox.set_server_cursor(cursor))
    }

    fn update_outbox(self: &Arc<Self>, f: impl FnOnce(&mut Outbox)) -> CoreResult<()> {
        let _guard = self.begin_write(None)?;
        let mut durable = self.durable.lock();
        let mut next = durable.outbox.clone();
        f(&mut next);
        if next != durable.outbox {
            let generation = durable.generation + 1;
            self.persist(&self.current(), &next, generation)?;
            durable.outbox = next;
            durable.generation = generation;
        }
        Ok(())
    }
}

fn decode_store_image(bytes: &[u8]) -> CoreResult<StoreImage> {
    let (format, image): (u16, StoreImage) = decode_image(STORE_MAGIC, bytes)?;
    if format != STORE_FORMAT {
        return Err(CoreError::invalid_format(format!(
            "unsupported store format {format}"
        )));
    }
    Ok(image)
}
