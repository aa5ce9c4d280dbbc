//! Moving objects and collections between threads.
//!
//! Handles and everything read through them are confined to their thread.
//! To continue working with an object (or a collection, query, or backlink
//! set) on another thread, capture its identity in a
//! [`ThreadSafeReference`], send the reference, and resolve it against a
//! handle on the receiving thread:
//!
//! ```
//! use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, ThreadSafeReference, ValueType};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::new());
//! let config = Config::in_memory("handoff")
//!     .schema(Schema::new().class(ClassSchema::new("Task").field("done", ValueType::Bool)));
//! let db = Database::open(&registry, config.clone()).unwrap();
//! let task = db.write(|db| db.create("Task", [("done", false)])).unwrap();
//! let reference = ThreadSafeReference::new(&task).unwrap();
//!
//! let worker = {
//!     let registry = Arc::clone(&registry);
//!     std::thread::spawn(move || {
//!         let db = Database::open(&registry, config).unwrap();
//!         let task = db.resolve(&reference).unwrap().unwrap();
//!         db.write(|_| task.set("done", true)).unwrap();
//!     })
//! };
//! worker.join().unwrap();
//!
//! assert_eq!(task.get("done").unwrap().as_bool(), Some(false));
//! db.refresh().unwrap();
//! assert_eq!(task.get("done").unwrap().as_bool(), Some(true));
//! ```
//!
//! A reference carries identity, not state, and resolves exactly once.

use crate::collections::{AnyCollection, LinkingObjects, LiveList, LiveMap, LiveSet, Predicate, Results, SortKey};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::{Object, ObjectDraft};
use crate::record::Field;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::types::Version;
use driftdb_codec::ObjectKey;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identity of a thread-confined value, independent of any handle.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffPath(pub(crate) Target);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    Object(ObjectKey),
    List {
        owner: ObjectKey,
        property: String,
    },
    Set {
        owner: ObjectKey,
        property: String,
    },
    Map {
        owner: ObjectKey,
        property: String,
    },
    Results {
        class: String,
        predicate: Option<Predicate>,
        sort: Vec<SortKey>,
    },
    LinkingObjects {
        target: ObjectKey,
        origin_class: String,
        origin_property: String,
    },
}

/// A value confined to the thread of its handle that can be captured and
/// re-located on another handle.
pub trait ThreadConfined: Sized {
    /// Returns the handle the value belongs to and its identity.
    ///
    /// Fails with `UnmanagedObject` for values not stored in a database and
    /// `InvalidatedObject` for deleted ones.
    fn capture(&self) -> CoreResult<(Database, HandoffPath)>;

    /// Re-locates a captured identity in `db`. `None` if it no longer exists.
    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>>;
}

/// Maps a closed handle to an invalidated source.
fn live(db: &Database, key: &ObjectKey) -> CoreResult<()> {
    match db.read(|s| s.contains(key)) {
        Ok(true) => Ok(()),
        Ok(false) | Err(CoreError::DatabaseClosed) => Err(CoreError::InvalidatedObject),
        Err(other) => Err(other),
    }
}

fn has_field(s: &Snapshot, owner: &ObjectKey, property: &str, want: fn(&Field) -> bool) -> bool {
    s.field(owner, property).is_some_and(want)
}

impl ThreadConfined for Object {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        live(self.database(), self.key())?;
        Ok((self.database().clone(), HandoffPath(Target::Object(self.key().clone()))))
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        let Target::Object(key) = &path.0 else {
            return Ok(None);
        };
        let exists = db.read(|s| s.contains(key))?;
        Ok(exists.then(|| Object::new(db.clone(), key.clone())))
    }
}

impl ThreadConfined for ObjectDraft {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        Err(CoreError::UnmanagedObject)
    }

    fn locate(_db: &Database, _path: &HandoffPath) -> CoreResult<Option<Self>> {
        Ok(None)
    }
}

impl ThreadConfined for LiveList {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        live(self.database(), self.owner_key())?;
        let target = Target::List {
            owner: self.owner_key().clone(),
            property: self.property().to_owned(),
        };
        Ok((self.database().clone(), HandoffPath(target)))
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        let Target::List { owner, property } = &path.0 else {
            return Ok(None);
        };
        let found = db.read(|s| has_field(s, owner, property, |f| matches!(f, Field::List(_))))?;
        Ok(found.then(|| LiveList::new(db.clone(), owner.clone(), property)))
    }
}

impl ThreadConfined for LiveSet {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        let db = self.database().clone();
        live(&db, self.owner_key())?;
        let target = Target::Set {
            owner: self.owner_key().clone(),
            property: self.property().to_owned(),
        };
        Ok((db, HandoffPath(target)))
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        let Target::Set { owner, property } = &path.0 else {
            return Ok(None);
        };
        let found = db.read(|s| has_field(s, owner, property, |f| matches!(f, Field::Set(_))))?;
        Ok(found.then(|| LiveSet::new(db.clone(), owner.clone(), property)))
    }
}

impl ThreadConfined for LiveMap {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        let db = self.database().clone();
        live(&db, self.owner_key())?;
        let target = Target::Map {
            owner: self.owner_key().clone(),
            property: self.property().to_owned(),
        };
        Ok((db, HandoffPath(target)))
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        let Target::Map { owner, property } = &path.0 else {
            return Ok(None);
        };
        let found = db.read(|s| has_field(s, owner, property, |f| matches!(f, Field::Map(_))))?;
        Ok(found.then(|| LiveMap::new(db.clone(), owner.clone(), property)))
    }
}

impl ThreadConfined for Results {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        if self.database().is_closed() {
            return Err(CoreError::InvalidatedObject);
        }
        let (class, predicate, sort) = self.parts();
        let target = Target::Results {
            class: class.to_owned(),
            predicate: predicate.cloned(),
            sort: sort.to_vec(),
        };
        Ok((self.database().clone(), HandoffPath(target)))
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        let Target::Results {
            class,
            predicate,
            sort,
        } = &path.0
        else {
            return Ok(None);
        };
        let known = db.read(|s| s.schema().get(class).is_some())?;
        Ok(known.then(|| {
            Results::from_parts(db.clone(), class.clone(), predicate.clone(), sort.clone())
        }))
    }
}

impl ThreadConfined for LinkingObjects {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        let db = self.database().clone();
        let (target, origin_class, origin_property) = self.parts();
        live(&db, target)?;
        let target = Target::LinkingObjects {
            target: target.clone(),
            origin_class: origin_class.to_owned(),
            origin_property: origin_property.to_owned(),
        };
        Ok((db, HandoffPath(target)))
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        let Target::LinkingObjects {
            target,
            origin_class,
            origin_property,
        } = &path.0
        else {
            return Ok(None);
        };
        let exists = db.read(|s| s.contains(target))?;
        Ok(exists.then(|| {
            LinkingObjects::new(
                db.clone(),
                target.clone(),
                origin_class.clone(),
                origin_property.clone(),
            )
        }))
    }
}

impl ThreadConfined for AnyCollection {
    fn capture(&self) -> CoreResult<(Database, HandoffPath)> {
        match self {
            AnyCollection::List(c) => c.capture(),
            AnyCollection::Set(c) => c.capture(),
            AnyCollection::Results(c) => c.capture(),
            AnyCollection::LinkingObjects(c) => c.capture(),
        }
    }

    fn locate(db: &Database, path: &HandoffPath) -> CoreResult<Option<Self>> {
        Ok(match &path.0 {
            Target::List { .. } => LiveList::locate(db, path)?.map(AnyCollection::List),
            Target::Set { .. } => LiveSet::locate(db, path)?.map(AnyCollection::Set),
            Target::Results { .. } => Results::locate(db, path)?.map(AnyCollection::Results),
            Target::LinkingObjects { .. } => {
                LinkingObjects::locate(db, path)?.map(AnyCollection::LinkingObjects)
            }
            Target::Object(_) | Target::Map { .. } => None,
        })
    }
}

/// Outcome of [`Database::try_resolve`].
#[derive(Debug)]
pub enum Resolution<T> {
    /// The value exists in the resolving handle's view.
    Found(T),
    /// The identity no longer exists there (deleted, or a different store).
    NotFound,
    /// The reference was consumed by an earlier call.
    AlreadyResolved,
}

impl<T> Resolution<T> {
    /// Converts into the value, if found.
    pub fn found(self) -> Option<T> {
        match self {
            Resolution::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// One-shot, sendable capability to re-materialize a value on another thread.
///
/// Creating the reference keeps the source's current version alive; a
/// handle on the same store that resolves it sees at least that version.
/// Dropping an unresolved reference releases the version.
pub struct ThreadSafeReference<T: ThreadConfined> {
    store: Arc<Store>,
    snapshot: Arc<Snapshot>,
    path: HandoffPath,
    resolved: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ThreadConfined> ThreadSafeReference<T> {
    /// Captures `value`.
    ///
    /// Fails with `UnmanagedObject` for drafts and `InvalidatedObject` for
    /// deleted values. Inside a write transaction the reference captures
    /// the last committed version, so a value created by that transaction
    /// resolves only in handles that have seen it committed.
    pub fn new(value: &T) -> CoreResult<Self> {
        let (db, path) = value.capture()?;
        let snapshot = db.pinned()?;
        tracing::trace!(version = %snapshot.version(), "thread safe reference created");
        Ok(Self {
            store: Arc::clone(db.store()),
            snapshot,
            path,
            resolved: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    /// Returns true once the reference has been resolved.
    pub fn is_invalidated(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Returns the version the reference was captured at.
    pub fn version(&self) -> Version {
        self.snapshot.version()
    }

    fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<T: ThreadConfined> std::fmt::Debug for ThreadSafeReference<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSafeReference")
            .field("path", &self.path)
            .field("version", &self.snapshot.version())
            .field("resolved", &self.is_invalidated())
            .finish()
    }
}

impl Database {
    /// Resolves a reference in this handle.
    ///
    /// Returns `Ok(None)` if the value no longer exists here, and
    /// `AlreadyResolved` on every call after the first.
    pub fn resolve<T: ThreadConfined>(&self, reference: &ThreadSafeReference<T>) -> CoreResult<Option<T>> {
        match self.try_resolve(reference)? {
            Resolution::Found(value) => Ok(Some(value)),
            Resolution::NotFound => Ok(None),
            Resolution::AlreadyResolved => Err(CoreError::AlreadyResolved),
        }
    }

    /// Resolves a reference, reporting a consumed reference as a value.
    ///
    /// On the same store, an unpinned handle pins the reference's version
    /// and an older handle advances to it (firing observers). A handle on
    /// another store looks the identity up in its own view.
    pub fn try_resolve<T: ThreadConfined>(
        &self,
        reference: &ThreadSafeReference<T>,
    ) -> CoreResult<Resolution<T>> {
        self.ensure_open()?;
        if !reference.claim() {
            return Ok(Resolution::AlreadyResolved);
        }
        if Arc::ptr_eq(self.store(), &reference.store) {
            self.adopt(&reference.snapshot);
        }
        let found = T::locate(self, &reference.path)?;
        tracing::debug!(
            found = found.is_some(),
            version = %reference.snapshot.version(),
            "thread safe reference resolved"
        );
        Ok(match found {
            Some(value) => Resolution::Found(value),
            None => Resolution::NotFound,
        })
    }
}

/// Reusable, sendable slot holding the identity of a thread-confined value.
///
/// Unlike [`ThreadSafeReference`], reading the slot does not consume it:
/// every `get` re-locates the value in the given handle's current view.
pub struct ThreadSafe<T: ThreadConfined> {
    slot: Mutex<Option<HandoffPath>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ThreadConfined> Default for ThreadSafe<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            _marker: PhantomData,
        }
    }
}

impl<T: ThreadConfined> ThreadSafe<T> {
    /// Creates a slot holding `value`'s identity.
    pub fn new(value: &T) -> CoreResult<Self> {
        let slot = Self::default();
        slot.set(Some(value))?;
        Ok(slot)
    }

    /// Replaces the held identity, or clears it with `None`.
    pub fn set(&self, value: Option<&T>) -> CoreResult<()> {
        let path = match value {
            Some(value) => Some(value.capture()?.1),
            None => None,
        };
        *self.slot.lock() = path;
        Ok(())
    }

    /// Locates the held value in `db`.
    pub fn get(&self, db: &Database) -> CoreResult<Option<T>> {
        let path = self.slot.lock().clone();
        match path {
            Some(path) => T::locate(db, &path),
            None => Ok(None),
        }
    }

    /// Returns true if the slot holds nothing.
    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}
