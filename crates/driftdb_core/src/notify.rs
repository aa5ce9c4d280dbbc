//! Change notifications for database handles.

use crate::snapshot::Snapshot;
use crate::types::Version;
use driftdb_codec::ObjectKey;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Objects that changed when a handle advanced between two versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Version the handle was at.
    pub from: Version,
    /// Version the handle advanced to.
    pub to: Version,
    /// Objects that exist in `to` but not in `from`.
    pub inserted: Vec<ObjectKey>,
    /// Objects present in both whose contents changed.
    pub modified: Vec<ObjectKey>,
    /// Objects present in `from` but not in `to`.
    pub deleted: Vec<ObjectKey>,
}

impl ChangeSet {
    pub(crate) fn between(old: &Snapshot, new: &Snapshot) -> Self {
        let mut changes = Self {
            from: old.version,
            to: new.version,
            inserted: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
        };
        for (key, record) in &new.objects {
            match old.objects.get(key) {
                None => changes.inserted.push(key.clone()),
                Some(previous) if !Arc::ptr_eq(previous, record) && previous != record => {
                    changes.modified.push(key.clone());
                }
                Some(_) => {}
            }
        }
        changes.deleted = old
            .objects
            .keys()
            .filter(|key| !new.objects.contains_key(*key))
            .cloned()
            .collect();
        changes
    }

    /// Returns true if no object changed.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

struct Observer {
    id: u64,
    callback: RefCell<Box<dyn FnMut(&ChangeSet)>>,
}

#[derive(Default)]
pub(crate) struct Observers {
    next_id: Cell<u64>,
    entries: RefCell<Vec<Rc<Observer>>>,
}

impl Observers {
    pub fn add(self: &Rc<Self>, callback: Box<dyn FnMut(&ChangeSet)>) -> NotificationToken {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().push(Rc::new(Observer {
            id,
            callback: RefCell::new(callback),
        }));
        NotificationToken {
            observers: Rc::downgrade(self),
            id,
        }
    }

    fn remove(&self, id: u64) {
        self.entries.borrow_mut().retain(|o| o.id != id);
    }

    fn is_registered(&self, id: u64) -> bool {
        self.entries.borrow().iter().any(|o| o.id == id)
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Calls every observer. Callbacks may add or remove observers; an
    /// observer that is already running (re-entrant refresh) is skipped.
    pub fn notify(&self, changes: &ChangeSet) {
        let snapshot: Vec<Rc<Observer>> = self.entries.borrow().clone();
        for observer in snapshot {
            if !self.is_registered(observer.id) {
                continue;
            }
            if let Ok(mut callback) = observer.callback.try_borrow_mut() {
                callback(changes);
            }
        }
    }
}

/// Keeps an observer registered. Dropping the token unregisters it.
#[must_use = "the observer is removed when the token is dropped"]
pub struct NotificationToken {
    observers: Weak<Observers>,
    id: u64,
}

impl NotificationToken {
    /// Unregisters the observer now.
    pub fn invalidate(self) {}
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.remove(self.id);
        }
    }
}

impl std::fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationToken").field("id", &self.id).finish()
    }
}
