use super::{impl_collection, out_of_bounds, with_field};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::{Object, ObjectDraft};
use crate::record::{Field, SetState};
use crate::snapshot::Snapshot;
use driftdb_codec::{ObjectKey, Value};
use driftdb_sync_protocol::OperationKind;
use std::fmt;

/// A set property: distinct values in value order.
///
/// Links compare by object identity. Index-based access follows value
/// order, which is the same on every replica.
#[derive(Clone)]
pub struct LiveSet {
    db: Database,
    owner: ObjectKey,
    property: String,
}

impl LiveSet {
    pub(crate) fn new(db: Database, owner: ObjectKey, property: &str) -> Self {
        Self {
            db,
            owner,
            property: property.to_owned(),
        }
    }

    /// Returns the object owning this set.
    pub fn owner(&self) -> Object {
        Object::new(self.db.clone(), self.owner.clone())
    }

    pub(crate) fn owner_key(&self) -> &ObjectKey {
        &self.owner
    }

    /// Returns the property name.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns the handle this set is read through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns true if the owner was deleted or the handle closed.
    pub fn is_invalidated(&self) -> bool {
        self.db
            .read(|s| !s.contains(&self.owner))
            .unwrap_or(true)
    }

    fn read_set<R>(&self, f: impl FnOnce(&Snapshot, &SetState) -> R) -> CoreResult<R> {
        with_field(&self.db, &self.owner, &self.property, |s, field| match field {
            Field::Set(set) => Ok(f(s, set)),
            _ => Err(CoreError::type_mismatch(&self.property, "set", "non-set field")),
        })
    }

    /// Number of members.
    pub fn len(&self) -> CoreResult<usize> {
        self.read_set(|s, set| s.set_values(set).len())
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Member at `index` in value order.
    pub fn get(&self, index: usize) -> CoreResult<Value> {
        let values = self.to_vec()?;
        let len = values.len();
        values
            .into_iter()
            .nth(index)
            .ok_or_else(|| out_of_bounds(index, len))
    }

    /// All members in value order.
    pub fn to_vec(&self) -> CoreResult<Vec<Value>> {
        self.read_set(|s, set| s.set_values(set))
    }

    /// Iterates over a copy of the members.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Value>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Returns true if `value` is a member.
    pub fn contains(&self, value: &Value) -> CoreResult<bool> {
        self.read_set(|s, set| s.set_contains(set, value))
    }

    /// Linked member objects. Non-link members are skipped.
    pub fn objects(&self) -> CoreResult<Vec<Object>> {
        Ok(self
            .to_vec()?
            .into_iter()
            .filter_map(|v| match v {
                Value::Link(key) => Some(Object::new(self.db.clone(), key)),
                _ => None,
            })
            .collect())
    }

    /// Adds `value`. Returns false if it was already a member.
    pub fn insert(&self, value: impl Into<Value>) -> CoreResult<bool> {
        self.db.ensure_in_write()?;
        let value = value.into();
        if self.contains(&value)? {
            return Ok(false);
        }
        self.db.mutate(
            &self.owner,
            OperationKind::SetInsert {
                property: self.property.clone(),
                value,
            },
        )?;
        Ok(true)
    }

    /// Adds `draft` to the database and inserts a link to it.
    pub fn insert_new(&self, draft: ObjectDraft) -> CoreResult<Object> {
        let object = self.db.add(draft)?;
        self.insert(&object)?;
        Ok(object)
    }

    /// Removes `value`. Returns false if it was not a member.
    pub fn remove(&self, value: &Value) -> CoreResult<bool> {
        self.db.ensure_in_write()?;
        if !self.contains(value)? {
            return Ok(false);
        }
        self.db.mutate(
            &self.owner,
            OperationKind::SetErase {
                property: self.property.clone(),
                value: value.clone(),
            },
        )?;
        Ok(true)
    }

    /// Removes every member.
    pub fn clear(&self) -> CoreResult<()> {
        self.db.mutate(
            &self.owner,
            OperationKind::SetClear {
                property: self.property.clone(),
            },
        )?;
        Ok(())
    }

    fn check_peer(&self, other: &LiveSet) -> CoreResult<()> {
        if !self.db.same_store(&other.db) {
            return Err(CoreError::invalid_operation(
                "sets belong to different stores",
            ));
        }
        if other.is_invalidated() {
            return Err(CoreError::InvalidatedObject);
        }
        Ok(())
    }

    /// Keeps only the members also in `other`. `other` is not modified.
    ///
    /// Recorded as a single operation that every replica evaluates against
    /// the contents of both sets at the time it is applied there.
    pub fn form_intersection(&self, other: &LiveSet) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        self.check_peer(other)?;
        self.db.mutate(
            &self.owner,
            OperationKind::SetIntersect {
                property: self.property.clone(),
                other_object: other.owner.clone(),
                other_property: other.property.clone(),
            },
        )?;
        Ok(())
    }

    /// Adds every member of `other`.
    pub fn form_union(&self, other: &LiveSet) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        self.check_peer(other)?;
        for value in other.to_vec()? {
            self.insert(value)?;
        }
        Ok(())
    }

    /// Removes every member of `other`.
    pub fn subtract(&self, other: &LiveSet) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        self.check_peer(other)?;
        for value in other.to_vec()? {
            self.remove(&value)?;
        }
        Ok(())
    }

    /// Returns true if the sets share a member.
    pub fn intersects(&self, other: &LiveSet) -> CoreResult<bool> {
        let theirs = other.to_vec()?;
        Ok(self.to_vec()?.iter().any(|v| theirs.binary_search(v).is_ok()))
    }

    /// Returns true if every member is also in `other`.
    pub fn is_subset(&self, other: &LiveSet) -> CoreResult<bool> {
        let theirs = other.to_vec()?;
        Ok(self.to_vec()?.iter().all(|v| theirs.binary_search(v).is_ok()))
    }
}

impl_collection!(LiveSet, Value);

impl fmt::Debug for LiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSet")
            .field("owner", &self.owner)
            .field("property", &self.property)
            .finish()
    }
}
