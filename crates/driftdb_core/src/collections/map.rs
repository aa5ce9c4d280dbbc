use super::{impl_collection, out_of_bounds, with_field};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::Object;
use crate::record::{Field, MapState};
use crate::snapshot::Snapshot;
use driftdb_codec::{ObjectKey, Value};
use driftdb_sync_protocol::OperationKind;
use std::fmt;

/// A string-keyed map property.
///
/// Keys iterate in sorted order. `Null` is a storable value distinct from
/// an absent key; a link to a deleted object reads as `Null`.
#[derive(Clone)]
pub struct LiveMap {
    db: Database,
    owner: ObjectKey,
    property: String,
}

impl LiveMap {
    pub(crate) fn new(db: Database, owner: ObjectKey, property: &str) -> Self {
        Self {
            db,
            owner,
            property: property.to_owned(),
        }
    }

    /// Returns the object owning this map.
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

    /// Returns the handle this map is read through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns true if the owner was deleted or the handle closed.
    pub fn is_invalidated(&self) -> bool {
        self.db
            .read(|s| !s.contains(&self.owner))
            .unwrap_or(true)
    }

    fn read_map<R>(&self, f: impl FnOnce(&Snapshot, &MapState) -> R) -> CoreResult<R> {
        with_field(&self.db, &self.owner, &self.property, |s, field| match field {
            Field::Map(map) => Ok(f(s, map)),
            _ => Err(CoreError::type_mismatch(&self.property, "map", "non-map field")),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> CoreResult<usize> {
        self.read_map(|s, map| s.map_entries(map).len())
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Value stored under `key`.
    pub fn get_key(&self, key: &str) -> CoreResult<Option<Value>> {
        self.read_map(|s, map| {
            map.entries
                .get(key)
                .and_then(|entry| entry.value.as_ref())
                .map(|value| s.visible_value(value))
        })
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &str) -> CoreResult<bool> {
        Ok(self.get_key(key)?.is_some())
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> CoreResult<Vec<String>> {
        Ok(self.to_vec()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Values in key order.
    pub fn values(&self) -> CoreResult<Vec<Value>> {
        Ok(self.to_vec()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Entry at `index` in key order.
    pub fn get(&self, index: usize) -> CoreResult<(String, Value)> {
        let entries = self.to_vec()?;
        let len = entries.len();
        entries
            .into_iter()
            .nth(index)
            .ok_or_else(|| out_of_bounds(index, len))
    }

    /// All entries in key order.
    pub fn to_vec(&self) -> CoreResult<Vec<(String, Value)>> {
        self.read_map(|s, map| s.map_entries(map))
    }

    /// Iterates over a copy of the entries.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<(String, Value)>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Inserts or replaces the value under `key`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.db.mutate(
            &self.owner,
            OperationKind::MapSet {
                property: self.property.clone(),
                key: key.to_owned(),
                value: value.into(),
            },
        )?;
        Ok(())
    }

    /// Sets `key` to `value`, or removes it when `value` is `None`.
    pub fn assign(&self, key: &str, value: Option<Value>) -> CoreResult<()> {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key).map(|_| ()),
        }
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&self, key: &str) -> CoreResult<Option<Value>> {
        self.db.ensure_in_write()?;
        let previous = self.get_key(key)?;
        if previous.is_some() {
            self.db.mutate(
                &self.owner,
                OperationKind::MapErase {
                    property: self.property.clone(),
                    key: key.to_owned(),
                },
            )?;
        }
        Ok(previous)
    }

    /// Removes every entry.
    pub fn clear(&self) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        for key in self.keys()? {
            self.remove(&key)?;
        }
        Ok(())
    }
}

impl_collection!(LiveMap, (String, Value));

impl fmt::Debug for LiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveMap")
            .field("owner", &self.owner)
            .field("property", &self.property)
            .finish()
    }
}
