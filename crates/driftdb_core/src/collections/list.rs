use super::{bounded, impl_collection, out_of_bounds, with_field};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::{Object, ObjectDraft};
use crate::record::{Field, ListState};
use crate::snapshot::Snapshot;
use driftdb_codec::{ObjectKey, Value};
use driftdb_sync_protocol::{ElementId, OperationKind};
use std::fmt;
use std::ops::RangeBounds;

/// An ordered list property. Duplicates are allowed.
///
/// Each element has a stable identity (the stamp of the insert that created
/// it), so concurrent inserts from different replicas interleave
/// deterministically and a removal on one replica always wins over a
/// concurrent `set` of the same element.
#[derive(Clone)]
pub struct LiveList {
    db: Database,
    owner: ObjectKey,
    property: String,
}

impl LiveList {
    pub(crate) fn new(db: Database, owner: ObjectKey, property: &str) -> Self {
        Self {
            db,
            owner,
            property: property.to_owned(),
        }
    }

    /// Returns the object owning this list.
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

    /// Returns the handle this list is read through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns true if the owner was deleted or the handle closed.
    pub fn is_invalidated(&self) -> bool {
        self.db
            .read(|s| !s.contains(&self.owner))
            .unwrap_or(true)
    }

    fn read_list<R>(&self, f: impl FnOnce(&Snapshot, &ListState) -> R) -> CoreResult<R> {
        with_field(&self.db, &self.owner, &self.property, |s, field| match field {
            Field::List(list) => Ok(f(s, list)),
            _ => Err(CoreError::type_mismatch(&self.property, "list", "non-list field")),
        })
    }

    fn element_ids(&self) -> CoreResult<Vec<ElementId>> {
        self.read_list(|s, list| s.list_elements(list).iter().map(|e| e.id).collect())
    }

    /// Number of elements.
    pub fn len(&self) -> CoreResult<usize> {
        self.read_list(|s, list| s.list_elements(list).len())
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> CoreResult<Value> {
        self.read_list(|s, list| {
            let elements = s.list_elements(list);
            elements
                .get(index)
                .map(|e| e.value.clone())
                .ok_or_else(|| out_of_bounds(index, elements.len()))
        })?
    }

    /// All elements in order.
    pub fn to_vec(&self) -> CoreResult<Vec<Value>> {
        self.read_list(|s, list| s.list_values(list))
    }

    /// Iterates over a copy of the elements.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Value>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Index of the first element equal to `value`.
    pub fn index_of(&self, value: &Value) -> CoreResult<Option<usize>> {
        Ok(self.to_vec()?.iter().position(|v| v == value))
    }

    /// Linked objects in order. Non-link elements are skipped.
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

    fn insert_after(&self, after: Option<ElementId>, value: Value) -> CoreResult<ElementId> {
        self.db.mutate(
            &self.owner,
            OperationKind::ListInsert {
                property: self.property.clone(),
                after,
                value,
            },
        )
    }

    /// Appends a value.
    pub fn push(&self, value: impl Into<Value>) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        let last = self.element_ids()?.last().copied();
        self.insert_after(last, value.into())?;
        Ok(())
    }

    /// Appends every value in order.
    pub fn extend<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        let mut after = self.element_ids()?.last().copied();
        for value in values {
            after = Some(self.insert_after(after, value.into())?);
        }
        Ok(())
    }

    /// Inserts a value so that it ends up at `index`.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        let ids = self.element_ids()?;
        if index > ids.len() {
            return Err(out_of_bounds(index, ids.len()));
        }
        let after = index.checked_sub(1).map(|i| ids[i]);
        self.insert_after(after, value.into())?;
        Ok(())
    }

    /// Replaces the element at `index`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        let ids = self.element_ids()?;
        let element = *ids.get(index).ok_or_else(|| out_of_bounds(index, ids.len()))?;
        self.db.mutate(
            &self.owner,
            OperationKind::ListSet {
                property: self.property.clone(),
                element,
                value: value.into(),
            },
        )?;
        Ok(())
    }

    fn erase(&self, element: ElementId) -> CoreResult<()> {
        self.db.mutate(
            &self.owner,
            OperationKind::ListErase {
                property: self.property.clone(),
                element,
            },
        )?;
        Ok(())
    }

    /// Removes and returns the element at `index`.
    pub fn remove(&self, index: usize) -> CoreResult<Value> {
        self.db.ensure_in_write()?;
        let (element, value) = self.read_list(|s, list| {
            let elements = s.list_elements(list);
            elements
                .get(index)
                .map(|e| (e.id, e.value.clone()))
                .ok_or_else(|| out_of_bounds(index, elements.len()))
        })??;
        self.erase(element)?;
        Ok(value)
    }

    /// Removes the elements in `range`.
    pub fn remove_range(&self, range: impl RangeBounds<usize>) -> CoreResult<()> {
        self.db.ensure_in_write()?;
        let ids = self.element_ids()?;
        let range = bounded(range, ids.len())?;
        for element in &ids[range] {
            self.erase(*element)?;
        }
        Ok(())
    }

    /// Removes every element.
    pub fn clear(&self) -> CoreResult<()> {
        self.db.mutate(
            &self.owner,
            OperationKind::ListClear {
                property: self.property.clone(),
            },
        )?;
        Ok(())
    }

    /// Adds `draft` to the database and appends a link to it.
    pub fn push_new(&self, draft: ObjectDraft) -> CoreResult<Object> {
        let object = self.db.add(draft)?;
        self.push(&object)?;
        Ok(object)
    }
}

impl_collection!(LiveList, Value);

impl fmt::Debug for LiveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveList")
            .field("owner", &self.owner)
            .field("property", &self.property)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassSchema, Schema};
    use crate::{Config, Registry};
    use driftdb_codec::ValueType;

    fn open(registry: &Registry) -> Database {
        let schema = Schema::new()
            .class(
                ClassSchema::new("Owner")
                    .list("ints", ValueType::Int)
                    .list("dogs", ValueType::Object("Dog".into())),
            )
            .class(ClassSchema::new("Dog").field("name", ValueType::String));
        Database::open(registry, Config::in_memory("lists").schema(schema)).unwrap()
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Int(v)).collect()
    }

    #[test]
    fn append_twice_then_remove_range() {
        let registry = Registry::new();
        let db = open(&registry);
        let owner = db.write(|db| db.add(ObjectDraft::new("Owner"))).unwrap();
        let list = owner.list("ints").unwrap();

        db.write(|_| {
            list.extend([1_i64, 2, 3])?;
            list.extend([1_i64, 2, 3])
        })
        .unwrap();
        assert_eq!(list.len().unwrap(), 6);
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2, 3, 1, 2, 3]));

        db.write(|_| list.remove_range(3..=5)).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2, 3]));
    }

    #[test]
    fn insert_set_remove() {
        let registry = Registry::new();
        let db = open(&registry);
        let owner = db.write(|db| db.add(ObjectDraft::new("Owner"))).unwrap();
        let list = owner.list("ints").unwrap();

        db.write(|_| {
            list.push(1_i64)?;
            list.push(3_i64)?;
            list.insert(1, 2_i64)?;
            list.insert(0, 0_i64)?;
            list.set(3, 30_i64)?;
            assert_eq!(list.remove(0)?, Value::Int(0));
            Ok(())
        })
        .unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2, 30]));
        assert_eq!(list.index_of(&Value::Int(30)).unwrap(), Some(2));
    }

    #[test]
    fn mutation_outside_write_fails() {
        let registry = Registry::new();
        let db = open(&registry);
        let owner = db.write(|db| db.add(ObjectDraft::new("Owner"))).unwrap();
        let list = owner.list("ints").unwrap();
        assert!(matches!(
            list.push(1_i64),
            Err(CoreError::WrongTransactionState { .. })
        ));
        assert!(matches!(list.clear(), Err(CoreError::WrongTransactionState { .. })));
    }

    #[test]
    fn out_of_bounds_and_type_errors() {
        let registry = Registry::new();
        let db = open(&registry);
        let owner = db.write(|db| db.add(ObjectDraft::new("Owner"))).unwrap();
        let list = owner.list("ints").unwrap();
        assert!(matches!(list.get(0), Err(CoreError::IndexOutOfBounds { index: 0, len: 0 })));

        db.begin_write().unwrap();
        assert!(matches!(list.push("nope"), Err(CoreError::TypeMismatch { .. })));
        assert!(matches!(list.insert(2, 1_i64), Err(CoreError::IndexOutOfBounds { .. })));
        db.cancel_write().unwrap();
    }

    #[test]
    fn deleted_objects_leave_object_lists() {
        let registry = Registry::new();
        let db = open(&registry);
        let (owner, rex) = db
            .write(|db| {
                let owner = db.add(ObjectDraft::new("Owner"))?;
                let dogs = owner.list("dogs")?;
                let rex = dogs.push_new(ObjectDraft::new("Dog").with("name", "Rex"))?;
                dogs.push_new(ObjectDraft::new("Dog").with("name", "Fido"))?;
                Ok((owner, rex))
            })
            .unwrap();
        let dogs = owner.list("dogs").unwrap();
        assert_eq!(dogs.len().unwrap(), 2);

        db.write(|db| db.delete(&rex)).unwrap();
        let names: Vec<Value> = dogs
            .objects()
            .unwrap()
            .iter()
            .map(|d| d.get("name").unwrap())
            .collect();
        assert_eq!(names, vec![Value::from("Fido")]);
    }

    #[test]
    fn list_of_deleted_owner_is_invalidated() {
        let registry = Registry::new();
        let db = open(&registry);
        let owner = db.write(|db| db.add(ObjectDraft::new("Owner"))).unwrap();
        let list = owner.list("ints").unwrap();
        db.write(|db| db.delete(&owner)).unwrap();
        assert!(list.is_invalidated());
        assert!(matches!(list.len(), Err(CoreError::InvalidatedObject)));
    }
}
