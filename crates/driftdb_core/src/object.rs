//! Managed objects and unmanaged drafts.

use crate::collections::{LinkingObjects, LiveList, LiveMap, LiveSet};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::record::Field;
use crate::schema::PropertyKind;
use driftdb_codec::{ObjectKey, RowId, Value};
use driftdb_sync_protocol::OperationKind;
use std::fmt;

/// A live object read through a [`Database`] handle.
///
/// Reads reflect the handle's current version. Once the object is deleted
/// (and the handle has advanced past the delete) or the handle is closed,
/// the object is invalidated and every access fails with
/// `InvalidatedObject`.
#[derive(Clone)]
pub struct Object {
    db: Database,
    key: ObjectKey,
}

impl Object {
    pub(crate) fn new(db: Database, key: ObjectKey) -> Self {
        Self { db, key }
    }

    /// Returns the object's key.
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Returns the object's id.
    pub fn id(&self) -> RowId {
        self.key.id
    }

    /// Returns the object's class name.
    pub fn class(&self) -> &str {
        &self.key.class
    }

    /// Returns the handle this object was read through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns true if the object no longer exists in the handle's view.
    pub fn is_invalidated(&self) -> bool {
        self.db
            .read(|s| !s.contains(&self.key))
            .unwrap_or(true)
    }

    /// Reads a scalar or link property.
    ///
    /// Links to deleted objects read as `Null`.
    pub fn get(&self, property: &str) -> CoreResult<Value> {
        self.db.read(|s| {
            let Some(record) = s.record(&self.key) else {
                return Err(CoreError::InvalidatedObject);
            };
            match record.fields.get(property) {
                Some(Field::Value(register)) => Ok(s.visible_value(&register.value)),
                Some(_) => {
                    let kind = s.schema().property(&self.key.class, property)?;
                    Err(CoreError::type_mismatch(property, "value", kind.kind.describe()))
                }
                None => Err(CoreError::unknown_property(&self.key.class, property)),
            }
        })?
    }

    /// Reads a link property as an object.
    pub fn get_object(&self, property: &str) -> CoreResult<Option<Object>> {
        Ok(match self.get(property)? {
            Value::Link(key) => Some(Object::new(self.db.clone(), key)),
            _ => None,
        })
    }

    /// Writes a scalar or link property.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.db.mutate(
            &self.key,
            OperationKind::SetField {
                property: property.to_owned(),
                value: value.into(),
            },
        )?;
        Ok(())
    }

    fn collection_kind(&self, property: &str) -> CoreResult<PropertyKind> {
        if self.is_invalidated() {
            self.db.ensure_open()?;
            return Err(CoreError::InvalidatedObject);
        }
        self.db.property_kind(&self.key.class, property)
    }

    /// Returns the list stored in `property`.
    pub fn list(&self, property: &str) -> CoreResult<LiveList> {
        match self.collection_kind(property)? {
            PropertyKind::List(_) => Ok(LiveList::new(self.db.clone(), self.key.clone(), property)),
            other => Err(CoreError::type_mismatch(property, "list", other.describe())),
        }
    }

    /// Returns the set stored in `property`.
    pub fn set_collection(&self, property: &str) -> CoreResult<LiveSet> {
        match self.collection_kind(property)? {
            PropertyKind::Set(_) => Ok(LiveSet::new(self.db.clone(), self.key.clone(), property)),
            other => Err(CoreError::type_mismatch(property, "set", other.describe())),
        }
    }

    /// Returns the map stored in `property`.
    pub fn map(&self, property: &str) -> CoreResult<LiveMap> {
        match self.collection_kind(property)? {
            PropertyKind::Map(_) => Ok(LiveMap::new(self.db.clone(), self.key.clone(), property)),
            other => Err(CoreError::type_mismatch(property, "map", other.describe())),
        }
    }

    /// Returns the objects linking here through a declared backlink property.
    pub fn linking_objects(&self, property: &str) -> CoreResult<LinkingObjects> {
        match self.collection_kind(property)? {
            PropertyKind::LinkingObjects {
                origin_class,
                origin_property,
            } => Ok(LinkingObjects::new(
                self.db.clone(),
                self.key.clone(),
                origin_class,
                origin_property,
            )),
            other => Err(CoreError::type_mismatch(
                property,
                "linking objects",
                other.describe(),
            )),
        }
    }

    /// Returns the objects of `origin_class` whose `origin_property` links here.
    pub fn backlinks(&self, origin_class: &str, origin_property: &str) -> CoreResult<LinkingObjects> {
        if self.is_invalidated() {
            self.db.ensure_open()?;
            return Err(CoreError::InvalidatedObject);
        }
        self.db.property_kind(origin_class, origin_property)?;
        Ok(LinkingObjects::new(
            self.db.clone(),
            self.key.clone(),
            origin_class.to_owned(),
            origin_property.to_owned(),
        ))
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.db.same_store(&other.db)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Object").field(&self.key).finish()
    }
}

impl From<&Object> for Value {
    fn from(object: &Object) -> Self {
        Value::Link(object.key.clone())
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Link(object.key)
    }
}

/// Initial contents of one property of a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftValue {
    /// Scalar or link.
    Value(Value),
    /// List elements in order.
    List(Vec<Value>),
    /// Set members.
    Set(Vec<Value>),
    /// Map entries.
    Map(Vec<(String, Value)>),
}

/// An object that has not been added to a database.
///
/// ```
/// use driftdb_core::ObjectDraft;
///
/// let draft = ObjectDraft::new("Dog")
///     .with("name", "Rex")
///     .with_list("tags", ["good", "loud"]);
/// assert_eq!(draft.class(), "Dog");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDraft {
    class: String,
    values: Vec<(String, DraftValue)>,
}

impl ObjectDraft {
    /// Creates an empty draft of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            values: Vec::new(),
        }
    }

    /// Returns the draft's class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Returns the initial value of `property`, if set.
    pub fn value(&self, property: &str) -> Option<&DraftValue> {
        self.values
            .iter()
            .rev()
            .find(|(name, _)| name == property)
            .map(|(_, v)| v)
    }

    /// Sets a scalar or link property.
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values
            .push((property.into(), DraftValue::Value(value.into())));
        self
    }

    /// Sets a list property.
    #[must_use]
    pub fn with_list<V: Into<Value>>(
        mut self,
        property: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.values.push((property.into(), DraftValue::List(values)));
        self
    }

    /// Sets a set property.
    #[must_use]
    pub fn with_set<V: Into<Value>>(
        mut self,
        property: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.values.push((property.into(), DraftValue::Set(values)));
        self
    }

    /// Sets a map property.
    #[must_use]
    pub fn with_map<K: Into<String>, V: Into<Value>>(
        mut self,
        property: impl Into<String>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.values.push((property.into(), DraftValue::Map(entries)));
        self
    }

    pub(crate) fn into_parts(self) -> (String, Vec<(String, DraftValue)>) {
        (self.class, self.values)
    }
}
