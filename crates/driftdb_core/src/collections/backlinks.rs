use super::{impl_collection, out_of_bounds};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::Object;
use driftdb_codec::ObjectKey;
use std::fmt;

/// Objects of `origin_class` whose `origin_property` links to a target.
///
/// Covers to-one links, lists and sets. Ordered by the origin objects'
/// creation order.
#[derive(Clone)]
pub struct LinkingObjects {
    db: Database,
    target: ObjectKey,
    origin_class: String,
    origin_property: String,
}

impl LinkingObjects {
    pub(crate) fn new(
        db: Database,
        target: ObjectKey,
        origin_class: String,
        origin_property: String,
    ) -> Self {
        Self {
            db,
            target,
            origin_class,
            origin_property,
        }
    }

    pub(crate) fn parts(&self) -> (&ObjectKey, &str, &str) {
        (&self.target, &self.origin_class, &self.origin_property)
    }

    /// Returns the object being linked to.
    pub fn target(&self) -> Object {
        Object::new(self.db.clone(), self.target.clone())
    }

    /// Returns the handle this collection is read through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns true if the target was deleted or the handle closed.
    pub fn is_invalidated(&self) -> bool {
        self.db
            .read(|s| !s.contains(&self.target))
            .unwrap_or(true)
    }

    fn keys(&self) -> CoreResult<Vec<ObjectKey>> {
        self.db.read(|s| {
            if !s.contains(&self.target) {
                return Err(CoreError::InvalidatedObject);
            }
            Ok(s.keys_of(&self.origin_class)
                .into_iter()
                .filter(|key| {
                    s.field(key, &self.origin_property)
                        .is_some_and(|field| s.field_links_to(field, &self.target))
                })
                .collect())
        })?
    }

    /// Number of linking objects.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns true if nothing links here.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Linking object at `index`.
    pub fn get(&self, index: usize) -> CoreResult<Object> {
        let keys = self.keys()?;
        let len = keys.len();
        keys.into_iter()
            .nth(index)
            .map(|key| Object::new(self.db.clone(), key))
            .ok_or_else(|| out_of_bounds(index, len))
    }

    /// All linking objects.
    pub fn to_vec(&self) -> CoreResult<Vec<Object>> {
        Ok(self
            .keys()?
            .into_iter()
            .map(|key| Object::new(self.db.clone(), key))
            .collect())
    }

    /// Iterates over the linking objects.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Object>> {
        Ok(self.to_vec()?.into_iter())
    }
}

impl_collection!(LinkingObjects, Object);

impl fmt::Debug for LinkingObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkingObjects")
            .field("target", &self.target)
            .field("origin_class", &self.origin_class)
            .field("origin_property", &self.origin_property)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectDraft;
    use crate::schema::{ClassSchema, Schema};
    use crate::{Config, Registry};
    use driftdb_codec::ValueType;

    #[test]
    fn list_and_set_links_are_found() {
        let registry = Registry::new();
        let schema = Schema::new()
            .class(
                ClassSchema::new("Owner")
                    .list("dogs", ValueType::Object("Dog".into()))
                    .set("favourites", ValueType::Object("Dog".into())),
            )
            .class(ClassSchema::new("Dog").backlinks("owners", "Owner", "dogs"));
        let db = Database::open(&registry, Config::in_memory("backlinks").schema(schema)).unwrap();

        let (a, rex) = db
            .write(|db| {
                let rex = db.add(ObjectDraft::new("Dog"))?;
                let a = db.add(ObjectDraft::new("Owner"))?;
                let b = db.add(ObjectDraft::new("Owner"))?;
                a.list("dogs")?.push(&rex)?;
                b.set_collection("favourites")?.insert(&rex)?;
                Ok((a, rex))
            })
            .unwrap();

        let owners = rex.linking_objects("owners").unwrap();
        assert_eq!(owners.to_vec().unwrap(), vec![a.clone()]);
        assert_eq!(rex.backlinks("Owner", "favourites").unwrap().len().unwrap(), 1);

        db.write(|db| db.delete(&a)).unwrap();
        assert!(owners.is_empty().unwrap());

        db.write(|db| db.delete(&rex)).unwrap();
        assert!(owners.is_invalidated());
        assert!(matches!(owners.len(), Err(CoreError::InvalidatedObject)));
    }
}
