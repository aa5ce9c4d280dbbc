use super::{Collection, LinkingObjects, LiveList, LiveSet, Results};
use crate::error::CoreResult;
use driftdb_codec::Value;

/// Any collection kind behind one type.
///
/// Objects are exposed as `Value::Link` so every variant shares the element
/// type.
#[derive(Clone, Debug)]
pub enum AnyCollection {
    /// A list property.
    List(LiveList),
    /// A set property.
    Set(LiveSet),
    /// Query results.
    Results(Results),
    /// Backlinks.
    LinkingObjects(LinkingObjects),
}

fn links(objects: Vec<crate::Object>) -> Vec<Value> {
    objects.into_iter().map(Value::from).collect()
}

impl Collection for AnyCollection {
    type Item = Value;

    fn len(&self) -> CoreResult<usize> {
        match self {
            AnyCollection::List(c) => c.len(),
            AnyCollection::Set(c) => c.len(),
            AnyCollection::Results(c) => c.len(),
            AnyCollection::LinkingObjects(c) => c.len(),
        }
    }

    fn get(&self, index: usize) -> CoreResult<Value> {
        match self {
            AnyCollection::List(c) => c.get(index),
            AnyCollection::Set(c) => c.get(index),
            AnyCollection::Results(c) => c.get(index).map(Value::from),
            AnyCollection::LinkingObjects(c) => c.get(index).map(Value::from),
        }
    }

    fn to_vec(&self) -> CoreResult<Vec<Value>> {
        match self {
            AnyCollection::List(c) => c.to_vec(),
            AnyCollection::Set(c) => c.to_vec(),
            AnyCollection::Results(c) => c.to_vec().map(links),
            AnyCollection::LinkingObjects(c) => c.to_vec().map(links),
        }
    }

    fn is_invalidated(&self) -> bool {
        match self {
            AnyCollection::List(c) => c.is_invalidated(),
            AnyCollection::Set(c) => c.is_invalidated(),
            AnyCollection::Results(c) => c.is_invalidated(),
            AnyCollection::LinkingObjects(c) => c.is_invalidated(),
        }
    }
}

impl From<LiveList> for AnyCollection {
    fn from(list: LiveList) -> Self {
        AnyCollection::List(list)
    }
}

impl From<LiveSet> for AnyCollection {
    fn from(set: LiveSet) -> Self {
        AnyCollection::Set(set)
    }
}

impl From<Results> for AnyCollection {
    fn from(results: Results) -> Self {
        AnyCollection::Results(results)
    }
}

impl From<LinkingObjects> for AnyCollection {
    fn from(links: LinkingObjects) -> Self {
        AnyCollection::LinkingObjects(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectDraft;
    use crate::schema::{ClassSchema, Schema};
    use crate::{Config, Database, Registry};
    use driftdb_codec::ValueType;

    fn count_all(collections: &[AnyCollection]) -> Vec<usize> {
        collections.iter().map(|c| c.len().unwrap()).collect()
    }

    #[test]
    fn every_variant_counts_and_indexes() {
        let registry = Registry::new();
        let schema = Schema::new().class(
            ClassSchema::new("Node")
                .list("next", ValueType::Object("Node".into()))
                .set("tags", ValueType::String)
                .backlinks("prev", "Node", "next"),
        );
        let db = Database::open(&registry, Config::in_memory("any").schema(schema)).unwrap();
        let (a, b) = db
            .write(|db| {
                let a = db.add(ObjectDraft::new("Node").with_set("tags", ["x", "y"]))?;
                let b = db.add(ObjectDraft::new("Node"))?;
                a.list("next")?.push(&b)?;
                Ok((a, b))
            })
            .unwrap();

        let collections: Vec<AnyCollection> = vec![
            a.list("next").unwrap().into(),
            a.set_collection("tags").unwrap().into(),
            db.objects("Node").unwrap().into(),
            b.linking_objects("prev").unwrap().into(),
        ];
        assert_eq!(count_all(&collections), [1, 2, 2, 1]);
        assert_eq!(collections[0].get(0).unwrap(), Value::from(&b));
        assert_eq!(collections[3].to_vec().unwrap(), vec![Value::from(&a)]);
        assert!(collections.iter().all(|c| !c.is_invalidated()));
    }
}
