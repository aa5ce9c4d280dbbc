//! The (collection kind × element kind) case table.
//!
//! Every collection behavior is checked for every element kind by iterating
//! [`cases`] instead of writing one test per pair.

use chrono::{TimeZone, Utc};
use driftdb_codec::{Decimal128, ObjectId};
use driftdb_core::{
    ClassSchema, CoreError, CoreResult, Database, Object, ObjectDraft, Schema, Value, ValueType,
};
use std::fmt;
use uuid::Uuid;

/// Class holding one collection property per case.
pub const HOLDER: &str = "Holder";

/// Class that object-kind elements link to.
pub const TARGET: &str = "Target";

/// Kind of collection under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Ordered list.
    List,
    /// Unique set.
    Set,
    /// String-keyed map.
    Map,
}

impl CollectionKind {
    /// Every collection kind.
    pub const ALL: [CollectionKind; 3] = [Self::List, Self::Set, Self::Map];

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Set => "set",
            Self::Map => "map",
        }
    }
}

/// Kind of element stored in a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// 64-bit integers.
    Int,
    /// Booleans.
    Bool,
    /// Strings.
    String,
    /// Byte strings.
    Data,
    /// Timestamps.
    Date,
    /// Doubles.
    Double,
    /// Object ids.
    ObjectId,
    /// Decimals.
    Decimal,
    /// UUIDs.
    Uuid,
    /// Links to [`TARGET`] objects.
    Object,
    /// Mixed values.
    Any,
}

impl ElementKind {
    /// Every element kind.
    pub const ALL: [ElementKind; 11] = [
        Self::Int,
        Self::Bool,
        Self::String,
        Self::Data,
        Self::Date,
        Self::Double,
        Self::ObjectId,
        Self::Decimal,
        Self::Uuid,
        Self::Object,
        Self::Any,
    ];

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Data => "data",
            Self::Date => "date",
            Self::Double => "double",
            Self::ObjectId => "object_id",
            Self::Decimal => "decimal",
            Self::Uuid => "uuid",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    /// Declared element type.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int => ValueType::Int,
            Self::Bool => ValueType::Bool,
            Self::String => ValueType::String,
            Self::Data => ValueType::Data,
            Self::Date => ValueType::Date,
            Self::Double => ValueType::Double,
            Self::ObjectId => ValueType::ObjectId,
            Self::Decimal => ValueType::Decimal,
            Self::Uuid => ValueType::Uuid,
            Self::Object => ValueType::Object(TARGET.into()),
            Self::Any => ValueType::Any,
        }
    }

    /// Distinct sample values in ascending order.
    ///
    /// Object samples create [`TARGET`] objects, so `db` must be in a write
    /// transaction for [`ElementKind::Object`].
    pub fn samples(&self, db: &Database) -> CoreResult<Vec<Value>> {
        let values = match self {
            Self::Int => vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            Self::Bool => vec![Value::Bool(false), Value::Bool(true)],
            Self::String => vec!["alpha".into(), "beta".into(), "gamma".into()],
            Self::Data => vec![
                Value::Data(vec![1]),
                Value::Data(vec![2, 2]),
                Value::Data(vec![3, 3, 3]),
            ],
            Self::Date => [0i64, 86_400, 172_800]
                .into_iter()
                .map(|secs| Value::Date(Utc.timestamp_opt(secs, 0).single().unwrap_or_default()))
                .collect(),
            Self::Double => vec![Value::Double(-1.5), Value::Double(0.25), Value::Double(9.75)],
            Self::ObjectId => (1u8..=3)
                .map(|b| Value::ObjectId(ObjectId::from_bytes([b; 12])))
                .collect(),
            Self::Decimal => (1i64..=3)
                .map(|n| Value::Decimal(Decimal128::from_int(n * 100)))
                .collect(),
            Self::Uuid => (1u128..=3)
                .map(|n| Value::Uuid(Uuid::from_u128(n)))
                .collect(),
            Self::Object => {
                let mut links = Vec::new();
                for name in ["t1", "t2", "t3"] {
                    let target = db.add(ObjectDraft::new(TARGET).with("name", name))?;
                    links.push(Value::from(&target));
                }
                links
            }
            Self::Any => vec![Value::Int(7), Value::Bool(true), Value::from("seven")],
        };
        Ok(values)
    }
}

/// One (collection kind, element kind) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Case {
    /// Collection kind.
    pub collection: CollectionKind,
    /// Element kind.
    pub element: ElementKind,
}

/// Observable contents of a case's collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Contents {
    /// List or set elements in read order.
    Elements(Vec<Value>),
    /// Map entries in key order.
    Entries(Vec<(String, Value)>),
}

impl Contents {
    /// Number of elements or entries.
    pub fn len(&self) -> usize {
        match self {
            Contents::Elements(values) => values.len(),
            Contents::Entries(entries) => entries.len(),
        }
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Case {
    /// Property on [`HOLDER`] that stores this case's collection.
    pub fn property(&self) -> String {
        format!("{}_{}", self.collection.name(), self.element.name())
    }

    /// Map key used for the `index`th sample.
    pub fn key(index: usize) -> String {
        format!("k{index}")
    }

    /// Adds `samples` to the owner's collection. Requires a write transaction.
    pub fn fill(&self, owner: &Object, samples: &[Value]) -> CoreResult<()> {
        let property = self.property();
        match self.collection {
            CollectionKind::List => owner.list(&property)?.extend(samples.iter().cloned()),
            CollectionKind::Set => {
                let set = owner.set_collection(&property)?;
                for value in samples {
                    set.insert(value.clone())?;
                }
                Ok(())
            }
            CollectionKind::Map => {
                let map = owner.map(&property)?;
                for (index, value) in samples.iter().enumerate() {
                    map.set(&Self::key(index), value.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Removes the `index`th element (list), the given sample (set) or the
    /// `index`th key (map). Requires a write transaction.
    pub fn remove(&self, owner: &Object, samples: &[Value], index: usize) -> CoreResult<()> {
        let property = self.property();
        match self.collection {
            CollectionKind::List => owner.list(&property)?.remove(index).map(|_| ()),
            CollectionKind::Set => {
                let value = samples.get(index).ok_or(CoreError::IndexOutOfBounds {
                    index,
                    len: samples.len(),
                })?;
                owner.set_collection(&property)?.remove(value).map(|_| ())
            }
            CollectionKind::Map => owner.map(&property)?.remove(&Self::key(index)).map(|_| ()),
        }
    }

    /// Reads the owner's collection.
    pub fn contents(&self, owner: &Object) -> CoreResult<Contents> {
        let property = self.property();
        Ok(match self.collection {
            CollectionKind::List => Contents::Elements(owner.list(&property)?.to_vec()?),
            CollectionKind::Set => Contents::Elements(owner.set_collection(&property)?.to_vec()?),
            CollectionKind::Map => Contents::Entries(owner.map(&property)?.to_vec()?),
        })
    }
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.property())
    }
}

/// Every (collection kind, element kind) pair.
pub fn cases() -> Vec<Case> {
    CollectionKind::ALL
        .into_iter()
        .flat_map(|collection| {
            ElementKind::ALL
                .into_iter()
                .map(move |element| Case {
                    collection,
                    element,
                })
        })
        .collect()
}

/// Schema declaring [`HOLDER`] with one property per case, plus [`TARGET`].
pub fn cases_schema() -> Schema {
    let holder = cases().into_iter().fold(ClassSchema::new(HOLDER), |class, case| {
        let ty = case.element.value_type();
        match case.collection {
            CollectionKind::List => class.list(case.property(), ty),
            CollectionKind::Set => class.set(case.property(), ty),
            CollectionKind::Map => class.map(case.property(), ty),
        }
    });
    Schema::new()
        .class(holder)
        .class(ClassSchema::new(TARGET).field("name", ValueType::String))
}
