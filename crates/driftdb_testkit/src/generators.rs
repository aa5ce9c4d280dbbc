//! Property-based test generators using proptest.
//!
//! Provides strategies for values of every scalar kind and for edit scripts
//! replayed against live collections.

use chrono::{TimeZone, Utc};
use driftdb_codec::{Decimal128, ObjectId, RowId};
use driftdb_core::{CoreResult, LiveList, LiveMap, LiveSet, Value, ValueType};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for row ids.
pub fn row_id_strategy() -> impl Strategy<Value = RowId> {
    any::<u128>().prop_map(RowId::from_u128)
}

/// Strategy for non-null values of a scalar type.
///
/// `Any` mixes ints, strings and bools. Object types have no scalar values
/// and yield `Null`.
pub fn value_strategy(ty: &ValueType) -> BoxedStrategy<Value> {
    match ty {
        ValueType::Int => any::<i64>().prop_map(Value::Int).boxed(),
        ValueType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        ValueType::String => "[a-z]{0,8}".prop_map(Value::String).boxed(),
        ValueType::Data => prop::collection::vec(any::<u8>(), 0..16)
            .prop_map(Value::Data)
            .boxed(),
        ValueType::Date => (0i64..4_000_000_000)
            .prop_map(|secs| Value::Date(Utc.timestamp_opt(secs, 0).single().unwrap_or_default()))
            .boxed(),
        ValueType::Double => (-1.0e9f64..1.0e9).prop_map(Value::Double).boxed(),
        ValueType::ObjectId => prop::array::uniform12(any::<u8>())
            .prop_map(|bytes| Value::ObjectId(ObjectId::from_bytes(bytes)))
            .boxed(),
        ValueType::Decimal => any::<i64>()
            .prop_map(|n| Value::Decimal(Decimal128::from_int(n)))
            .boxed(),
        ValueType::Uuid => any::<u128>()
            .prop_map(|n| Value::Uuid(Uuid::from_u128(n)))
            .boxed(),
        ValueType::Any => prop_oneof![
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,8}".prop_map(Value::String),
            any::<bool>().prop_map(Value::Bool),
        ]
        .boxed(),
        ValueType::Object(_) => Just(Value::Null).boxed(),
    }
}

/// One edit of an integer list. Indices are reduced modulo the list length
/// when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEdit {
    /// Append.
    Push(i64),
    /// Insert before an index.
    Insert(usize, i64),
    /// Replace an element.
    Set(usize, i64),
    /// Remove an element.
    Remove(usize),
    /// Remove everything.
    Clear,
}

/// Strategy for list edits, clears kept rare.
pub fn list_edit_strategy() -> impl Strategy<Value = ListEdit> {
    prop_oneof![
        4 => any::<i64>().prop_map(ListEdit::Push),
        3 => (any::<usize>(), any::<i64>()).prop_map(|(i, v)| ListEdit::Insert(i, v)),
        2 => (any::<usize>(), any::<i64>()).prop_map(|(i, v)| ListEdit::Set(i, v)),
        3 => any::<usize>().prop_map(ListEdit::Remove),
        1 => Just(ListEdit::Clear),
    ]
}

/// Applies an edit. Requires a write transaction.
pub fn apply_list_edit(list: &LiveList, edit: &ListEdit) -> CoreResult<()> {
    let len = list.len()?;
    match *edit {
        ListEdit::Push(v) => list.push(v),
        ListEdit::Insert(i, v) => list.insert(i % (len + 1), v),
        ListEdit::Set(i, v) if len > 0 => list.set(i % len, v),
        ListEdit::Remove(i) if len > 0 => list.remove(i % len).map(|_| ()),
        ListEdit::Clear => list.clear(),
        ListEdit::Set(..) | ListEdit::Remove(_) => Ok(()),
    }
}

/// One edit of an integer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetEdit {
    /// Insert a value.
    Insert(i64),
    /// Remove a value.
    Remove(i64),
    /// Remove everything.
    Clear,
}

/// Strategy for set edits over a small value range so edits collide.
pub fn set_edit_strategy() -> impl Strategy<Value = SetEdit> {
    prop_oneof![
        4 => (0i64..8).prop_map(SetEdit::Insert),
        3 => (0i64..8).prop_map(SetEdit::Remove),
        1 => Just(SetEdit::Clear),
    ]
}

/// Applies an edit. Requires a write transaction.
pub fn apply_set_edit(set: &LiveSet, edit: &SetEdit) -> CoreResult<()> {
    match *edit {
        SetEdit::Insert(v) => set.insert(v).map(|_| ()),
        SetEdit::Remove(v) => set.remove(&Value::Int(v)).map(|_| ()),
        SetEdit::Clear => set.clear(),
    }
}

/// One edit of an integer map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapEdit {
    /// Upsert a key.
    Set(String, i64),
    /// Remove a key.
    Remove(String),
}

/// Strategy for map edits over a few keys so edits collide.
pub fn map_edit_strategy() -> impl Strategy<Value = MapEdit> {
    let key = "[a-d]";
    prop_oneof![
        3 => (key, any::<i64>()).prop_map(|(k, v)| MapEdit::Set(k, v)),
        1 => key.prop_map(MapEdit::Remove),
    ]
}

/// Applies an edit. Requires a write transaction.
pub fn apply_map_edit(map: &LiveMap, edit: &MapEdit) -> CoreResult<()> {
    match edit {
        MapEdit::Set(key, v) => map.set(key, *v),
        MapEdit::Remove(key) => map.remove(key).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn scalar_strategies_produce_accepted_values() {
        let mut runner = TestRunner::default();
        for ty in [
            ValueType::Int,
            ValueType::Bool,
            ValueType::String,
            ValueType::Data,
            ValueType::Date,
            ValueType::Double,
            ValueType::ObjectId,
            ValueType::Decimal,
            ValueType::Uuid,
            ValueType::Any,
        ] {
            for _ in 0..16 {
                let value = value_strategy(&ty).new_tree(&mut runner).unwrap().current();
                assert!(ty.accepts(&value), "{ty} rejected {value:?}");
            }
        }
    }
}
