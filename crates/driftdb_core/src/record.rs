//! Per-object replicated state.
//!
//! Every field kind is a small CRDT keyed by operation stamps:
//!
//! - values are last-writer-wins registers
//! - lists are RGA sequences whose elements are identified by the stamp of
//!   the insert that created them; erasure is permanent
//! - sets are last-writer-wins element sets
//! - maps are last-writer-wins registers per key, with `None` marking erasure
//!
//! Clears record a stamp; everything written before it is hidden.

use crate::schema::{ClassSchema, PropertyKind};
use driftdb_codec::Value;
use driftdb_sync_protocol::{ElementId, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Replicated state of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ObjectRecord {
    /// Stamp of the operation that created the object.
    pub created: Stamp,
    pub fields: BTreeMap<String, Field>,
}

impl ObjectRecord {
    /// Creates a record with every stored property at its default.
    pub fn new(class: &ClassSchema, created: Stamp) -> Self {
        let fields = class
            .properties
            .iter()
            .filter_map(|p| Field::for_kind(&p.kind).map(|f| (p.name.clone(), f)))
            .collect();
        Self { created, fields }
    }
}

/// Replicated state of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Field {
    Value(Register),
    List(ListState),
    Set(SetState),
    Map(MapState),
}

impl Field {
    fn for_kind(kind: &PropertyKind) -> Option<Self> {
        match kind {
            PropertyKind::Value { ty, optional } => {
                let value = if *optional {
                    Value::Null
                } else {
                    ty.default_value()
                };
                Some(Field::Value(Register { value, stamp: None }))
            }
            PropertyKind::List(_) => Some(Field::List(ListState::default())),
            PropertyKind::Set(_) => Some(Field::Set(SetState::default())),
            PropertyKind::Map(_) => Some(Field::Map(MapState::default())),
            PropertyKind::LinkingObjects { .. } => None,
        }
    }
}

/// Last-writer-wins register. A `None` stamp is the schema default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Register {
    pub value: Value,
    pub stamp: Option<Stamp>,
}

impl Register {
    pub fn assign(&mut self, value: Value, stamp: Stamp) -> bool {
        if Some(stamp) > self.stamp {
            self.value = value;
            self.stamp = Some(stamp);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ListElement {
    pub id: ElementId,
    pub value: Value,
    /// Stamp of the last write to `value`.
    pub written: Stamp,
    pub erased: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ListState {
    pub elements: Vec<ListElement>,
    pub cleared_at: Option<Stamp>,
}

impl ListState {
    pub fn is_visible(&self, element: &ListElement) -> bool {
        !element.erased && self.cleared_at.map_or(true, |c| element.id > c)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    /// RGA insert: place after `after`, then skip every following element
    /// with a greater id so concurrent inserts order identically everywhere.
    /// Does nothing if the anchor is missing; callers check with `contains`.
    pub fn insert(&mut self, id: ElementId, after: Option<ElementId>, value: Value) -> bool {
        if self.position(id).is_some() {
            return false;
        }
        let mut pos = match after {
            None => 0,
            Some(anchor) => match self.position(anchor) {
                Some(i) => i + 1,
                None => return false,
            },
        };
        while pos < self.elements.len() && self.elements[pos].id > id {
            pos += 1;
        }
        self.elements.insert(
            pos,
            ListElement {
                id,
                value,
                written: id,
                erased: false,
            },
        );
        true
    }

    pub fn set(&mut self, target: ElementId, value: Value, stamp: Stamp) -> bool {
        match self.elements.iter_mut().find(|e| e.id == target) {
            Some(element) if !element.erased && stamp > element.written => {
                element.value = value;
                element.written = stamp;
                true
            }
            _ => false,
        }
    }

    pub fn erase(&mut self, target: ElementId) -> bool {
        match self.elements.iter_mut().find(|e| e.id == target) {
            Some(element) if !element.erased => {
                element.erased = true;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self, stamp: Stamp) -> bool {
        if Some(stamp) > self.cleared_at {
            self.cleared_at = Some(stamp);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct SetEntry {
    pub added: Option<Stamp>,
    pub removed: Option<Stamp>,
}

/// Entries sorted by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct SetState {
    pub entries: Vec<(Value, SetEntry)>,
    pub cleared_at: Option<Stamp>,
}

impl SetState {
    pub fn is_present(&self, entry: &SetEntry) -> bool {
        match entry.added {
            Some(added) => Some(added) > entry.removed && Some(added) > self.cleared_at,
            None => false,
        }
    }

    fn entry_mut(&mut self, value: &Value) -> &mut SetEntry {
        let index = match self.entries.binary_search_by(|(v, _)| v.cmp(value)) {
            Ok(i) => i,
            Err(i) => {
                self.entries.insert(i, (value.clone(), SetEntry::default()));
                i
            }
        };
        &mut self.entries[index].1
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.entries
            .binary_search_by(|(v, _)| v.cmp(value))
            .map(|i| self.is_present(&self.entries[i].1))
            .unwrap_or(false)
    }

    pub fn insert(&mut self, value: &Value, stamp: Stamp) -> bool {
        let entry = self.entry_mut(value);
        if Some(stamp) > entry.added {
            entry.added = Some(stamp);
            true
        } else {
            false
        }
    }

    pub fn erase(&mut self, value: &Value, stamp: Stamp) -> bool {
        let entry = self.entry_mut(value);
        if Some(stamp) > entry.removed {
            entry.removed = Some(stamp);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self, stamp: Stamp) -> bool {
        if Some(stamp) > self.cleared_at {
            self.cleared_at = Some(stamp);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MapEntry {
    /// `None` once erased.
    pub value: Option<Value>,
    pub stamp: Stamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct MapState {
    pub entries: BTreeMap<String, MapEntry>,
}

impl MapState {
    pub fn assign(&mut self, key: &str, value: Option<Value>, stamp: Stamp) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if stamp <= entry.stamp => false,
            Some(entry) => {
                entry.value = value;
                entry.stamp = stamp;
                true
            }
            None => {
                self.entries
                    .insert(key.to_string(), MapEntry { value, stamp });
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_sync_protocol::ReplicaId;

    fn stamp(clock: u64, replica: u128) -> Stamp {
        Stamp::new(clock, ReplicaId::from_u128(replica))
    }

    fn visible(list: &ListState) -> Vec<Value> {
        list.elements
            .iter()
            .filter(|e| list.is_visible(e))
            .map(|e| e.value.clone())
            .collect()
    }

    #[test]
    fn register_last_writer_wins() {
        let mut reg = Register {
            value: Value::Int(0),
            stamp: None,
        };
        assert!(reg.assign(Value::Int(2), stamp(2, 1)));
        assert!(!reg.assign(Value::Int(1), stamp(1, 9)));
        assert_eq!(reg.value, Value::Int(2));
        assert!(reg.assign(Value::Int(3), stamp(2, 2)));
        assert_eq!(reg.value, Value::Int(3));
    }

    #[test]
    fn concurrent_list_inserts_converge() {
        let head = stamp(1, 1);
        let a = stamp(2, 1);
        let b = stamp(2, 2);

        let mut left = ListState::default();
        left.insert(head, None, Value::from("h"));
        left.insert(a, Some(head), Value::from("a"));
        left.insert(b, Some(head), Value::from("b"));

        let mut right = ListState::default();
        right.insert(head, None, Value::from("h"));
        right.insert(b, Some(head), Value::from("b"));
        right.insert(a, Some(head), Value::from("a"));

        assert_eq!(visible(&left), visible(&right));
        // Greater stamp first.
        assert_eq!(
            visible(&left),
            vec![Value::from("h"), Value::from("b"), Value::from("a")]
        );
    }

    #[test]
    fn insert_is_idempotent() {
        let mut list = ListState::default();
        assert!(list.insert(stamp(1, 1), None, Value::Int(1)));
        assert!(!list.insert(stamp(1, 1), None, Value::Int(1)));
        assert_eq!(list.elements.len(), 1);
    }

    #[test]
    fn erase_beats_set() {
        let id = stamp(1, 1);
        let mut list = ListState::default();
        list.insert(id, None, Value::Int(1));
        list.erase(id);
        assert!(!list.set(id, Value::Int(5), stamp(9, 2)));
        assert!(visible(&list).is_empty());
    }

    #[test]
    fn clear_hides_older_elements_only() {
        let mut list = ListState::default();
        list.insert(stamp(1, 1), None, Value::Int(1));
        list.insert(stamp(3, 1), Some(stamp(1, 1)), Value::Int(3));
        list.clear(stamp(2, 2));
        assert_eq!(visible(&list), vec![Value::Int(3)]);
    }

    #[test]
    fn set_add_remove_by_stamp() {
        let mut set = SetState::default();
        let v = Value::Int(1);
        set.insert(&v, stamp(1, 1));
        assert!(set.contains(&v));
        set.erase(&v, stamp(2, 2));
        assert!(!set.contains(&v));
        set.insert(&v, stamp(3, 1));
        assert!(set.contains(&v));
        set.clear(stamp(4, 1));
        assert!(!set.contains(&v));
    }

    #[test]
    fn map_last_writer_wins_per_key() {
        let mut map = MapState::default();
        assert!(map.assign("k", Some(Value::Int(1)), stamp(2, 1)));
        assert!(!map.assign("k", None, stamp(1, 1)));
        assert!(map.assign("k", None, stamp(3, 1)));
        assert!(map.entries["k"].value.is_none());
    }
}
