//! Sync operations.

use crate::clock::{ReplicaId, Stamp};
use driftdb_codec::{ObjectKey, Value};
use serde::{Deserialize, Serialize};

/// Identity of a list element: the stamp of the insert that created it.
pub type ElementId = Stamp;

/// What a sync operation does to its target object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Creates the object with default field values.
    CreateObject,
    /// Deletes the object. Wins over every concurrent mutation of it.
    DeleteObject,
    /// Assigns a scalar or link field.
    SetField {
        /// Property name.
        property: String,
        /// New value.
        value: Value,
    },
    /// Inserts a list element after `after` (`None` = at the head).
    ListInsert {
        /// Property name.
        property: String,
        /// Element the new one follows.
        after: Option<ElementId>,
        /// Inserted value.
        value: Value,
    },
    /// Replaces the value of an existing list element.
    ListSet {
        /// Property name.
        property: String,
        /// Target element.
        element: ElementId,
        /// New value.
        value: Value,
    },
    /// Removes a list element.
    ListErase {
        /// Property name.
        property: String,
        /// Target element.
        element: ElementId,
    },
    /// Removes every list element inserted before this operation.
    ListClear {
        /// Property name.
        property: String,
    },
    /// Adds a value to a set.
    SetInsert {
        /// Property name.
        property: String,
        /// Added value.
        value: Value,
    },
    /// Removes a value from a set.
    SetErase {
        /// Property name.
        property: String,
        /// Removed value.
        value: Value,
    },
    /// Keeps only the values also present in another set.
    SetIntersect {
        /// Property name of the mutated set.
        property: String,
        /// Object owning the other set.
        other_object: ObjectKey,
        /// Property name of the other set.
        other_property: String,
    },
    /// Removes every set value added before this operation.
    SetClear {
        /// Property name.
        property: String,
    },
    /// Inserts or replaces a map entry.
    MapSet {
        /// Property name.
        property: String,
        /// Entry key.
        key: String,
        /// Entry value (may be `Null`).
        value: Value,
    },
    /// Removes a map entry.
    MapErase {
        /// Property name.
        property: String,
        /// Entry key.
        key: String,
    },
}

impl OperationKind {
    /// Returns the property this operation touches, if any.
    pub fn property(&self) -> Option<&str> {
        match self {
            OperationKind::CreateObject | OperationKind::DeleteObject => None,
            OperationKind::SetField { property, .. }
            | OperationKind::ListInsert { property, .. }
            | OperationKind::ListSet { property, .. }
            | OperationKind::ListErase { property, .. }
            | OperationKind::ListClear { property }
            | OperationKind::SetInsert { property, .. }
            | OperationKind::SetErase { property, .. }
            | OperationKind::SetIntersect { property, .. }
            | OperationKind::SetClear { property }
            | OperationKind::MapSet { property, .. }
            | OperationKind::MapErase { property, .. } => Some(property),
        }
    }

    /// Returns a short name for logs and tooling.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::CreateObject => "create",
            OperationKind::DeleteObject => "delete",
            OperationKind::SetField { .. } => "set_field",
            OperationKind::ListInsert { .. } => "list_insert",
            OperationKind::ListSet { .. } => "list_set",
            OperationKind::ListErase { .. } => "list_erase",
            OperationKind::ListClear { .. } => "list_clear",
            OperationKind::SetInsert { .. } => "set_insert",
            OperationKind::SetErase { .. } => "set_erase",
            OperationKind::SetIntersect { .. } => "set_intersect",
            OperationKind::SetClear { .. } => "set_clear",
            OperationKind::MapSet { .. } => "map_set",
            OperationKind::MapErase { .. } => "map_erase",
        }
    }
}

/// A replicated mutation.
///
/// The stamp is unique per operation: a replica never issues the same clock
/// twice, so `(clock, replica)` identifies the operation everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Lamport stamp of the operation.
    pub stamp: Stamp,
    /// Target object.
    pub object: ObjectKey,
    /// What the operation does.
    pub kind: OperationKind,
}

impl SyncOperation {
    /// Creates an operation.
    pub fn new(stamp: Stamp, object: ObjectKey, kind: OperationKind) -> Self {
        Self {
            stamp,
            object,
            kind,
        }
    }

    /// Returns the replica that generated this operation.
    pub fn replica(&self) -> ReplicaId {
        self.stamp.replica
    }

    /// Returns the clock of this operation.
    pub fn clock(&self) -> u64 {
        self.stamp.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_codec::RowId;

    #[test]
    fn property_accessor() {
        let kind = OperationKind::MapSet {
            property: "tags".into(),
            key: "k".into(),
            value: Value::Null,
        };
        assert_eq!(kind.property(), Some("tags"));
        assert_eq!(kind.name(), "map_set");
        assert_eq!(OperationKind::DeleteObject.property(), None);
    }

    #[test]
    fn operation_accessors() {
        let replica = ReplicaId::from_u128(9);
        let op = SyncOperation::new(
            Stamp::new(4, replica),
            ObjectKey::new("Dog", RowId::from_u128(1)),
            OperationKind::CreateObject,
        );
        assert_eq!(op.clock(), 4);
        assert_eq!(op.replica(), replica);
    }
}
