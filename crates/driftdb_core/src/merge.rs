//! Sync merge engine.
//!
//! Local and remote operations go through the same [`apply`] routine, so
//! every replica that applies the same set of operations reaches the same
//! state regardless of arrival order (except `SetIntersect`, which reads
//! the other set as it is when the operation is applied).
//!
//! Resolution rules:
//!
//! - field sets and map entries: last writer by stamp
//! - concurrent list inserts at one position: all kept, greater stamp first
//! - list set vs erase on one element: erase wins
//! - set insert vs erase of one value: last writer by stamp
//! - clears hide everything stamped before them
//! - object delete wins over every mutation of the object, before or after

use crate::error::{CoreError, CoreResult};
use crate::record::{Field, ObjectRecord};
use crate::schema::{ClassSchema, PropertyKind};
use crate::snapshot::Snapshot;
use driftdb_codec::Value;
use driftdb_sync_protocol::{OperationKind, SyncOperation};
use std::sync::Arc;

/// Outcome of merging a batch of remote operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Operations applied (whether or not they changed anything).
    pub applied: usize,
    /// Operations skipped because they were already applied.
    pub duplicates: usize,
    /// Operations rejected by the schema.
    pub rejected: usize,
    /// List inserts held back until their anchor element arrives.
    pub deferred: usize,
}

impl MergeReport {
    /// Returns true if at least one operation was applied.
    pub fn changed(&self) -> bool {
        self.applied > 0
    }
}

fn property_kind<'a>(class: &'a ClassSchema, property: &str) -> CoreResult<&'a PropertyKind> {
    class
        .get(property)
        .map(|p| &p.kind)
        .ok_or_else(|| CoreError::unknown_property(&class.name, property))
}

fn check_value(property: &str, kind: &PropertyKind, value: &Value) -> CoreResult<()> {
    if kind.accepts(value) {
        Ok(())
    } else {
        Err(CoreError::type_mismatch(
            property,
            kind.describe(),
            value.kind_name(),
        ))
    }
}

fn wrong_kind(property: &str, kind: &PropertyKind, op: &OperationKind) -> CoreError {
    CoreError::type_mismatch(property, kind.describe(), op.name())
}

/// Validates an operation against the snapshot's schema.
fn check(snapshot: &Snapshot, op: &SyncOperation) -> CoreResult<()> {
    let schema = snapshot.schema();
    let class = schema
        .get(&op.object.class)
        .ok_or_else(|| CoreError::unknown_class(&op.object.class))?;

    let Some(property) = op.kind.property() else {
        return Ok(());
    };
    let kind = property_kind(class, property)?;

    match (&op.kind, kind) {
        (OperationKind::SetField { value, .. }, PropertyKind::Value { .. })
        | (OperationKind::ListInsert { value, .. }, PropertyKind::List(_))
        | (OperationKind::ListSet { value, .. }, PropertyKind::List(_))
        | (OperationKind::SetInsert { value, .. }, PropertyKind::Set(_))
        | (OperationKind::SetErase { value, .. }, PropertyKind::Set(_))
        | (OperationKind::MapSet { value, .. }, PropertyKind::Map(_)) => {
            check_value(property, kind, value)
        }
        (OperationKind::ListErase { .. } | OperationKind::ListClear { .. }, PropertyKind::List(_))
        | (OperationKind::SetClear { .. }, PropertyKind::Set(_))
        | (OperationKind::MapErase { .. }, PropertyKind::Map(_)) => Ok(()),
        (
            OperationKind::SetIntersect {
                other_object,
                other_property,
                ..
            },
            PropertyKind::Set(ty),
        ) => {
            let other_class = schema
                .get(&other_object.class)
                .ok_or_else(|| CoreError::unknown_class(&other_object.class))?;
            match property_kind(other_class, other_property)? {
                PropertyKind::Set(other_ty) if other_ty == ty => Ok(()),
                other => Err(CoreError::type_mismatch(
                    other_property.as_str(),
                    kind.describe(),
                    other.describe(),
                )),
            }
        }
        (op_kind, kind) => Err(wrong_kind(property, kind, op_kind)),
    }
}

/// Applies one operation. Returns true if the state changed.
///
/// Operations on deleted objects are accepted and ignored.
pub(crate) fn apply(snapshot: &mut Snapshot, op: &SyncOperation) -> CoreResult<bool> {
    check(snapshot, op)?;
    snapshot.clock.observe(op.clock());

    if snapshot.tombstones.contains_key(&op.object) {
        return Ok(false);
    }

    match &op.kind {
        OperationKind::CreateObject => {
            if snapshot.objects.contains_key(&op.object) {
                return Ok(false);
            }
            let class = snapshot
                .schema
                .get(&op.object.class)
                .ok_or_else(|| CoreError::unknown_class(&op.object.class))?;
            let record = ObjectRecord::new(class, op.stamp);
            snapshot.objects.insert(op.object.clone(), Arc::new(record));
            Ok(true)
        }
        OperationKind::DeleteObject => {
            snapshot.objects.remove(&op.object);
            snapshot.tombstones.insert(op.object.clone(), op.stamp);
            Ok(true)
        }
        kind => {
            // Read the other set before borrowing the target mutably.
            let keep = match kind {
                OperationKind::SetIntersect {
                    other_object,
                    other_property,
                    ..
                } => Some(match snapshot.field(other_object, other_property) {
                    Some(Field::Set(other)) => snapshot.set_values(other),
                    _ => Vec::new(),
                }),
                _ => None,
            };

            let Some(record) = snapshot.objects.get_mut(&op.object) else {
                tracing::warn!(object = %op.object, op = kind.name(), "operation on unknown object");
                return Ok(false);
            };
            let property = kind.property().unwrap_or_default();
            if let (OperationKind::ListInsert { after: Some(anchor), .. }, Some(Field::List(list))) =
                (kind, record.fields.get(property))
            {
                if !list.contains(*anchor) {
                    return Err(CoreError::missing_anchor(anchor));
                }
            }
            let Some(field) = Arc::make_mut(record).fields.get_mut(property) else {
                return Ok(false);
            };
            Ok(apply_to_field(field, op, keep))
        }
    }
}

fn apply_to_field(field: &mut Field, op: &SyncOperation, keep: Option<Vec<Value>>) -> bool {
    let stamp = op.stamp;
    match (&op.kind, field) {
        (OperationKind::SetField { value, .. }, Field::Value(reg)) => reg.assign(value.clone(), stamp),
        (OperationKind::ListInsert { after, value, .. }, Field::List(list)) => {
            list.insert(stamp, *after, value.clone())
        }
        (OperationKind::ListSet { element, value, .. }, Field::List(list)) => {
            list.set(*element, value.clone(), stamp)
        }
        (OperationKind::ListErase { element, .. }, Field::List(list)) => list.erase(*element),
        (OperationKind::ListClear { .. }, Field::List(list)) => list.clear(stamp),
        (OperationKind::SetInsert { value, .. }, Field::Set(set)) => set.insert(value, stamp),
        (OperationKind::SetErase { value, .. }, Field::Set(set)) => set.erase(value, stamp),
        (OperationKind::SetClear { .. }, Field::Set(set)) => set.clear(stamp),
        (OperationKind::SetIntersect { .. }, Field::Set(set)) => {
            let keep = keep.unwrap_or_default();
            let doomed: Vec<Value> = set
                .entries
                .iter()
                .filter(|(v, e)| set.is_present(e) && keep.binary_search(v).is_err())
                .map(|(v, _)| v.clone())
                .collect();
            let mut changed = false;
            for value in &doomed {
                changed |= set.erase(value, stamp);
            }
            changed
        }
        (OperationKind::MapSet { key, value, .. }, Field::Map(map)) => {
            map.assign(key, Some(value.clone()), stamp)
        }
        (OperationKind::MapErase { key, .. }, Field::Map(map)) => map.assign(key, None, stamp),
        _ => false,
    }
}

/// Applies a locally generated operation.
///
/// On top of the schema checks, links must point at live objects and the
/// target object must exist.
pub(crate) fn apply_local(snapshot: &mut Snapshot, op: &SyncOperation) -> CoreResult<()> {
    let value = match &op.kind {
        OperationKind::SetField { value, .. }
        | OperationKind::ListInsert { value, .. }
        | OperationKind::ListSet { value, .. }
        | OperationKind::SetInsert { value, .. }
        | OperationKind::MapSet { value, .. } => Some(value),
        _ => None,
    };
    if let Some(Value::Link(target)) = value {
        if !snapshot.contains(target) {
            return Err(CoreError::InvalidatedObject);
        }
    }
    if !matches!(op.kind, OperationKind::CreateObject) && !snapshot.contains(&op.object) {
        return Err(CoreError::InvalidatedObject);
    }
    apply(snapshot, op)?;
    let watermark = op.clock().max(snapshot.watermark(&op.replica()));
    snapshot.watermarks.insert(op.replica(), watermark);
    Ok(())
}

/// Applies a batch of remote operations, skipping any already applied.
///
/// Operations that fail schema validation are logged and dropped; they
/// still advance the watermark so redelivery does not retry them. List
/// inserts whose anchor has not arrived are kept in the snapshot and
/// retried whenever another operation applies.
pub(crate) fn apply_remote(snapshot: &mut Snapshot, ops: &[SyncOperation]) -> MergeReport {
    let mut report = MergeReport::default();
    for op in ops {
        let replica = op.replica();
        if op.clock() <= snapshot.watermark(&replica) {
            report.duplicates += 1;
            continue;
        }
        if apply_or_defer(snapshot, op, &mut report) {
            retry_deferred(snapshot, &mut report);
        }
        snapshot.watermarks.insert(replica, op.clock());
    }
    report
}

/// Returns true if `op` applied.
fn apply_or_defer(snapshot: &mut Snapshot, op: &SyncOperation, report: &mut MergeReport) -> bool {
    match apply(snapshot, op) {
        Ok(_) => {
            report.applied += 1;
            true
        }
        Err(CoreError::MissingAnchor { anchor }) => {
            tracing::debug!(%anchor, stamp = %op.stamp, "deferring list insert");
            snapshot.deferred.push(op.clone());
            report.deferred += 1;
            false
        }
        Err(error) => {
            tracing::warn!(%error, stamp = %op.stamp, op = op.kind.name(), "rejected remote operation");
            report.rejected += 1;
            false
        }
    }
}

fn retry_deferred(snapshot: &mut Snapshot, report: &mut MergeReport) {
    loop {
        let waiting = std::mem::take(&mut snapshot.deferred);
        if waiting.is_empty() {
            return;
        }
        let mut progressed = false;
        for op in &waiting {
            let mut retry = MergeReport::default();
            if apply_or_defer(snapshot, op, &mut retry) {
                progressed = true;
                report.applied += 1;
            }
            report.rejected += retry.rejected;
        }
        if !progressed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassSchema, Schema};
    use driftdb_codec::{ObjectKey, RowId, ValueType};
    use driftdb_sync_protocol::{ReplicaId, Stamp};
    use proptest::prelude::*;

    fn schema() -> Schema {
        Schema::new()
            .class(
                ClassSchema::new("Item")
                    .field("title", ValueType::String)
                    .list("values", ValueType::Int)
                    .set("a", ValueType::Int)
                    .set("b", ValueType::Int)
                    .map("props", ValueType::Any)
                    .list("links", ValueType::Object("Item".into())),
            )
    }

    fn key(n: u128) -> ObjectKey {
        ObjectKey::new("Item", RowId::from_u128(n))
    }

    fn op(clock: u64, replica: u128, object: ObjectKey, kind: OperationKind) -> SyncOperation {
        SyncOperation::new(Stamp::new(clock, ReplicaId::from_u128(replica)), object, kind)
    }

    fn list_of(snapshot: &Snapshot, object: &ObjectKey) -> Vec<Value> {
        match snapshot.field(object, "values") {
            Some(Field::List(list)) => snapshot.list_values(list),
            _ => panic!("not a list"),
        }
    }

    fn set_of(snapshot: &Snapshot, object: &ObjectKey, property: &str) -> Vec<Value> {
        match snapshot.field(object, property) {
            Some(Field::Set(set)) => snapshot.set_values(set),
            _ => panic!("not a set"),
        }
    }

    #[test]
    fn create_and_set_field() {
        let mut snap = Snapshot::empty(schema());
        apply(&mut snap, &op(1, 1, key(1), OperationKind::CreateObject)).unwrap();
        apply(
            &mut snap,
            &op(
                2,
                1,
                key(1),
                OperationKind::SetField {
                    property: "title".into(),
                    value: "hello".into(),
                },
            ),
        )
        .unwrap();
        match snap.field(&key(1), "title") {
            Some(Field::Value(reg)) => assert_eq!(reg.value, Value::from("hello")),
            _ => panic!("missing field"),
        }
        assert_eq!(snap.clock(), 2);
    }

    #[test]
    fn schema_violations_are_rejected() {
        let mut snap = Snapshot::empty(schema());
        apply(&mut snap, &op(1, 1, key(1), OperationKind::CreateObject)).unwrap();
        let bad_value = op(
            2,
            1,
            key(1),
            OperationKind::SetField {
                property: "title".into(),
                value: Value::Int(5),
            },
        );
        assert!(matches!(
            apply(&mut snap, &bad_value),
            Err(CoreError::TypeMismatch { .. })
        ));
        let wrong_kind = op(
            3,
            1,
            key(1),
            OperationKind::SetInsert {
                property: "values".into(),
                value: Value::Int(5),
            },
        );
        assert!(apply(&mut snap, &wrong_kind).is_err());
    }

    #[test]
    fn delete_wins_over_later_field_sets() {
        let mut snap = Snapshot::empty(schema());
        apply(&mut snap, &op(1, 1, key(1), OperationKind::CreateObject)).unwrap();
        apply(&mut snap, &op(2, 2, key(1), OperationKind::DeleteObject)).unwrap();
        let late = op(
            5,
            1,
            key(1),
            OperationKind::SetField {
                property: "title".into(),
                value: "late".into(),
            },
        );
        assert!(!apply(&mut snap, &late).unwrap());
        assert!(!apply(&mut snap, &op(6, 1, key(1), OperationKind::CreateObject)).unwrap());
        assert!(!snap.contains(&key(1)));
    }

    #[test]
    fn deleted_link_targets_disappear_from_lists() {
        let mut snap = Snapshot::empty(schema());
        apply(&mut snap, &op(1, 1, key(1), OperationKind::CreateObject)).unwrap();
        apply(&mut snap, &op(2, 1, key(2), OperationKind::CreateObject)).unwrap();
        apply(
            &mut snap,
            &op(
                3,
                1,
                key(1),
                OperationKind::ListInsert {
                    property: "links".into(),
                    after: None,
                    value: Value::Link(key(2)),
                },
            ),
        )
        .unwrap();
        apply(&mut snap, &op(4, 1, key(2), OperationKind::DeleteObject)).unwrap();
        match snap.field(&key(1), "links") {
            Some(Field::List(list)) => assert!(snap.list_values(list).is_empty()),
            _ => panic!("not a list"),
        }
    }

    #[test]
    fn intersect_reads_other_set() {
        let mut snap = Snapshot::empty(schema());
        apply(&mut snap, &op(1, 1, key(1), OperationKind::CreateObject)).unwrap();
        let mut clock = 1;
        for (property, values) in [("a", [1, 2, 3]), ("b", [3, 4, 5])] {
            for v in values {
                clock += 1;
                apply(
                    &mut snap,
                    &op(
                        clock,
                        1,
                        key(1),
                        OperationKind::SetInsert {
                            property: property.into(),
                            value: Value::Int(v),
                        },
                    ),
                )
                .unwrap();
            }
        }
        apply(
            &mut snap,
            &op(
                clock + 1,
                1,
                key(1),
                OperationKind::SetIntersect {
                    property: "a".into(),
                    other_object: key(1),
                    other_property: "b".into(),
                },
            ),
        )
        .unwrap();
        assert_eq!(set_of(&snap, &key(1), "a"), vec![Value::Int(3)]);
        assert_eq!(
            set_of(&snap, &key(1), "b"),
            vec![Value::Int(3), Value::Int(4), Value::Int(5)]
        );
    }

    #[test]
    fn remote_replay_is_idempotent() {
        let ops = vec![
            op(1, 7, key(1), OperationKind::CreateObject),
            op(
                2,
                7,
                key(1),
                OperationKind::ListInsert {
                    property: "values".into(),
                    after: None,
                    value: Value::Int(1),
                },
            ),
        ];
        let mut snap = Snapshot::empty(schema());
        let first = apply_remote(&mut snap, &ops);
        assert_eq!(first.applied, 2);
        let second = apply_remote(&mut snap, &ops);
        assert_eq!(second.applied, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(list_of(&snap, &key(1)), vec![Value::Int(1)]);
        assert_eq!(snap.watermark(&ReplicaId::from_u128(7)), 2);
    }

    #[test]
    fn inserts_before_their_anchor_wait_for_it() {
        let insert = |clock, replica, after: Option<Stamp>, value| {
            op(
                clock,
                replica,
                key(1),
                OperationKind::ListInsert {
                    property: "values".into(),
                    after,
                    value: Value::Int(value),
                },
            )
        };
        let create = op(1, 1, key(1), OperationKind::CreateObject);
        let head = insert(2, 1, None, 10);
        let tail = insert(3, 2, Some(head.stamp), 20);
        let front = insert(4, 3, None, 5);

        let mut in_order = Snapshot::empty(schema());
        apply_remote(&mut in_order, &[create.clone(), head.clone(), front.clone(), tail.clone()]);

        let mut out_of_order = Snapshot::empty(schema());
        let early = apply_remote(&mut out_of_order, &[create, tail]);
        assert_eq!(early.deferred, 1);
        assert_eq!(list_of(&out_of_order, &key(1)), Vec::<Value>::new());

        let late = apply_remote(&mut out_of_order, &[front, head]);
        assert_eq!(late.applied, 3);
        assert!(out_of_order.deferred.is_empty());
        assert_eq!(list_of(&out_of_order, &key(1)), list_of(&in_order, &key(1)));
        assert_eq!(
            list_of(&out_of_order, &key(1)),
            vec![Value::Int(5), Value::Int(10), Value::Int(20)]
        );
    }

    #[test]
    fn rejected_remote_operations_advance_watermark() {
        let mut snap = Snapshot::empty(schema());
        let ops = vec![op(1, 3, ObjectKey::new("Ghost", RowId::from_u128(1)), OperationKind::CreateObject)];
        let report = apply_remote(&mut snap, &ops);
        assert_eq!(report.rejected, 1);
        assert_eq!(snap.watermark(&ReplicaId::from_u128(3)), 1);
    }

    #[test]
    fn local_links_must_be_live() {
        let mut snap = Snapshot::empty(schema());
        apply(&mut snap, &op(1, 1, key(1), OperationKind::CreateObject)).unwrap();
        let dangling = op(
            2,
            1,
            key(1),
            OperationKind::ListInsert {
                property: "links".into(),
                after: None,
                value: Value::Link(key(99)),
            },
        );
        assert!(matches!(
            apply_local(&mut snap, &dangling),
            Err(CoreError::InvalidatedObject)
        ));
    }

    fn list_ops() -> Vec<SyncOperation> {
        // Two replicas appending concurrently after a shared head element.
        let head = Stamp::new(2, ReplicaId::from_u128(1));
        let mut ops = vec![
            op(1, 1, key(1), OperationKind::CreateObject),
            op(
                2,
                1,
                key(1),
                OperationKind::ListInsert {
                    property: "values".into(),
                    after: None,
                    value: Value::Int(0),
                },
            ),
        ];
        for (replica, base) in [(2u128, 10i64), (3u128, 20i64)] {
            let mut after = head;
            for i in 0..3u64 {
                let stamp = Stamp::new(3 + i, ReplicaId::from_u128(replica));
                ops.push(SyncOperation::new(
                    stamp,
                    key(1),
                    OperationKind::ListInsert {
                        property: "values".into(),
                        after: Some(after),
                        value: Value::Int(base + i as i64),
                    },
                ));
                after = stamp;
            }
        }
        ops.push(op(
            7,
            2,
            key(1),
            OperationKind::MapSet {
                property: "props".into(),
                key: "k".into(),
                value: Value::Int(2),
            },
        ));
        ops.push(op(
            7,
            3,
            key(1),
            OperationKind::MapSet {
                property: "props".into(),
                key: "k".into(),
                value: Value::Int(3),
            },
        ));
        ops
    }

    proptest! {
        #[test]
        fn delivery_order_does_not_matter(seed in any::<u64>()) {
            let ops = list_ops();
            // Keep each replica's operations in clock order, interleave replicas.
            let mut queues: Vec<Vec<SyncOperation>> = Vec::new();
            for replica in [1u128, 2, 3] {
                queues.push(ops.iter().filter(|o| o.replica() == ReplicaId::from_u128(replica)).cloned().collect());
            }
            let mut shuffled = Vec::new();
            let mut state = seed;
            // Replica 1 owns the object; deliver its operations first.
            shuffled.extend(queues[0].drain(..));
            while queues.iter().any(|q| !q.is_empty()) {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let live: Vec<usize> = (0..queues.len()).filter(|i| !queues[*i].is_empty()).collect();
                let pick = live[(state >> 33) as usize % live.len()];
                shuffled.push(queues[pick].remove(0));
            }

            let mut in_order = Snapshot::empty(schema());
            apply_remote(&mut in_order, &ops);
            let mut interleaved = Snapshot::empty(schema());
            apply_remote(&mut interleaved, &shuffled);
            // Duplicated delivery on top.
            apply_remote(&mut interleaved, &ops);

            prop_assert_eq!(list_of(&in_order, &key(1)), list_of(&interleaved, &key(1)));
            let props = |s: &Snapshot| match s.field(&key(1), "props") {
                Some(Field::Map(map)) => s.map_entries(map),
                _ => Vec::new(),
            };
            prop_assert_eq!(props(&in_order), vec![("k".to_string(), Value::Int(3))]);
            prop_assert_eq!(props(&in_order), props(&interleaved));
        }
    }
}
