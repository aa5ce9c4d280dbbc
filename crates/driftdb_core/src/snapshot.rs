//! Immutable committed state of a store.

use crate::record::{Field, ListState, MapState, ObjectRecord, SetState};
use crate::schema::Schema;
use crate::types::Version;
use driftdb_codec::{ObjectKey, Value};
use driftdb_sync_protocol::{LamportClock, ReplicaId, Stamp, SyncOperation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One committed version of a store.
///
/// Snapshots are immutable once published and shared between handles via
/// `Arc`; a write clones the latest snapshot (sharing unchanged object
/// records) and publishes the result as the next version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) version: Version,
    pub(crate) schema: Arc<Schema>,
    pub(crate) objects: BTreeMap<ObjectKey, Arc<ObjectRecord>>,
    pub(crate) tombstones: BTreeMap<ObjectKey, Stamp>,
    pub(crate) clock: LamportClock,
    /// Highest applied clock per replica.
    pub(crate) watermarks: BTreeMap<ReplicaId, u64>,
    /// Remote list inserts waiting for their anchor element.
    pub(crate) deferred: Vec<SyncOperation>,
}

impl Snapshot {
    pub(crate) fn empty(schema: Schema) -> Self {
        Self {
            version: Version::default(),
            schema: Arc::new(schema),
            objects: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            clock: LamportClock::new(),
            watermarks: BTreeMap::new(),
            deferred: Vec::new(),
        }
    }

    /// Returns the version of this snapshot.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Returns the number of deleted objects still remembered.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Returns live object counts per class, including empty classes.
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.schema.classes().map(|c| (c.name.clone(), 0)).collect();
        for key in self.objects.keys() {
            *counts.entry(key.class.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the Lamport clock value.
    pub fn clock(&self) -> u64 {
        self.clock.value()
    }

    /// Returns the highest applied clock for a replica.
    pub fn watermark(&self, replica: &ReplicaId) -> u64 {
        self.watermarks.get(replica).copied().unwrap_or(0)
    }

    /// Returns true if the object exists in this snapshot.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    pub(crate) fn record(&self, key: &ObjectKey) -> Option<&ObjectRecord> {
        self.objects.get(key).map(Arc::as_ref)
    }

    pub(crate) fn field(&self, key: &ObjectKey, property: &str) -> Option<&Field> {
        self.record(key).and_then(|r| r.fields.get(property))
    }

    /// Keys of live objects of `class`, in creation order.
    pub(crate) fn keys_of(&self, class: &str) -> Vec<ObjectKey> {
        let mut keys: Vec<(&Stamp, &ObjectKey)> = self
            .objects
            .iter()
            .filter(|(k, _)| k.class == class)
            .map(|(k, r)| (&r.created, k))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k.clone()).collect()
    }

    /// Links to objects that are not live read as absent.
    pub(crate) fn is_live_value(&self, value: &Value) -> bool {
        match value {
            Value::Link(key) => self.objects.contains_key(key),
            _ => true,
        }
    }

    /// Value as seen by readers: dangling links read as `Null`.
    pub(crate) fn visible_value(&self, value: &Value) -> Value {
        if self.is_live_value(value) {
            value.clone()
        } else {
            Value::Null
        }
    }

    pub(crate) fn list_values(&self, list: &ListState) -> Vec<Value> {
        self.list_elements(list)
            .into_iter()
            .map(|e| e.value.clone())
            .collect()
    }

    pub(crate) fn list_elements<'a>(
        &self,
        list: &'a ListState,
    ) -> Vec<&'a crate::record::ListElement> {
        list.elements
            .iter()
            .filter(|e| list.is_visible(e) && self.is_live_value(&e.value))
            .collect()
    }

    pub(crate) fn set_values(&self, set: &SetState) -> Vec<Value> {
        set.entries
            .iter()
            .filter(|(v, e)| set.is_present(e) && self.is_live_value(v))
            .map(|(v, _)| v.clone())
            .collect()
    }

    pub(crate) fn set_contains(&self, set: &SetState, value: &Value) -> bool {
        set.contains(value) && self.is_live_value(value)
    }

    pub(crate) fn map_entries(&self, map: &MapState) -> Vec<(String, Value)> {
        map.entries
            .iter()
            .filter_map(|(k, e)| {
                e.value
                    .as_ref()
                    .map(|v| (k.clone(), self.visible_value(v)))
            })
            .collect()
    }

    /// Returns true if `field` currently holds a link to `target`.
    pub(crate) fn field_links_to(&self, field: &Field, target: &ObjectKey) -> bool {
        let link = Value::Link(target.clone());
        match field {
            Field::Value(reg) => reg.value == link && self.is_live_value(&link),
            Field::List(list) => self.list_elements(list).iter().any(|e| e.value == link),
            Field::Set(set) => self.set_contains(set, &link),
            Field::Map(_) => false,
        }
    }
}

/// Serialized form of a snapshot inside the store image.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotImage {
    pub version: Version,
    pub schema: Schema,
    pub objects: Vec<(ObjectKey, ObjectRecord)>,
    pub tombstones: Vec<(ObjectKey, Stamp)>,
    pub clock: LamportClock,
    pub watermarks: Vec<(ReplicaId, u64)>,
    #[serde(default)]
    pub deferred: Vec<SyncOperation>,
}

impl From<&Snapshot> for SnapshotImage {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            version: snapshot.version,
            schema: (*snapshot.schema).clone(),
            objects: snapshot
                .objects
                .iter()
                .map(|(k, r)| (k.clone(), (**r).clone()))
                .collect(),
            tombstones: snapshot
                .tombstones
                .iter()
                .map(|(k, s)| (k.clone(), *s))
                .collect(),
            clock: snapshot.clock,
            watermarks: snapshot.watermarks.iter().map(|(r, c)| (*r, *c)).collect(),
            deferred: snapshot.deferred.clone(),
        }
    }
}

impl From<SnapshotImage> for Snapshot {
    fn from(image: SnapshotImage) -> Self {
        Self {
            version: image.version,
            schema: Arc::new(image.schema),
            objects: image
                .objects
                .into_iter()
                .map(|(k, r)| (k, Arc::new(r)))
                .collect(),
            tombstones: image.tombstones.into_iter().collect(),
            clock: image.clock,
            watermarks: image.watermarks.into_iter().collect(),
            deferred: image.deferred,
        }
    }
}
