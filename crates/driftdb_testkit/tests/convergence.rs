//! Two-replica convergence through the in-memory relay.

use driftdb_core::{ClassSchema, Schema, ValueType};
use driftdb_sync_engine::{SyncApplier, SyncTransport};
use driftdb_sync_protocol::PullRequest;
use driftdb_testkit::prelude::*;
use proptest::prelude::*;

#[test]
fn every_case_replicates() {
    let pair = ReplicaPair::new(cases_schema());
    let holder = pair.a.create_holder().unwrap();

    for case in cases() {
        let samples = pair.a.db.write(|db| case.element.samples(db)).unwrap();
        pair.a.db.write(|_| case.fill(&holder, &samples)).unwrap();
    }
    pair.sync();

    let remote = pair.b.db.object(HOLDER, holder.id()).unwrap().unwrap();
    for case in cases() {
        let local = case.contents(&holder).unwrap();
        assert!(!local.is_empty(), "{case}");
        assert_eq!(case.contents(&remote).unwrap(), local, "{case}");
    }
}

#[test]
fn every_case_converges_after_concurrent_edits() {
    let pair = ReplicaPair::new(cases_schema());
    let holder = pair.a.create_holder().unwrap();
    let mut samples = Vec::new();
    for case in cases() {
        let values = pair.a.db.write(|db| case.element.samples(db)).unwrap();
        pair.a.db.write(|_| case.fill(&holder, &values)).unwrap();
        samples.push(values);
    }
    pair.sync();
    let remote = pair.b.db.object(HOLDER, holder.id()).unwrap().unwrap();

    // a drops the first element while b drops the last one and re-adds.
    for (case, values) in cases().into_iter().zip(&samples) {
        pair.a.db.write(|_| case.remove(&holder, values, 0)).unwrap();
        pair.b
            .db
            .write(|_| {
                case.remove(&remote, values, values.len() - 1)?;
                case.fill(&remote, &values[..1])
            })
            .unwrap();
    }
    pair.sync();

    for case in cases() {
        assert_eq!(
            case.contents(&holder).unwrap(),
            case.contents(&remote).unwrap(),
            "{case}"
        );
    }
}

#[test]
fn downloads_are_idempotent_for_every_case() {
    let pair = ReplicaPair::new(cases_schema());
    let holder = pair.a.create_holder().unwrap();
    for case in cases() {
        let samples = pair.a.db.write(|db| case.element.samples(db)).unwrap();
        pair.a.db.write(|_| case.fill(&holder, &samples)).unwrap();
    }
    pair.sync();
    let version = pair.b.db.version();

    // Replay everything the relay holds for b: every operation is skipped.
    let replay = pair
        .server
        .pull(&PullRequest::new(pair.b.db.replica(), 0, u32::MAX))
        .unwrap();
    assert!(!replay.operations.is_empty());
    let report = pair
        .b
        .engine
        .applier()
        .apply_remote_operations(&replay.operations)
        .unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.duplicates, replay.operations.len());

    assert!(!pair.b.db.refresh().unwrap());
    assert_eq!(pair.b.db.version(), version);
}

fn int_schema() -> Schema {
    Schema::new().class(
        ClassSchema::new("Holder")
            .list("list", ValueType::Int)
            .set("set", ValueType::Int)
            .map("map", ValueType::Int),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_list_edits_converge(
        seed in prop::collection::vec(any::<i64>(), 0..6),
        edits_a in prop::collection::vec(list_edit_strategy(), 0..12),
        edits_b in prop::collection::vec(list_edit_strategy(), 0..12),
    ) {
        let pair = ReplicaPair::new(int_schema());
        let holder = pair.a.create_holder().unwrap();
        pair.a.db.write(|_| holder.list("list")?.extend(seed.clone())).unwrap();
        pair.sync();
        let remote = pair.b.db.object("Holder", holder.id()).unwrap().unwrap();

        let list_a = holder.list("list").unwrap();
        let list_b = remote.list("list").unwrap();
        pair.a.db.write(|_| edits_a.iter().try_for_each(|e| apply_list_edit(&list_a, e))).unwrap();
        pair.b.db.write(|_| edits_b.iter().try_for_each(|e| apply_list_edit(&list_b, e))).unwrap();
        pair.sync();

        prop_assert_eq!(list_a.to_vec().unwrap(), list_b.to_vec().unwrap());
    }

    #[test]
    fn concurrent_set_edits_converge(
        edits_a in prop::collection::vec(set_edit_strategy(), 0..12),
        edits_b in prop::collection::vec(set_edit_strategy(), 0..12),
    ) {
        let pair = ReplicaPair::new(int_schema());
        let holder = pair.a.create_holder().unwrap();
        pair.sync();
        let remote = pair.b.db.object("Holder", holder.id()).unwrap().unwrap();

        let set_a = holder.set_collection("set").unwrap();
        let set_b = remote.set_collection("set").unwrap();
        pair.a.db.write(|_| edits_a.iter().try_for_each(|e| apply_set_edit(&set_a, e))).unwrap();
        pair.b.db.write(|_| edits_b.iter().try_for_each(|e| apply_set_edit(&set_b, e))).unwrap();
        pair.sync();

        prop_assert_eq!(set_a.to_vec().unwrap(), set_b.to_vec().unwrap());
    }

    #[test]
    fn concurrent_map_edits_converge(
        edits_a in prop::collection::vec(map_edit_strategy(), 0..12),
        edits_b in prop::collection::vec(map_edit_strategy(), 0..12),
    ) {
        let pair = ReplicaPair::new(int_schema());
        let holder = pair.a.create_holder().unwrap();
        pair.sync();
        let remote = pair.b.db.object("Holder", holder.id()).unwrap().unwrap();

        let map_a = holder.map("map").unwrap();
        let map_b = remote.map("map").unwrap();
        pair.a.db.write(|_| edits_a.iter().try_for_each(|e| apply_map_edit(&map_a, e))).unwrap();
        pair.b.db.write(|_| edits_b.iter().try_for_each(|e| apply_map_edit(&map_b, e))).unwrap();
        pair.sync();

        prop_assert_eq!(map_a.to_vec().unwrap(), map_b.to_vec().unwrap());
    }
}
