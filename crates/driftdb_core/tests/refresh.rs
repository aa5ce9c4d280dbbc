//! Refresh pump and change notifications.

use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, Value, ValueType, Version};
use std::cell::RefCell;
use std::rc::Rc;

fn open(registry: &Registry) -> Database {
    let schema = Schema::new().class(ClassSchema::new("Item").field("n", ValueType::Int));
    Database::open(registry, Config::in_memory("refresh").schema(schema)).unwrap()
}

#[test]
fn change_sets_report_inserted_modified_deleted() {
    let registry = Registry::new();
    let reader = open(&registry);
    let writer = open(&registry);
    let (keep, drop_me) = writer
        .write(|db| Ok((db.create("Item", [("n", 1_i64)])?, db.create("Item", [("n", 2_i64)])?)))
        .unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let token = reader
        .observe(move |changes| sink.borrow_mut().push(changes.clone()))
        .unwrap();

    let added = writer
        .write(|db| {
            keep.set("n", 10_i64)?;
            db.delete(&drop_me)?;
            db.create("Item", [("n", 3_i64)])
        })
        .unwrap();
    assert!(reader.refresh().unwrap());

    {
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        let changes = &log[0];
        assert!(changes.from < changes.to);
        assert_eq!(changes.inserted, vec![added.key().clone()]);
        assert_eq!(changes.modified, vec![keep.key().clone()]);
        assert_eq!(changes.deleted, vec![drop_me.key().clone()]);
    }

    drop(token);
    writer.write(|_| keep.set("n", 11_i64)).unwrap();
    reader.refresh().unwrap();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn versions_only_move_forward() {
    let registry = Registry::new();
    let reader = open(&registry);
    let writer = open(&registry);
    reader.refresh().unwrap();
    let start = reader.version().unwrap();

    let mut seen = vec![start];
    for n in 0..3_i64 {
        writer.write(|db| db.create("Item", [("n", n)])).unwrap();
        reader.refresh().unwrap();
        seen.push(reader.version().unwrap());
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last().copied(), Some(Version::new(start.as_u64() + 3)));
}

#[test]
fn store_subscribers_hear_every_commit() {
    let registry = Registry::new();
    let db = open(&registry);
    let commits = db.store().subscribe();

    db.write(|db| db.create("Item", [("n", 1_i64)])).unwrap();
    db.write(|db| db.create("Item", [("n", 2_i64)])).unwrap();

    let versions: Vec<Version> = commits.try_iter().collect();
    assert_eq!(versions.len(), 2);
    assert!(versions[0] < versions[1]);
}

#[test]
fn begin_write_advances_stale_handle() {
    let registry = Registry::new();
    let stale = open(&registry);
    let writer = open(&registry);
    stale.refresh().unwrap();

    writer.write(|db| db.create("Item", [("n", 5_i64)])).unwrap();
    stale.begin_write().unwrap();
    let all = stale.objects("Item").unwrap();
    assert_eq!(all.len().unwrap(), 1);
    assert_eq!(all.get(0).unwrap().get("n").unwrap(), Value::Int(5));
    stale.cancel_write().unwrap();
}

#[test]
fn deletion_elsewhere_invalidates_only_after_refresh() {
    let registry = Registry::new();
    let reader = open(&registry);
    let writer = open(&registry);
    writer
        .write(|db| db.create("Item", [("n", 7_i64)]))
        .unwrap();

    let held = reader.objects("Item").unwrap().first().unwrap().unwrap();
    assert!(!held.is_invalidated());

    let doomed = writer.objects("Item").unwrap().first().unwrap().unwrap();
    writer.write(|db| db.delete(&doomed)).unwrap();
    assert!(doomed.is_invalidated());

    assert!(!held.is_invalidated());
    assert_eq!(held.get("n").unwrap(), Value::Int(7));

    assert!(reader.refresh().unwrap());
    assert!(held.is_invalidated());
    assert!(held.get("n").is_err());
}
