//! File-backed stores shared between independent registries.
//!
//! Each registry stands in for a separate process: they share nothing but
//! the store directory.

use driftdb_core::{
    ClassSchema, Config, CoreError, Database, ObjectDraft, Registry, Schema, Value, ValueType,
};
use std::time::Duration;
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new().class(
        ClassSchema::new("Note")
            .field("title", ValueType::String)
            .set("labels", ValueType::String)
            .map("meta", ValueType::Any),
    )
}

#[test]
fn data_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = Config::at_path(dir.path()).schema(schema());
    {
        let registry = Registry::new();
        let db = Database::open(&registry, config.clone()).unwrap();
        db.write(|db| {
            db.add(
                ObjectDraft::new("Note")
                    .with("title", "groceries")
                    .with_set("labels", ["home", "todo"])
                    .with_map("meta", [("pinned", Value::Bool(true))]),
            )
        })
        .unwrap();
    }

    let registry = Registry::new();
    let db = Database::open(&registry, config).unwrap();
    let note = db.objects("Note").unwrap().first().unwrap().unwrap();
    assert_eq!(note.get("title").unwrap(), Value::from("groceries"));
    assert_eq!(note.set_collection("labels").unwrap().len().unwrap(), 2);
    assert_eq!(
        note.map("meta").unwrap().get_key("pinned").unwrap(),
        Some(Value::Bool(true))
    );
    assert_eq!(db.store().pending_count(), 5);
}

#[test]
fn other_process_commits_visible_after_refresh() {
    let dir = tempdir().unwrap();
    let config = Config::at_path(dir.path()).schema(schema());
    let first = Registry::new();
    let second = Registry::new();
    let reader = Database::open(&first, config.clone()).unwrap();
    let writer = Database::open(&second, config).unwrap();

    assert!(reader.objects("Note").unwrap().is_empty().unwrap());
    writer
        .write(|db| db.create("Note", [("title", "hello")]))
        .unwrap();

    assert!(reader.objects("Note").unwrap().is_empty().unwrap());
    assert!(reader.refresh().unwrap());
    assert_eq!(reader.objects("Note").unwrap().len().unwrap(), 1);
}

#[test]
fn writer_lock_spans_registries() {
    let dir = tempdir().unwrap();
    let config = Config::at_path(dir.path())
        .schema(schema())
        .write_lock_timeout(Duration::from_millis(50));
    let first = Registry::new();
    let second = Registry::new();
    let a = Database::open(&first, config.clone()).unwrap();
    let b = Database::open(&second, config).unwrap();

    a.begin_write().unwrap();
    assert!(matches!(b.begin_write(), Err(CoreError::WriteLockTimeout)));
    a.cancel_write().unwrap();
    b.begin_write().unwrap();
    b.cancel_write().unwrap();
}

#[test]
fn writes_from_two_registries_interleave() {
    let dir = tempdir().unwrap();
    let config = Config::at_path(dir.path()).schema(schema());
    let first = Registry::new();
    let second = Registry::new();
    let a = Database::open(&first, config.clone()).unwrap();
    let b = Database::open(&second, config).unwrap();

    a.write(|db| db.create("Note", [("title", "a")])).unwrap();
    b.write(|db| db.create("Note", [("title", "b")])).unwrap();
    a.write(|db| db.create("Note", [("title", "c")])).unwrap();

    b.refresh().unwrap();
    let titles: Vec<Value> = b
        .objects("Note")
        .unwrap()
        .sorted("title", true)
        .iter()
        .unwrap()
        .map(|n| n.get("title").unwrap())
        .collect();
    assert_eq!(titles, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
}

#[test]
fn missing_store_without_create_fails() {
    let dir = tempdir().unwrap();
    let registry = Registry::new();
    let config = Config::at_path(dir.path().join("absent")).create_if_missing(false);
    assert!(Database::open(&registry, config).is_err());
}

#[test]
fn acknowledgements_survive_commits_from_another_registry() {
    let dir = tempdir().unwrap();
    let config = Config::at_path(dir.path()).schema(schema());
    let first = Registry::new();
    let second = Registry::new();
    let a = Database::open(&first, config.clone()).unwrap();
    let b = Database::open(&second, config.clone()).unwrap();

    a.write(|db| db.create("Note", [("title", "a")])).unwrap();
    b.refresh().unwrap();
    b.write(|db| db.create("Note", [("title", "b")])).unwrap();

    let uploaded = a.store().pending_operations(usize::MAX).unwrap();
    assert_eq!(uploaded.len(), 4);
    let acked = uploaded.iter().map(|op| op.clock()).max().unwrap();
    a.store().acknowledge(acked).unwrap();
    a.store().set_server_cursor(5).unwrap();

    b.write(|db| db.create("Note", [("title", "c")])).unwrap();

    let reopened = Database::open(&Registry::new(), config).unwrap();
    let pending = reopened.store().pending_operations(usize::MAX).unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|op| op.clock() > acked));
    assert_eq!(reopened.store().server_cursor(), 5);

    b.store().latest().unwrap();
    assert_eq!(b.store().pending_count(), 2);
    assert_eq!(b.store().server_cursor(), 5);
}
