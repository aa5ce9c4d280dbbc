//! Benchmark utilities.

#![warn(missing_docs)]

use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, SyncOperation, ValueType};

/// Schema used by every benchmark.
pub fn bench_schema() -> Schema {
    Schema::new().class(
        ClassSchema::new("Item")
            .field("n", ValueType::Int)
            .field("label", ValueType::String)
            .list("values", ValueType::Int)
            .map("tags", ValueType::String),
    )
}

/// Opens a fresh in-memory database named `name`.
pub fn open_memory(registry: &Registry, name: &str) -> Database {
    Database::open(registry, Config::in_memory(name).schema(bench_schema()))
        .expect("failed to open bench database")
}

/// Generates the operations of `count` objects, each with a field, a
/// three-element list and one map entry.
pub fn generate_operations(count: usize) -> Vec<SyncOperation> {
    let registry = Registry::new();
    let db = open_memory(&registry, "source");
    db.write(|db| {
        for n in 0..count {
            let item = db.create("Item", [("n", n as i64)])?;
            item.list("values")?.extend([1i64, 2, 3])?;
            item.map("tags")?.set("kind", "bench")?;
        }
        Ok(())
    })
    .expect("failed to generate operations");
    db.store()
        .pending_operations(usize::MAX)
        .expect("failed to read outbox")
}
