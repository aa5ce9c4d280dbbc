//! Dump-oplog command implementation.

use super::{open_existing, Format};
use driftdb_sync_protocol::SyncOperation;
use std::path::Path;
use tracing::info;

/// Collects up to `limit` pending operations, oldest first.
pub fn pending(path: &Path, limit: Option<usize>) -> Result<Vec<SyncOperation>, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let operations = store.pending_operations(limit.unwrap_or(usize::MAX))?;
    info!(count = operations.len(), total = store.pending_count(), "read outbox");
    Ok(operations)
}

/// Runs the dump-oplog command.
pub fn run(path: &Path, limit: Option<usize>, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let operations = pending(path, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&operations)?),
        Format::Text => {
            println!("{} pending operation(s)", operations.len());
            for op in &operations {
                println!("{}", describe(op));
            }
        }
    }
    Ok(())
}

/// One-line description: stamp, kind, target and property.
pub fn describe(op: &SyncOperation) -> String {
    match op.kind.property() {
        Some(property) => format!("{:>8}  {:<14} {}.{}", op.stamp.clock, op.kind.name(), op.object, property),
        None => format!("{:>8}  {:<14} {}", op.stamp.clock, op.kind.name(), op.object),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, ValueType};

    #[test]
    fn dumps_pending_operations_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let schema = Schema::new().class(ClassSchema::new("Dog").list("tricks", ValueType::String));
            let db = Database::open(&Registry::new(), Config::at_path(dir.path()).schema(schema)).unwrap();
            db.write(|db| {
                let dog = db.create("Dog", std::iter::empty::<(&str, &str)>())?;
                dog.list("tricks")?.push("sit")
            })
            .unwrap();
        }

        let ops = pending(dir.path(), None).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].clock() < ops[1].clock());
        assert!(describe(&ops[0]).contains("Dog"));
        assert!(describe(&ops[1]).contains("tricks"));

        assert_eq!(pending(dir.path(), Some(1)).unwrap().len(), 1);
    }
}
