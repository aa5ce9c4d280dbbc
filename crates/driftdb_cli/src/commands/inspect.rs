//! Inspect command implementation.

use super::{open_existing, Format};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Committed version.
    pub version: u64,
    /// Replica id of the store.
    pub replica: String,
    /// Lamport clock of the latest commit.
    pub clock: u64,
    /// Live objects.
    pub object_count: usize,
    /// Deleted objects remembered for merging.
    pub tombstone_count: usize,
    /// Live objects per class.
    pub classes: BTreeMap<String, usize>,
    /// Operations awaiting upload.
    pub pending_operations: usize,
    /// How far the store has downloaded.
    pub server_cursor: u64,
    /// Declared schema (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<ClassSummary>>,
}

/// One class of the declared schema.
#[derive(Debug, Serialize)]
pub struct ClassSummary {
    /// Class name.
    pub name: String,
    /// `(property, kind)` pairs in declaration order.
    pub properties: Vec<(String, String)>,
}

/// Collects the inspection result for a store.
pub fn inspect(path: &Path, show_schema: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let snapshot = store.current();

    let schema = show_schema.then(|| {
        snapshot
            .schema()
            .classes()
            .map(|class| ClassSummary {
                name: class.name.clone(),
                properties: class
                    .properties
                    .iter()
                    .map(|p| (p.name.clone(), p.kind.describe()))
                    .collect(),
            })
            .collect()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        version: snapshot.version().as_u64(),
        replica: store.replica().to_string(),
        clock: snapshot.clock(),
        object_count: snapshot.object_count(),
        tombstone_count: snapshot.tombstone_count(),
        classes: snapshot.class_counts(),
        pending_operations: store.pending_count(),
        server_cursor: store.server_cursor(),
        schema,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, show_schema: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_schema)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("DriftDB Store Inspection");
    println!("========================");
    println!();
    println!("Path:     {}", result.path);
    println!("Version:  v{}", result.version);
    println!("Replica:  {}", result.replica);
    println!("Clock:    {}", result.clock);
    println!();
    println!("Objects:     {}", result.object_count);
    println!("Tombstones:  {}", result.tombstone_count);
    for (class, count) in &result.classes {
        println!("  {class:<20} {count}");
    }
    println!();
    println!("Pending operations: {}", result.pending_operations);
    println!("Server cursor:      {}", result.server_cursor);

    if let Some(schema) = &result.schema {
        println!();
        println!("Schema:");
        for class in schema {
            println!("  {}", class.name);
            for (name, kind) in &class.properties {
                println!("    {name:<18} {kind}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::{ClassSchema, Config, Database, Registry, Schema, ValueType};

    #[test]
    fn inspect_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let schema = Schema::new().class(ClassSchema::new("Dog").field("name", ValueType::String));
            let db = Database::open(&Registry::new(), Config::at_path(dir.path()).schema(schema)).unwrap();
            db.write(|db| {
                db.create("Dog", [("name", "Rex")])?;
                db.create("Dog", [("name", "Fido")])?;
                Ok(())
            })
            .unwrap();
        }

        let result = inspect(dir.path(), true).unwrap();
        assert_eq!(result.object_count, 2);
        assert_eq!(result.classes.get("Dog"), Some(&2));
        assert_eq!(result.pending_operations, 4);
        assert_eq!(result.schema.unwrap()[0].name, "Dog");
    }

    #[test]
    fn inspect_refuses_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(dir.path(), false).is_err());
        assert!(!dir.path().join("STORE").exists());
    }
}
