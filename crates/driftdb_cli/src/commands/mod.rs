//! CLI command implementations.

pub mod dump_oplog;
pub mod inspect;
pub mod verify;

use driftdb_core::{Config, Store};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing store without creating anything.
pub fn open_existing(path: &Path) -> Result<Arc<Store>, Box<dyn std::error::Error>> {
    if !path.join("STORE").exists() {
        return Err(format!("no store found at {}", path.display()).into());
    }
    let store = Store::open(&Config::at_path(path).create_if_missing(false))?;
    info!(path = %path.display(), version = %store.latest_version(), "opened store");
    Ok(store)
}
