//! Verify command implementation.

use super::open_existing;
use driftdb_sync_protocol::PushRequest;
use std::path::Path;
use tracing::{info, warn};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Pending operations checked.
    pub operations_checked: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a store. Opening it verifies the image digest and format; the
/// outbox must belong to the store's replica in ascending clock order, and
/// the committed clock must cover every pending operation.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let snapshot = store.current();
    let operations = store.pending_operations(usize::MAX)?;

    let mut result = VerifyResult {
        operations_checked: operations.len(),
        ..VerifyResult::default()
    };

    let request = PushRequest::new(store.replica(), operations);
    if let Err(err) = request.validate() {
        result.errors.push(format!("outbox: {err}"));
    }
    if let Some(max) = request.max_clock() {
        if max > snapshot.clock() {
            result.errors.push(format!(
                "outbox clock {max} is ahead of committed clock {}",
                snapshot.clock()
            ));
        }
    }
    for error in &result.errors {
        warn!(%error, "verification problem");
    }
    info!(
        operations = result.operations_checked,
        errors = result.errors.len(),
        "verification finished"
    );
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", path.display());
    let result = verify(path)?;
    println!("  Image:      ok");
    println!("  Operations: {} checked", result.operations_checked);
    for error in &result.errors {
        println!("  ✗ {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("verification failed".into())
    }
}
