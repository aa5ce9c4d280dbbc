//! # DriftDB Sync Engine
//!
//! Sync engine and sessions for DriftDB.
//!
//! This crate provides:
//! - Sync state machine (idle → connecting → pulling → pushing → synced)
//! - Cursor management and outbox acknowledgement
//! - Retry with exponential backoff
//! - Tokio sessions with bounded waits and a `watch` channel of
//!   connectivity states
//! - `AppRegistry`, the explicit table of app contexts
//! - `MemoryServer`, an in-memory relay for tests and demos
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** model:
//! 1. Download remote operations after the stored cursor
//! 2. Merge them into the local store in one write transaction per batch
//! 3. Upload the outbox and drop what the server acknowledged
//!
//! ## Key Invariants
//!
//! - Pull always happens before push within a cycle
//! - Replaying a batch is harmless: stores skip operations at or below each
//!   replica's watermark, the server skips clocks it already stored
//! - The cursor only moves forward, after the batch it covers is merged
//! - A timed-out wait surfaces exactly one error state

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod app;
mod applier;
mod config;
mod engine;
mod error;
mod session;
mod transport;

pub use app::{App, AppRegistry};
pub use applier::{StoreApplier, SyncApplier};
pub use config::{RetryConfig, SyncConfig};
pub use engine::{Direction, ProgressHandler, SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use session::{SessionState, SyncSession};
pub use transport::{MemoryServer, SyncTransport};
