//! # DriftDB Sync Protocol
//!
//! Sync operation model and protocol messages for DriftDB.
//!
//! This crate provides:
//! - `ReplicaId`, `Stamp` and `LamportClock` for ordering operations
//! - `SyncOperation` for replication records
//! - `Outbox` for locally generated operations awaiting upload
//! - Protocol messages (Handshake, Pull, Push)
//!
//! This is a pure protocol crate with no I/O operations. Messages derive
//! `serde` traits; the byte encoding on the wire belongs to the transport.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod messages;
mod operation;
mod outbox;

pub use clock::{LamportClock, ReplicaId, Stamp};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    PROTOCOL_VERSION,
};
pub use operation::{ElementId, OperationKind, SyncOperation};
pub use outbox::Outbox;
