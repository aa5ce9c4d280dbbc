//! Error types for protocol validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised when a message violates the protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An uploaded operation was generated by a different replica.
    #[error("operation {clock} belongs to replica {found}, not {expected}")]
    ForeignOperation {
        /// Replica that sent the batch.
        expected: String,
        /// Replica that generated the operation.
        found: String,
        /// Clock of the offending operation.
        clock: u64,
    },

    /// Operations in a batch are not in ascending clock order.
    #[error("operations out of order: {previous} then {next}")]
    OutOfOrder {
        /// Clock of the earlier operation.
        previous: u64,
        /// Clock of the following operation.
        next: u64,
    },

    /// Peer speaks a different protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },
}
