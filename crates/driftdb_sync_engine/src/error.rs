//! Error types for the sync engine.

use driftdb_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A message violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Local store error while applying or reading operations.
    #[error("database error: {0}")]
    Database(#[from] driftdb_core::CoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A cycle was started while another one is running.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A wait exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Session was logged out and waits for the user.
    #[error("session is logged out")]
    LoggedOut,

    /// Protocol version mismatch.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// No app context has been registered.
    #[error("no app context registered")]
    NoAppContext,

    /// Several app contexts are registered and none was named.
    #[error("{count} app contexts registered; an app id is required")]
    AmbiguousAppContext {
        /// Number of registered contexts.
        count: usize,
    },

    /// The named app context is not registered.
    #[error("unknown app: {0}")]
    UnknownApp(String),

    /// Background task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::ServerError(_) | SyncError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::VersionMismatch { local, remote } => {
                SyncError::VersionMismatch { local, remote }
            }
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::NoAppContext.is_retryable());
    }

    #[test]
    fn protocol_errors_convert() {
        let err: SyncError = ProtocolError::VersionMismatch {
            local: 1,
            remote: 2,
        }
        .into();
        assert!(matches!(err, SyncError::VersionMismatch { local: 1, remote: 2 }));

        let err: SyncError = ProtocolError::OutOfOrder {
            previous: 4,
            next: 3,
        }
        .into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        assert!(SyncError::AmbiguousAppContext { count: 2 }
            .to_string()
            .contains('2'));
    }
}
