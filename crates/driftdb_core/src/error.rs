//! Error types for DriftDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in DriftDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Codec error while reading or writing the store image.
    #[error("codec error: {0}")]
    Codec(#[from] driftdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The object has not been added to a database.
    #[error("cannot reference an unmanaged object")]
    UnmanagedObject,

    /// The object was deleted or its database closed.
    #[error("object has been deleted or invalidated")]
    InvalidatedObject,

    /// The thread-safe reference was already consumed.
    #[error("can only resolve a thread safe reference once")]
    AlreadyResolved,

    /// Operation requires a different transaction state.
    #[error("wrong transaction state: {message}")]
    WrongTransactionState {
        /// What the caller attempted.
        message: String,
    },

    /// The handle already has a write transaction open.
    #[error("the database is already in a write transaction")]
    AlreadyInWriteTransaction,

    /// Timed out waiting for the store's writer lock.
    #[error("timed out waiting for the write lock")]
    WriteLockTimeout,

    /// A value does not match the declared property type.
    #[error("type mismatch for {property}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Property being written.
        property: String,
        /// Declared type.
        expected: String,
        /// Kind of the rejected value.
        found: String,
    },

    /// Class is not part of the schema.
    #[error("unknown class: {name}")]
    UnknownClass {
        /// Class name.
        name: String,
    },

    /// Property is not part of the class.
    #[error("unknown property {class}.{property}")]
    UnknownProperty {
        /// Class name.
        class: String,
        /// Property name.
        property: String,
    },

    /// Index is past the end of a collection.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Collection length.
        len: usize,
    },

    /// A list insert arrived before the element it is anchored after.
    #[error("list anchor {anchor} not found")]
    MissingAnchor {
        /// Stamp of the missing element.
        anchor: String,
    },

    /// Configured schema or location is incompatible with the stored data.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the incompatibility.
        message: String,
    },

    /// Store image is not in a format this build understands.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The database handle was closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a wrong transaction state error.
    pub fn wrong_transaction_state(message: impl Into<String>) -> Self {
        Self::WrongTransactionState {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        property: impl Into<String>,
        expected: impl ToString,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            property: property.into(),
            expected: expected.to_string(),
            found: found.into(),
        }
    }

    /// Creates an unknown class error.
    pub fn unknown_class(name: impl Into<String>) -> Self {
        Self::UnknownClass { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(class: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            class: class.into(),
            property: property.into(),
        }
    }

    /// Creates a missing anchor error.
    pub fn missing_anchor(anchor: impl ToString) -> Self {
        Self::MissingAnchor {
            anchor: anchor.to_string(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by misuse of the API.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CoreError::UnmanagedObject
                | CoreError::InvalidatedObject
                | CoreError::AlreadyResolved
                | CoreError::WrongTransactionState { .. }
                | CoreError::AlreadyInWriteTransaction
                | CoreError::TypeMismatch { .. }
                | CoreError::UnknownClass { .. }
                | CoreError::UnknownProperty { .. }
                | CoreError::IndexOutOfBounds { .. }
                | CoreError::DatabaseClosed
        )
    }
}
