//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while parsing values or encoding images.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The image does not start with the expected magic bytes.
    #[error("invalid magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: [u8; 4],
        /// Magic bytes found in the input.
        found: [u8; 4],
    },

    /// The image body does not match its digest.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// An object id string is not 24 hex characters.
    #[error("invalid object id: {input}")]
    InvalidObjectId {
        /// The rejected input.
        input: String,
    },

    /// A decimal string could not be parsed or does not fit.
    #[error("invalid decimal: {input}")]
    InvalidDecimal {
        /// The rejected input.
        input: String,
    },
}

impl CodecError {
    pub(crate) fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::InvalidObjectId {
            input: "xyz".into(),
        };
        assert_eq!(err.to_string(), "invalid object id: xyz");
        assert_eq!(CodecError::ChecksumMismatch.to_string(), "checksum mismatch");
    }
}
