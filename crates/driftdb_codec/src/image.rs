//! Framed CBOR images with an integrity digest.
//!
//! Layout:
//!
//! ```text
//! | magic (4) | format (u16 LE) | body len (u64 LE) | CBOR body | SHA-256 (32) |
//! ```

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

const HEADER_LEN: usize = 4 + 2 + 8;
const DIGEST_LEN: usize = 32;

/// Encodes `body` as CBOR and wraps it in a framed image.
pub fn encode_image<T: Serialize>(magic: [u8; 4], format: u16, body: &T) -> CodecResult<Vec<u8>> {
    let mut cbor = Vec::new();
    ciborium::into_writer(body, &mut cbor).map_err(|e| CodecError::encoding(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + cbor.len() + DIGEST_LEN);
    out.extend_from_slice(&magic);
    out.extend_from_slice(&format.to_le_bytes());
    out.extend_from_slice(&(cbor.len() as u64).to_le_bytes());
    out.extend_from_slice(&cbor);
    let digest = Sha256::digest(&cbor);
    out.extend_from_slice(&digest);
    Ok(out)
}

/// Decodes a framed image, verifying magic and digest.
///
/// Returns the format number together with the decoded body.
pub fn decode_image<T: DeserializeOwned>(magic: [u8; 4], bytes: &[u8]) -> CodecResult<(u16, T)> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(CodecError::UnexpectedEof);
    }
    let mut found = [0u8; 4];
    found.copy_from_slice(&bytes[..4]);
    if found != magic {
        return Err(CodecError::InvalidMagic {
            expected: magic,
            found,
        });
    }
    let format = u16::from_le_bytes([bytes[4], bytes[5]]);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[6..HEADER_LEN]);
    let len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| CodecError::decoding("body length overflows"))?;

    let body_end = HEADER_LEN
        .checked_add(len)
        .ok_or_else(|| CodecError::decoding("body length overflows"))?;
    if bytes.len() != body_end + DIGEST_LEN {
        return Err(CodecError::UnexpectedEof);
    }
    let body = &bytes[HEADER_LEN..body_end];
    if Sha256::digest(body).as_slice() != &bytes[body_end..] {
        return Err(CodecError::ChecksumMismatch);
    }

    let value = ciborium::from_reader(body).map_err(|e| CodecError::decoding(e.to_string()))?;
    Ok((format, value))
}

/// Reads only the format number from an image header.
pub fn peek_format(magic: [u8; 4], bytes: &[u8]) -> CodecResult<u16> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::UnexpectedEof);
    }
    if bytes[..4] != magic {
        let mut found = [0u8; 4];
        found.copy_from_slice(&bytes[..4]);
        return Err(CodecError::InvalidMagic {
            expected: magic,
            found,
        });
    }
    Ok(u16::from_le_bytes([bytes[4], bytes[5]]))
}
