//! Frame header codec.
//!
//! Wire format of one frame, all integers big-endian:
//! ```text
//! +------------+------------------+---------------------+------------------+-----------------+
//! | IV (16B)   | enc. length (16B)| enc. header (L B)   | enc. payload     | signature (2048B)|
//! +------------+------------------+---------------------+------------------+-----------------+
//! ```
//!
//! The length field is an 8-byte big-endian integer that zero-pads to one
//! AES block under encryption, so it occupies 16 bytes on the wire. The
//! header is JSON (`{"event": ..., "data_length": ...}`) where
//! `data_length` is the encrypted payload length, always a multiple of 16.
//!
//! This module is sans-I/O: it turns decrypted structure into wire
//! segments and back. Exact reads against a live stream belong to the
//! session layer; any short read there is fatal.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, SessionKey, BLOCK_LEN, IV_LEN};
use crate::error::CryptoError;

/// Plaintext width of the header-length integer.
pub const LEN_FIELD_PLAINTEXT: usize = 8;

/// On-wire width of the encrypted header-length field (one AES block).
pub const LEN_FIELD_WIRE: usize = BLOCK_LEN;

/// Fixed signature field width in bytes.
pub const SIGNATURE_LEN: usize = 2048;

/// Chunk size for streamed payload transfer.
pub const CHUNK_SIZE: usize = 1024;

/// Largest header the codec will accept, in bytes.
///
/// Headers carry one event name and one integer; anything near this
/// bound is a framing violation, not a legitimate peer.
pub const MAX_HEADER_LEN: u64 = 4096;

/// Decrypted frame header.
///
/// A header is a transient, single-use value: built for one send or
/// recovered for one receive, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Event name the payload is dispatched under.
    pub event: String,
    /// Encrypted payload length on the wire (multiple of the block size).
    pub data_length: u64,
}

/// Frame codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Underlying cipher failure.
    Crypto(CryptoError),
    /// Header did not decode to the expected JSON object.
    MalformedHeader,
    /// Declared header length exceeds [`MAX_HEADER_LEN`] or is not
    /// block-aligned.
    LengthViolation,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "frame crypto failure: {e}"),
            Self::MalformedHeader => write!(f, "malformed frame header"),
            Self::LengthViolation => write!(f, "header length field violation"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<CryptoError> for FrameError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

/// Encode a header into its two encrypted wire segments.
///
/// Returns `(encrypted_length_field, encrypted_header)`. The caller
/// writes the IV first, then both segments in order.
pub fn encode_header(
    key: &SessionKey,
    iv: &[u8; IV_LEN],
    header: &FrameHeader,
) -> Result<(Vec<u8>, Vec<u8>), FrameError> {
    let json = serde_json::to_vec(header).map_err(|_| FrameError::MalformedHeader)?;
    let encrypted_header = crypto::symmetric_encrypt(key, iv, &json);

    let len_plain = (encrypted_header.len() as u64).to_be_bytes();
    let len_field = crypto::symmetric_encrypt(key, iv, &len_plain);
    debug_assert_eq!(len_field.len(), LEN_FIELD_WIRE);

    Ok((len_field, encrypted_header))
}

/// Decrypt the 16-byte length field and recover the header length `L`.
///
/// Only the first 8 decrypted bytes carry the integer; the tail is the
/// cipher's zero padding.
pub fn decode_len_field(
    key: &SessionKey,
    iv: &[u8; IV_LEN],
    field: &[u8; LEN_FIELD_WIRE],
) -> Result<u64, FrameError> {
    let plain = crypto::symmetric_decrypt(key, iv, field)?;
    let mut int_bytes = [0u8; LEN_FIELD_PLAINTEXT];
    int_bytes.copy_from_slice(&plain[..LEN_FIELD_PLAINTEXT]);
    let len = u64::from_be_bytes(int_bytes);

    if len == 0 || len > MAX_HEADER_LEN || len % BLOCK_LEN as u64 != 0 {
        return Err(FrameError::LengthViolation);
    }
    Ok(len)
}

/// Decrypt and parse the encrypted header segment.
pub fn decode_header(
    key: &SessionKey,
    iv: &[u8; IV_LEN],
    encrypted: &[u8],
) -> Result<FrameHeader, FrameError> {
    let plain = crypto::symmetric_decrypt(key, iv, encrypted)?;

    // JSON never contains NUL, so trailing zero padding is unambiguous.
    let end = plain
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);

    let header: FrameHeader =
        serde_json::from_slice(&plain[..end]).map_err(|_| FrameError::MalformedHeader)?;

    if header.data_length % BLOCK_LEN as u64 != 0 {
        return Err(FrameError::LengthViolation);
    }
    Ok(header)
}
