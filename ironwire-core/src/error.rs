//! Crypto errors.
//!
//! Every variant is fatal to the operation that raised it. There is no
//! recovery path; callers terminate the affected send/receive flow.

use std::fmt;

/// Errors from the cryptographic primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Asymmetric ciphertext is malformed or does not match the key size.
    MalformedCiphertext,

    /// Key material could not be parsed or serialized.
    KeyFormat,

    /// Symmetric ciphertext length is not a multiple of the block size.
    BlockAlignment,

    /// Signature integer does not fit the fixed 2048-byte wire field.
    SignatureWidth,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCiphertext => write!(f, "malformed asymmetric ciphertext"),
            Self::KeyFormat => write!(f, "invalid key material"),
            Self::BlockAlignment => write!(f, "ciphertext is not block-aligned"),
            Self::SignatureWidth => write!(f, "signature exceeds 2048-byte wire field"),
        }
    }
}

impl std::error::Error for CryptoError {}
