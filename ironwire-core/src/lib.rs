//! Ironwire protocol core.
//!
//! Sans-I/O leaves of the ironwire secure transport:
//!
//! - Crypto primitives: RSA-OAEP session-key wrapping, AES-256-CBC with
//!   zero padding, SHA-512 digests, raw modular-exponentiation signatures
//! - Frame header codec for the encrypted wire format
//!
//! # Security Invariants
//!
//! - The session key never crosses the wire in cleartext
//! - IVs are generated fresh per frame, never reused under one key
//! - Signatures cover the plaintext digest, never ciphertext
//! - Any framing or alignment violation is terminal for the caller
//!
//! # Known Weakness
//!
//! Signatures are textbook RSA (`digest^d mod n`, no padding scheme).
//! This is the scheme the protocol mandates; it is malleable and offers
//! no protection against existential forgery. See [`crypto::raw_sign`].

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod crypto;
pub mod error;
pub mod frame;

pub use crypto::SessionKey;
pub use error::CryptoError;
pub use frame::{FrameError, FrameHeader};
