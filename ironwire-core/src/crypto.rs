//! Cryptographic primitives.
//!
//! No protocol knowledge lives here. The session layer supplies IVs and
//! decides what gets hashed and signed; this module only performs the
//! operations.
//!
//! # Scheme Summary
//!
//! - Session-key wrapping: RSA-OAEP(SHA-256)
//! - Bulk encryption: AES-256-CBC, zero padding to the 16-byte boundary
//! - Digest: SHA-512 (64 bytes)
//! - Signatures: raw `digest^d mod n` / `sig^e mod n`, no padding scheme.
//!   Not secure against existential forgery; mandated by the protocol.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::frame::SIGNATURE_LEN;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Symmetric cipher block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// IV size in bytes.
pub const IV_LEN: usize = 16;

/// SHA-512 digest size in bytes.
pub const DIGEST_LEN: usize = 64;

/// Symmetric session key established once per connection.
///
/// Zeroized on drop. Cloned only into the receive loop of the one
/// connection it belongs to.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Generate a fresh random session key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Wrap raw key bytes (handshake responder side).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Generate a fresh random per-frame IV.
    pub fn generate_iv() -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Plaintext length rounded up to the next block boundary.
///
/// Aligned input gains no extra block: this is the ciphertext length
/// [`symmetric_encrypt`] produces.
pub fn padded_len(len: u64) -> u64 {
    len.div_ceil(BLOCK_LEN as u64) * BLOCK_LEN as u64
}

/// Encrypt small payloads (session key material) under a peer public key.
pub fn asymmetric_encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.encrypt(&mut rand::thread_rng(), Oaep::new::<sha2::Sha256>(), plaintext)
        .map_err(|_| CryptoError::MalformedCiphertext)
}

/// Decrypt small payloads under the local private key.
pub fn asymmetric_decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.decrypt(Oaep::new::<sha2::Sha256>(), ciphertext)
        .map_err(|_| CryptoError::MalformedCiphertext)
}

/// Serialize a public key to SPKI PEM (the handshake wire encoding).
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, CryptoError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|_| CryptoError::KeyFormat)
}

/// Parse a public key from SPKI PEM.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|_| CryptoError::KeyFormat)
}

/// Stateful AES-256-CBC encryptor for chunked payload transfer.
///
/// The CBC chain continues across chunks, so a payload encrypted in
/// 1024-byte chunks decrypts identically whether the receiver processes
/// it chunk by chunk or as one buffer. Only the final chunk of a
/// payload may be unaligned; it is zero-padded to the block boundary.
pub struct CbcStreamEncryptor(Aes256CbcEnc);

impl CbcStreamEncryptor {
    /// Start a CBC chain under `key` with the frame IV.
    pub fn new(key: &SessionKey, iv: &[u8; IV_LEN]) -> Self {
        Self(Aes256CbcEnc::new(key.as_bytes().into(), iv.into()))
    }

    /// Encrypt one chunk, zero-padding to the block boundary.
    ///
    /// Output length is the chunk length rounded up; aligned chunks gain
    /// no extra block.
    pub fn encrypt_chunk(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let padded = padded_len(plaintext.len() as u64) as usize;
        let mut buf = vec![0u8; padded];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        buf
    }
}

/// Stateful AES-256-CBC decryptor, the inverse of [`CbcStreamEncryptor`].
pub struct CbcStreamDecryptor(Aes256CbcDec);

impl CbcStreamDecryptor {
    /// Start a CBC chain under `key` with the frame IV.
    pub fn new(key: &SessionKey, iv: &[u8; IV_LEN]) -> Self {
        Self(Aes256CbcDec::new(key.as_bytes().into(), iv.into()))
    }

    /// Decrypt one block-aligned chunk.
    ///
    /// Output length equals input length; zero padding is not stripped.
    pub fn decrypt_chunk(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::BlockAlignment);
        }
        let mut buf = ciphertext.to_vec();
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(buf)
    }
}

/// AES-256-CBC encrypt with zero padding.
///
/// Output length is the input length rounded up to the block boundary.
/// The padding is not recoverable from the ciphertext; receivers that
/// need the exact plaintext length carry it out of band.
pub fn symmetric_encrypt(key: &SessionKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    CbcStreamEncryptor::new(key, iv).encrypt_chunk(plaintext)
}

/// AES-256-CBC decrypt.
///
/// Output length equals input length; zero padding is not stripped.
/// Fails if the ciphertext is not a multiple of the block size.
pub fn symmetric_decrypt(
    key: &SessionKey,
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    CbcStreamDecryptor::new(key, iv).decrypt_chunk(ciphertext)
}

/// One-shot SHA-512 digest.
///
/// Streaming callers use [`sha2::Sha512`] directly for incremental updates.
pub fn hash(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha512::digest(data).into()
}

/// Raw signature: `digest^d mod n`.
///
/// Textbook RSA exponentiation with no padding scheme. The protocol
/// mandates this exact construction; it is malleable and must not be
/// relied on for existential-forgery resistance.
pub fn raw_sign(key: &RsaPrivateKey, digest: &[u8; DIGEST_LEN]) -> BigUint {
    BigUint::from_bytes_be(digest).modpow(key.d(), key.n())
}

/// Inverse exponentiation: recovers the signed digest as an integer.
pub fn raw_verify(key: &RsaPublicKey, signature: &BigUint) -> BigUint {
    signature.modpow(key.e(), key.n())
}

/// Serialize a signature into the fixed 2048-byte big-endian wire field.
pub fn signature_to_bytes(signature: &BigUint) -> Result<Box<[u8; SIGNATURE_LEN]>, CryptoError> {
    let raw = signature.to_bytes_be();
    if raw.len() > SIGNATURE_LEN {
        return Err(CryptoError::SignatureWidth);
    }
    let mut out = Box::new([0u8; SIGNATURE_LEN]);
    out[SIGNATURE_LEN - raw.len()..].copy_from_slice(&raw);
    Ok(out)
}

/// Parse the 2048-byte big-endian signature field.
pub fn signature_from_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> (RsaPublicKey, RsaPrivateKey) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        (RsaPublicKey::from(&private), private)
    }

    #[test]
    fn symmetric_roundtrip_aligned() {
        let key = SessionKey::generate();
        let iv = SessionKey::generate_iv();
        let plaintext = [0x42u8; 64];

        let ciphertext = symmetric_encrypt(&key, &iv, &plaintext);
        assert_eq!(ciphertext.len(), 64);

        let decrypted = symmetric_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn symmetric_encrypt_rounds_up() {
        let key = SessionKey::generate();
        let iv = SessionKey::generate_iv();

        for (input_len, expect) in [(0usize, 0usize), (1, 16), (15, 16), (16, 16), (17, 32)] {
            let plaintext = vec![0xA5u8; input_len];
            let ciphertext = symmetric_encrypt(&key, &iv, &plaintext);
            assert_eq!(ciphertext.len(), expect, "input of {input_len} bytes");

            if input_len > 0 {
                let decrypted = symmetric_decrypt(&key, &iv, &ciphertext).unwrap();
                assert_eq!(decrypted.len(), expect);
                assert_eq!(&decrypted[..input_len], &plaintext[..]);
                assert!(decrypted[input_len..].iter().all(|&b| b == 0));
            }
        }
    }

    #[test]
    fn symmetric_decrypt_rejects_misaligned() {
        let key = SessionKey::generate();
        let iv = SessionKey::generate_iv();
        assert_eq!(
            symmetric_decrypt(&key, &iv, &[0u8; 15]),
            Err(CryptoError::BlockAlignment)
        );
    }

    #[test]
    fn chunked_encryption_matches_whole_buffer() {
        let key = SessionKey::generate();
        let iv = SessionKey::generate_iv();
        let plaintext: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

        let whole = symmetric_encrypt(&key, &iv, &plaintext);

        let mut enc = CbcStreamEncryptor::new(&key, &iv);
        let mut chunked = Vec::new();
        for chunk in plaintext.chunks(1024) {
            chunked.extend_from_slice(&enc.encrypt_chunk(chunk));
        }
        assert_eq!(chunked, whole);

        let mut dec = CbcStreamDecryptor::new(&key, &iv);
        let mut recovered = Vec::new();
        for chunk in whole.chunks(1024) {
            recovered.extend_from_slice(&dec.decrypt_chunk(chunk).unwrap());
        }
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn padded_len_rounds() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 16);
        assert_eq!(padded_len(16), 16);
        assert_eq!(padded_len(17), 32);
        assert_eq!(padded_len(1024), 1024);
    }

    #[test]
    fn asymmetric_roundtrip() {
        let (public, private) = test_keypair();
        let key = SessionKey::generate();

        let wrapped = asymmetric_encrypt(&public, key.as_bytes()).unwrap();
        assert_ne!(&wrapped[..], &key.as_bytes()[..]);

        let unwrapped = asymmetric_decrypt(&private, &wrapped).unwrap();
        assert_eq!(&unwrapped[..], &key.as_bytes()[..]);
    }

    #[test]
    fn asymmetric_decrypt_rejects_garbage() {
        let (_, private) = test_keypair();
        assert_eq!(
            asymmetric_decrypt(&private, &[0u8; 128]),
            Err(CryptoError::MalformedCiphertext)
        );
    }

    #[test]
    fn public_key_pem_roundtrip() {
        let (public, _) = test_keypair();
        let pem = public_key_to_pem(&public).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(public_key_from_pem(&pem).unwrap(), public);
    }

    #[test]
    fn raw_signature_recovers_digest() {
        let (public, private) = test_keypair();
        let digest = hash(b"payload under signature");

        let signature = raw_sign(&private, &digest);
        let recovered = raw_verify(&public, &signature);
        assert_eq!(recovered, BigUint::from_bytes_be(&digest));
    }

    #[test]
    fn signature_field_roundtrip() {
        let (_, private) = test_keypair();
        let digest = hash(b"field width");

        let signature = raw_sign(&private, &digest);
        let field = signature_to_bytes(&signature).unwrap();
        assert_eq!(field.len(), SIGNATURE_LEN);
        assert_eq!(signature_from_bytes(&field[..]), signature);
    }
}
