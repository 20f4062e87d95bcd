//! Key-pair provider.
//!
//! Loads a named identity's RSA key pair from PEM files on disk, the
//! `client_keys/<name>_public.pem` / `<name>_private.pem` layout. The
//! identity is immutable once loaded and owned exclusively by the
//! session that loaded it.

use std::path::{Path, PathBuf};

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use ironwire_core::crypto;
use ironwire_core::CryptoError;

use crate::error::ConnectionError;

/// A named identity with its RSA key pair.
///
/// The private key zeroizes on drop (provided by the `rsa` crate).
pub struct Identity {
    /// Identity name, bound into certificates.
    pub name: String,
    /// Public half, sent during the handshake.
    pub public: RsaPublicKey,
    /// Private half, used for decryption and raw signing.
    pub private: RsaPrivateKey,
}

impl Identity {
    /// Generate a fresh identity (tests, first-run provisioning).
    pub fn generate(name: impl Into<String>, bits: usize) -> Result<Self, CryptoError> {
        let private =
            RsaPrivateKey::new(&mut rand::thread_rng(), bits).map_err(|_| CryptoError::KeyFormat)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self {
            name: name.into(),
            public,
            private,
        })
    }

    /// Public key as SPKI PEM.
    pub fn public_pem(&self) -> Result<String, CryptoError> {
        crypto::public_key_to_pem(&self.public)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// File-system backed key-pair provider.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Provider rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load `(public, private)` for a named identity.
    pub async fn load(&self, name: &str) -> Result<Identity, ConnectionError> {
        let public_pem = tokio::fs::read_to_string(self.public_path(name)).await?;
        let private_pem = tokio::fs::read_to_string(self.private_path(name)).await?;

        let public = crypto::public_key_from_pem(&public_pem)?;
        let private = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .map_err(|_| ConnectionError::Crypto(CryptoError::KeyFormat))?;

        Ok(Identity {
            name: name.to_string(),
            public,
            private,
        })
    }

    /// Persist an identity's key pair (first-run provisioning).
    pub async fn store(&self, identity: &Identity) -> Result<(), ConnectionError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let public_pem = identity
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| ConnectionError::Crypto(CryptoError::KeyFormat))?;
        let private_pem = identity
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|_| ConnectionError::Crypto(CryptoError::KeyFormat))?;

        tokio::fs::write(self.public_path(&identity.name), public_pem).await?;
        tokio::fs::write(self.private_path(&identity.name), private_pem.as_bytes()).await?;
        Ok(())
    }

    fn public_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_public.pem"))
    }

    fn private_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_private.pem"))
    }
}

/// Convenience: load from a directory path without building a store.
pub async fn load_identity(dir: &Path, name: &str) -> Result<Identity, ConnectionError> {
    KeyStore::new(dir).load(name).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        let identity = Identity::generate("alice", 1024).unwrap();
        store.store(&identity).await.unwrap();

        let loaded = store.load("alice").await.unwrap();
        assert_eq!(loaded.name, "alice");
        assert_eq!(loaded.public, identity.public);
    }

    #[tokio::test]
    async fn load_missing_identity_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        assert!(store.load("nobody").await.is_err());
    }
}
