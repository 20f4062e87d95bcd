//! Certificate bootstrap against a CA session.
//!
//! The CA speaks the same event protocol as any other peer; the
//! certificate structures ride as JSON payloads on fixed event names:
//! `issue_cs` carries a signing request up, `recv_cs` brings the issued
//! certificate back, `verify_cs` submits a peer's certificate, and
//! `cs_verification` returns the verdict.
//!
//! Payloads arrive with their zero padding still attached; JSON never
//! contains a NUL byte, so decoding trims trailing zeros first.

use std::fmt;
use std::path::PathBuf;

use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tokio::sync::mpsc;

use ironwire_core::crypto;

use crate::error::ConnectionError;
use crate::keys::Identity;
use crate::router::EventData;
use crate::session::Session;

/// Bootstrap failures. Connection-level errors pass through; the rest
/// describe what came back from the CA.
#[derive(Debug)]
pub enum BootstrapError {
    /// The underlying session failed.
    Connection(ConnectionError),

    /// The CA's reply was not a decodable certificate structure.
    MalformedReply,

    /// The issued certificate does not embed the requesting key.
    KeyMismatch,

    /// The CA session closed before replying.
    ChannelClosed,
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "bootstrap connection failure: {e}"),
            Self::MalformedReply => write!(f, "malformed reply from certificate authority"),
            Self::KeyMismatch => write!(f, "issued certificate embeds a different public key"),
            Self::ChannelClosed => write!(f, "certificate authority session closed mid-exchange"),
        }
    }
}

impl std::error::Error for BootstrapError {}

impl From<ConnectionError> for BootstrapError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

impl From<ironwire_core::CryptoError> for BootstrapError {
    fn from(e: ironwire_core::CryptoError) -> Self {
        Self::Connection(ConnectionError::Crypto(e))
    }
}

/// A certificate signing request: the subject proves possession of the
/// embedded key by signing over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Requesting identity name.
    pub subject: String,
    /// The key being certified, SPKI PEM.
    pub public_key_pem: String,
    /// Hex-encoded raw signature over SHA-512(subject || public_key_pem).
    pub signature: String,
}

impl CertificateRequest {
    /// Build and self-sign a request for `identity`.
    pub fn new(identity: &Identity) -> Result<Self, BootstrapError> {
        let public_key_pem = identity.public_pem()?;
        let digest = request_digest(&identity.name, &public_key_pem);
        let signature = crypto::raw_sign(&identity.private, &digest);
        Ok(Self {
            subject: identity.name.clone(),
            public_key_pem,
            signature: hex::encode(signature.to_bytes_be()),
        })
    }

    /// Check the proof-of-possession signature against the embedded key.
    pub fn verify(&self) -> bool {
        let Ok(public) = crypto::public_key_from_pem(&self.public_key_pem) else {
            return false;
        };
        let digest = request_digest(&self.subject, &self.public_key_pem);
        verify_hex_signature(&public, &self.signature, &digest)
    }
}

/// An issued certificate binding a subject name to a public key under
/// the issuer's signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Certified identity name.
    pub subject: String,
    /// Certified key, SPKI PEM.
    pub public_key_pem: String,
    /// Issuing authority name.
    pub issuer: String,
    /// Hex-encoded raw signature over
    /// SHA-512(subject || public_key_pem || issuer).
    pub signature: String,
}

impl Certificate {
    /// Issue a certificate for a verified request.
    pub fn issue(
        request: &CertificateRequest,
        issuer: &str,
        issuer_key: &RsaPrivateKey,
    ) -> Self {
        let digest = certificate_digest(&request.subject, &request.public_key_pem, issuer);
        let signature = crypto::raw_sign(issuer_key, &digest);
        Self {
            subject: request.subject.clone(),
            public_key_pem: request.public_key_pem.clone(),
            issuer: issuer.to_string(),
            signature: hex::encode(signature.to_bytes_be()),
        }
    }

    /// Check the issuer's signature.
    pub fn verify(&self, issuer_public: &RsaPublicKey) -> bool {
        let digest = certificate_digest(&self.subject, &self.public_key_pem, &self.issuer);
        verify_hex_signature(issuer_public, &self.signature, &digest)
    }
}

fn request_digest(subject: &str, public_key_pem: &str) -> [u8; crypto::DIGEST_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(subject.as_bytes());
    hasher.update(public_key_pem.as_bytes());
    hasher.finalize().into()
}

fn certificate_digest(subject: &str, public_key_pem: &str, issuer: &str) -> [u8; crypto::DIGEST_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(subject.as_bytes());
    hasher.update(public_key_pem.as_bytes());
    hasher.update(issuer.as_bytes());
    hasher.finalize().into()
}

fn verify_hex_signature(public: &RsaPublicKey, signature_hex: &str, digest: &[u8]) -> bool {
    let Ok(raw) = hex::decode(signature_hex) else {
        return false;
    };
    let recovered = crypto::raw_verify(public, &BigUint::from_bytes_be(&raw));
    recovered == BigUint::from_bytes_be(digest)
}

/// Strip the zero padding a decrypted payload carries before JSON
/// parsing.
fn trim_padding(payload: &[u8]) -> &[u8] {
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &payload[..end]
}

/// Certificate acquisition and peer verification over a CA session.
#[derive(Debug, Clone)]
pub struct CertificateBootstrap {
    store_dir: PathBuf,
}

impl CertificateBootstrap {
    /// Bootstrap persisting issued certificates under `store_dir`.
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    /// Request a certificate for the CA session's identity.
    ///
    /// Registers the `recv_cs` handler, sends the signed request on
    /// `issue_cs`, and awaits the issued certificate. The reply must
    /// embed the exact public key that was requested; on success the
    /// certificate is persisted to the store directory.
    pub async fn request_certificate(&self, ca: &Session) -> Result<Certificate, BootstrapError> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
        ca.on("recv_cs", move |data| {
            let tx = tx.clone();
            async move {
                if let EventData::Bytes(bytes) = data {
                    let _ = tx.send(bytes).await;
                }
            }
        });

        let request = CertificateRequest::new(ca.identity())?;
        let body = serde_json::to_vec(&request).map_err(|_| BootstrapError::MalformedReply)?;
        ca.send("issue_cs", &body).await?;

        let reply = rx.recv().await.ok_or(BootstrapError::ChannelClosed)?;
        let certificate: Certificate = serde_json::from_slice(trim_padding(&reply))
            .map_err(|_| BootstrapError::MalformedReply)?;

        if certificate.public_key_pem != ca.identity().public_pem()? {
            return Err(BootstrapError::KeyMismatch);
        }

        self.persist(&certificate).await?;
        tracing::info!(
            subject = %certificate.subject,
            issuer = %certificate.issuer,
            "certificate issued"
        );
        Ok(certificate)
    }

    /// Present an issued certificate to a peer session.
    ///
    /// Sent on `recv_client_cs`, the inverse of the `recv_server_cs`
    /// event on which the peer presents its own certificate.
    pub async fn present_certificate(
        &self,
        session: &Session,
        certificate: &Certificate,
    ) -> Result<(), BootstrapError> {
        let body = serde_json::to_vec(certificate).map_err(|_| BootstrapError::MalformedReply)?;
        session.send("recv_client_cs", &body).await?;
        Ok(())
    }

    /// Submit a peer's certificate to the CA for verification.
    ///
    /// Awaits the `cs_verification` verdict; a negative verdict
    /// terminates the peer session. Returns the verdict.
    pub async fn verify_peer_certificate(
        &self,
        ca: &Session,
        peer: &Session,
        certificate: &[u8],
    ) -> Result<bool, BootstrapError> {
        let (tx, mut rx) = mpsc::channel::<bool>(1);
        ca.on("cs_verification", move |data| {
            let tx = tx.clone();
            async move {
                // One big-endian integer byte plus padding; nonzero is
                // an accept.
                let verdict = match &data {
                    EventData::Bytes(bytes) => bytes.iter().any(|&b| b != 0),
                    _ => false,
                };
                let _ = tx.send(verdict).await;
            }
        });

        ca.send("verify_cs", trim_padding(certificate)).await?;
        let verdict = rx.recv().await.ok_or(BootstrapError::ChannelClosed)?;

        if !verdict {
            tracing::warn!("peer certificate rejected, terminating peer session");
            if let Err(e) = peer.terminate().await {
                tracing::debug!(error = %e, "peer session already down");
            }
        }
        Ok(verdict)
    }

    async fn persist(&self, certificate: &Certificate) -> Result<(), BootstrapError> {
        tokio::fs::create_dir_all(&self.store_dir)
            .await
            .map_err(|e| BootstrapError::Connection(e.into()))?;
        let path = self
            .store_dir
            .join(format!("{}_certificate.json", certificate.subject));
        let body =
            serde_json::to_vec_pretty(certificate).map_err(|_| BootstrapError::MalformedReply)?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| BootstrapError::Connection(e.into()))?;
        Ok(())
    }
}
