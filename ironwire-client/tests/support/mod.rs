//! In-process wire peer for integration tests.
//!
//! Speaks the frame protocol directly from the core primitives, so the
//! client under test is talking to something that is not itself.

use std::sync::OnceLock;

use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ironwire_client::handshake;
use ironwire_client::Identity;
use ironwire_core::crypto::{self, padded_len, IV_LEN};
use ironwire_core::frame::{self, FrameHeader, LEN_FIELD_WIRE, SIGNATURE_LEN};
use ironwire_core::SessionKey;

fn cached_key(slot: &OnceLock<RsaPrivateKey>) -> RsaPrivateKey {
    slot.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("keygen"))
        .clone()
}

/// The identity the client under test runs as. Key generation is slow,
/// so the key is generated once and shared across tests.
pub fn client_identity() -> Identity {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    let private = cached_key(&KEY);
    Identity {
        name: "client".to_string(),
        public: RsaPublicKey::from(&private),
        private,
    }
}

/// The identity the test peer answers with.
pub fn peer_identity() -> Identity {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    let private = cached_key(&KEY);
    Identity {
        name: "peer".to_string(),
        public: RsaPublicKey::from(&private),
        private,
    }
}

/// One accepted connection with an established session key.
pub struct TestPeer {
    pub stream: TcpStream,
    pub key: SessionKey,
    pub client_public: RsaPublicKey,
    pub identity: Identity,
}

/// Accept one client connection and run the responder handshake.
pub async fn accept_peer(listener: &TcpListener) -> TestPeer {
    let (mut stream, _) = listener.accept().await.expect("accept failed");
    let identity = peer_identity();
    let (key, client_public) = handshake::accept(&mut stream, &identity)
        .await
        .expect("handshake failed");
    TestPeer {
        stream,
        key,
        client_public,
        identity,
    }
}

impl TestPeer {
    /// Send a correctly signed frame.
    pub async fn send_frame(&mut self, event: &str, payload: &[u8]) {
        let signature = self.signature_for(payload);
        self.send_frame_with_signature(event, payload, &signature)
            .await;
    }

    /// Send a frame with a caller-chosen signature field.
    pub async fn send_frame_with_signature(
        &mut self,
        event: &str,
        payload: &[u8],
        signature: &[u8; SIGNATURE_LEN],
    ) {
        let iv = SessionKey::generate_iv();
        let ciphertext = crypto::symmetric_encrypt(&self.key, &iv, payload);
        let header = FrameHeader {
            event: event.to_string(),
            data_length: ciphertext.len() as u64,
        };
        let (len_field, enc_header) =
            frame::encode_header(&self.key, &iv, &header).expect("encode failed");

        self.stream.write_all(&iv).await.expect("write iv");
        self.stream.write_all(&len_field).await.expect("write len field");
        self.stream.write_all(&enc_header).await.expect("write header");
        self.stream.write_all(&ciphertext).await.expect("write payload");
        self.stream.write_all(&signature[..]).await.expect("write signature");
        self.stream.flush().await.expect("flush");
    }

    /// The valid signature field for a payload (padding hashed in).
    pub fn signature_for(&self, payload: &[u8]) -> [u8; SIGNATURE_LEN] {
        let mut hasher = Sha512::new();
        hasher.update(payload);
        let pad = (padded_len(payload.len() as u64) as usize) - payload.len();
        hasher.update(&[0u8; 16][..pad]);
        let digest: [u8; 64] = hasher.finalize().into();

        let signature = crypto::raw_sign(&self.identity.private, &digest);
        *crypto::signature_to_bytes(&signature).expect("signature width")
    }

    /// Read one frame: the header, the decrypted payload (zero padding
    /// still attached), and whether the signature checks out against the
    /// client's public key.
    pub async fn read_frame(&mut self) -> (FrameHeader, Vec<u8>, bool) {
        let mut iv = [0u8; IV_LEN];
        self.stream.read_exact(&mut iv).await.expect("read iv");

        let mut len_field = [0u8; LEN_FIELD_WIRE];
        self.stream.read_exact(&mut len_field).await.expect("read len field");
        let header_len =
            frame::decode_len_field(&self.key, &iv, &len_field).expect("bad len field");

        let mut enc_header = vec![0u8; header_len as usize];
        self.stream.read_exact(&mut enc_header).await.expect("read header");
        let header = frame::decode_header(&self.key, &iv, &enc_header).expect("bad header");

        let mut ciphertext = vec![0u8; header.data_length as usize];
        self.stream.read_exact(&mut ciphertext).await.expect("read payload");
        let plaintext =
            crypto::symmetric_decrypt(&self.key, &iv, &ciphertext).expect("decrypt failed");

        let mut sig_field = vec![0u8; SIGNATURE_LEN];
        self.stream.read_exact(&mut sig_field).await.expect("read signature");
        let recovered =
            crypto::raw_verify(&self.client_public, &crypto::signature_from_bytes(&sig_field));
        let sig_ok = recovered == BigUint::from_bytes_be(&crypto::hash(&plaintext));

        (header, plaintext, sig_ok)
    }
}
