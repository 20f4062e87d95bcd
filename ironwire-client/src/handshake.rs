//! Session key exchange.
//!
//! One-shot, two states: awaiting keys, established. Wire shape, all
//! lengths 8-byte big-endian:
//!
//! ```text
//! client -> [len][own public key PEM]
//! server -> [len][own public key PEM]
//! client -> [len][OAEP-encrypted session key]
//! ```
//!
//! Any read that ends early aborts with [`ConnectionError`] before a
//! usable session exists. There is no retry state.

use rsa::RsaPublicKey;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ironwire_core::crypto;
use ironwire_core::SessionKey;

use crate::error::ConnectionError;
use crate::keys::Identity;

/// Hard cap on handshake message sizes (keys, wrapped session keys).
///
/// A PEM-encoded RSA public key is a few hundred bytes; anything
/// larger than this is not a handshake.
const MAX_HANDSHAKE_MSG: u64 = 64 * 1024;

/// Run the initiating half of the key exchange.
///
/// Returns the fresh session key and the peer's public key. On success
/// the connection is ESTABLISHED and framed traffic may flow.
pub async fn establish<S>(
    stream: &mut S,
    identity: &Identity,
) -> Result<(SessionKey, RsaPublicKey), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let own_pem = crypto::public_key_to_pem(&identity.public)?;
    write_prefixed(stream, own_pem.as_bytes()).await?;

    let peer_pem = read_prefixed(stream).await?;
    let peer_public = crypto::public_key_from_pem(
        std::str::from_utf8(&peer_pem).map_err(|_| ConnectionError::HandshakeFailed)?,
    )
    .map_err(|_| ConnectionError::HandshakeFailed)?;

    let key = SessionKey::generate();
    let wrapped = crypto::asymmetric_encrypt(&peer_public, key.as_bytes())
        .map_err(|_| ConnectionError::HandshakeFailed)?;
    write_prefixed(stream, &wrapped).await?;
    stream.flush().await?;

    tracing::debug!("session key established");
    Ok((key, peer_public))
}

/// Run the responding half of the key exchange.
///
/// The remote host side of [`establish`]: reads the initiator's public
/// key, answers with its own, and unwraps the session key the
/// initiator chose.
pub async fn accept<S>(
    stream: &mut S,
    identity: &Identity,
) -> Result<(SessionKey, RsaPublicKey), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer_pem = read_prefixed(stream).await?;
    let peer_public = crypto::public_key_from_pem(
        std::str::from_utf8(&peer_pem).map_err(|_| ConnectionError::HandshakeFailed)?,
    )
    .map_err(|_| ConnectionError::HandshakeFailed)?;

    let own_pem = crypto::public_key_to_pem(&identity.public)?;
    write_prefixed(stream, own_pem.as_bytes()).await?;
    stream.flush().await?;

    let wrapped = read_prefixed(stream).await?;
    let key_bytes = crypto::asymmetric_decrypt(&identity.private, &wrapped)
        .map_err(|_| ConnectionError::HandshakeFailed)?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| ConnectionError::HandshakeFailed)?;

    Ok((SessionKey::from_bytes(key_bytes), peer_public))
}

async fn write_prefixed<S>(stream: &mut S, data: &[u8]) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&(data.len() as u64).to_be_bytes()).await?;
    stream.write_all(data).await?;
    Ok(())
}

async fn read_prefixed<S>(stream: &mut S) -> Result<Vec<u8>, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 8];
    stream.read_exact(&mut len_bytes).await?;
    let len = u64::from_be_bytes(len_bytes);

    if len == 0 || len > MAX_HANDSHAKE_MSG {
        return Err(ConnectionError::HandshakeFailed);
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Identity;

    #[tokio::test]
    async fn both_ends_converge_on_one_key() {
        let client = Identity::generate("client", 1024).unwrap();
        let server = Identity::generate("server", 1024).unwrap();

        let (mut a, mut b) = tokio::io::duplex(16 * 1024);

        let server_task = tokio::spawn(async move {
            let server = server;
            accept(&mut b, &server).await
        });

        let (client_key, server_pub) = establish(&mut a, &client).await.unwrap();
        let (server_key, client_pub) = server_task.await.unwrap().unwrap();

        assert_eq!(client_key.as_bytes(), server_key.as_bytes());
        assert_eq!(client_pub, client.public);
        assert_ne!(server_pub, client.public);
    }

    #[tokio::test]
    async fn session_key_never_in_cleartext() {
        let client = Identity::generate("client", 1024).unwrap();
        let server = Identity::generate("server", 1024).unwrap();

        // Capture everything the client writes.
        let (mut a, b) = tokio::io::duplex(16 * 1024);
        let (mut b_rd, mut b_wr) = tokio::io::split(b);

        let mut wire = Vec::new();
        let server_task = tokio::spawn(async move {
            // Manual responder that records the client's bytes.
            let mut len = [0u8; 8];
            b_rd.read_exact(&mut len).await.unwrap();
            let mut key_pem = vec![0u8; u64::from_be_bytes(len) as usize];
            b_rd.read_exact(&mut key_pem).await.unwrap();
            wire.extend_from_slice(&key_pem);

            let pem = crypto::public_key_to_pem(&server.public).unwrap();
            b_wr.write_all(&(pem.len() as u64).to_be_bytes()).await.unwrap();
            b_wr.write_all(pem.as_bytes()).await.unwrap();

            b_rd.read_exact(&mut len).await.unwrap();
            let mut wrapped = vec![0u8; u64::from_be_bytes(len) as usize];
            b_rd.read_exact(&mut wrapped).await.unwrap();
            wire.extend_from_slice(&wrapped);
            wire
        });

        let (key, _) = establish(&mut a, &client).await.unwrap();
        let wire = server_task.await.unwrap();

        // The raw key bytes must not appear anywhere on the wire.
        assert!(!wire
            .windows(key.as_bytes().len())
            .any(|w| w == key.as_bytes()));
    }

    #[tokio::test]
    async fn truncated_stream_aborts() {
        let client = Identity::generate("client", 1024).unwrap();

        let (mut a, b) = tokio::io::duplex(16 * 1024);
        // Peer vanishes without answering.
        drop(b);

        let result = establish(&mut a, &client).await;
        assert!(matches!(
            result,
            Err(ConnectionError::ShortRead | ConnectionError::ConnectionClosed | ConnectionError::Io(_))
        ));
    }
}
